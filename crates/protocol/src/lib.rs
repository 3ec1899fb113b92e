//! Client protocol: WebSocket message types exchanged between devices and
//! the SafeTrack gateway.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<kebab-name>", "data": {...}}`.  Unit events omit `data`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use st_domain::geo::GeoPoint;
use st_domain::identity::Identity;
use st_domain::walk::AlertKind;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client → Gateway
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Handshake.  No credential joins as a guest.
    #[serde(rename = "join")]
    Join {
        #[serde(default)]
        credential: Option<String>,
        /// Guest display name; ignored for members.
        #[serde(default)]
        username: Option<String>,
    },

    /// General (non-walk) location sharing.
    #[serde(rename = "location-tick")]
    LocationTick {
        lat: f64,
        lng: f64,
        #[serde(default)]
        speed: Option<f64>,
        #[serde(default)]
        accuracy: Option<f64>,
    },

    #[serde(rename = "walk-start")]
    WalkStart {
        /// Friend ids for members, display names for guests.
        circle: Vec<String>,
        #[serde(default = "default_destination")]
        destination: String,
        #[serde(default)]
        location: Option<GeoPoint>,
    },

    #[serde(rename = "walk-location")]
    WalkLocation {
        #[serde(alias = "location")]
        point: GeoPoint,
    },

    #[serde(rename = "walk-complete")]
    WalkComplete {
        #[serde(default)]
        status: Option<String>,
    },

    #[serde(rename = "walk-emergency")]
    WalkEmergency {
        #[serde(rename = "type", default)]
        kind: AlertKind,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        location: Option<GeoPoint>,
    },

    #[serde(rename = "walk-cancel")]
    WalkCancel,

    /// Advisory from the walker that does not change the walk's status.
    #[serde(rename = "walk-notice")]
    WalkNotice { kind: WalkNoticeKind },

    #[serde(rename = "chat")]
    Chat { text: String },

    /// Emergency broadcast.  With `circle` it goes to the trust-scoped
    /// recipients only; without it, to everyone connected.
    #[serde(rename = "sos")]
    Sos {
        #[serde(default)]
        location: Option<GeoPoint>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        circle: Option<Vec<String>>,
    },

    #[serde(rename = "zone-event")]
    ZoneEvent {
        #[serde(rename = "type")]
        event_type: String,
        zone_name: String,
    },

    #[serde(rename = "friend-request")]
    FriendRequest { friend_id: String },

    #[serde(rename = "friend-accepted")]
    FriendAccepted { requester_id: String },

    /// Ask for the guest discovery list.
    #[serde(rename = "get-users")]
    GetUsers,

    #[serde(rename = "ping")]
    Ping { timestamp: i64 },
}

fn default_destination() -> String {
    "Destination".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WalkNoticeKind {
    Extended,
    ScreenOff,
    ScreenOn,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gateway → Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Every payload is self-contained: recipient sets can differ between
/// consecutive ticks, so nothing may rely on an earlier message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    #[serde(rename = "joined-ack")]
    JoinedAck { identity: Identity },

    /// Guest discovery list.
    #[serde(rename = "presence-list")]
    PresenceList { users: Vec<PresenceEntry> },

    /// Relationship-scoped online subset for a member.
    #[serde(rename = "online-friends")]
    OnlineFriends { friends: Vec<PresenceEntry> },

    #[serde(rename = "location-update")]
    LocationUpdate {
        identity: Identity,
        point: GeoPoint,
    },

    /// Ack to the walker.
    #[serde(rename = "walk-started")]
    WalkStarted { session_id: String },

    #[serde(rename = "walk-added-you")]
    WalkAddedYou {
        walker_id: String,
        walker_name: String,
        destination: String,
        session_id: String,
    },

    #[serde(rename = "walk-location-update")]
    WalkLocationUpdate {
        walker_id: String,
        walker_name: String,
        point: GeoPoint,
        destination: String,
        session_id: String,
    },

    #[serde(rename = "walk-destination-reached")]
    WalkDestinationReached {
        walker_id: String,
        walker_name: String,
        destination: String,
    },

    #[serde(rename = "walk-notification")]
    WalkNotification { walker_id: String, message: String },

    #[serde(rename = "walk-ended")]
    WalkEnded {
        walker_id: String,
        walker_name: String,
        status: String,
    },

    #[serde(rename = "walk-emergency-received")]
    WalkEmergencyReceived {
        walker_id: String,
        walker_name: String,
        #[serde(rename = "type")]
        kind: AlertKind,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<GeoPoint>,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "chat")]
    Chat {
        from_id: String,
        from_name: String,
        text: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "sos-broadcast")]
    SosBroadcast {
        from_id: String,
        from_name: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<GeoPoint>,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "zone-event-broadcast")]
    ZoneEventBroadcast {
        username: String,
        #[serde(rename = "type")]
        event_type: String,
        zone_name: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "friend-request-received")]
    FriendRequestReceived { from: Identity },

    #[serde(rename = "friend-request-accepted")]
    FriendRequestAccepted { from: Identity },

    #[serde(rename = "error")]
    Error { kind: String, message: String },

    #[serde(rename = "pong")]
    Pong { timestamp: i64 },
}

impl ServerMessage {
    /// Event name as it appears on the wire (used for logging).
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::JoinedAck { .. } => "joined-ack",
            ServerMessage::PresenceList { .. } => "presence-list",
            ServerMessage::OnlineFriends { .. } => "online-friends",
            ServerMessage::LocationUpdate { .. } => "location-update",
            ServerMessage::WalkStarted { .. } => "walk-started",
            ServerMessage::WalkAddedYou { .. } => "walk-added-you",
            ServerMessage::WalkLocationUpdate { .. } => "walk-location-update",
            ServerMessage::WalkDestinationReached { .. } => "walk-destination-reached",
            ServerMessage::WalkNotification { .. } => "walk-notification",
            ServerMessage::WalkEnded { .. } => "walk-ended",
            ServerMessage::WalkEmergencyReceived { .. } => "walk-emergency-received",
            ServerMessage::Chat { .. } => "chat",
            ServerMessage::SosBroadcast { .. } => "sos-broadcast",
            ServerMessage::ZoneEventBroadcast { .. } => "zone-event-broadcast",
            ServerMessage::FriendRequestReceived { .. } => "friend-request-received",
            ServerMessage::FriendRequestAccepted { .. } => "friend-request-accepted",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Pong { .. } => "pong",
        }
    }

    pub fn error(err: &st_domain::error::Error) -> Self {
        ServerMessage::Error {
            kind: err.kind().to_owned(),
            message: err.to_string(),
        }
    }
}

/// One row of a discovery list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
}
