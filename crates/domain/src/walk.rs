use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

/// Lifecycle status of a walk session.  Everything except `Active` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalkStatus {
    Active,
    Completed,
    Emergency,
    Cancelled,
}

impl WalkStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, WalkStatus::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WalkStatus::Active => "active",
            WalkStatus::Completed => "completed",
            WalkStatus::Emergency => "emergency",
            WalkStatus::Cancelled => "cancelled",
        }
    }
}

/// Label of an emergency.  Clients may send any label; the ones the engine
/// knows get their own variant and the rest are carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AlertKind {
    #[default]
    Manual,
    Inactivity,
    Sos,
    /// Only ever raised by the engine when a walker's connection drops.
    Disconnect,
    Other(String),
}

impl AlertKind {
    /// Blank labels fall back to `manual`.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        match label.to_ascii_lowercase().as_str() {
            "" | "manual" => AlertKind::Manual,
            "inactivity" => AlertKind::Inactivity,
            "sos" => AlertKind::Sos,
            "disconnect" => AlertKind::Disconnect,
            _ => AlertKind::Other(label.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AlertKind::Manual => "manual",
            AlertKind::Inactivity => "inactivity",
            AlertKind::Sos => "sos",
            AlertKind::Disconnect => "disconnect",
            AlertKind::Other(label) => label,
        }
    }
}

impl Serialize for AlertKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AlertKind {
    /// Never fails on the label itself: `null` becomes `manual` and
    /// non-string values keep their JSON text.
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(match raw {
            None | Some(serde_json::Value::Null) => AlertKind::Manual,
            Some(serde_json::Value::String(label)) => AlertKind::from_label(&label),
            Some(other) => AlertKind::Other(other.to_string()),
        })
    }
}

/// An emergency raised during a walk, either by the walker or synthesized
/// when the walker's connection drops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyAlert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    pub raised_at: DateTime<Utc>,
}

/// `walk-ended` status strings understood by clients.
pub mod end_status {
    pub const SAFE: &str = "safe";
    pub const CANCELLED: &str = "cancelled";
    pub const DISCONNECTED: &str = "disconnected";
}
