//! In-memory registry of live connections and the identities behind them.
//!
//! A member identity may hold several connections at once (one per device);
//! a guest identity always holds exactly one, keyed by its connection id.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;

use st_domain::geo::GeoPoint;
use st_domain::identity::{ConnectionId, Identity};
use st_domain::trace::TraceEvent;
use st_protocol::{PresenceEntry, ServerMessage};

/// Channel to a connection's socket writer task.
pub type ConnectionSink = mpsc::Sender<ServerMessage>;

/// A live connection.
pub struct Connection {
    pub connection_id: ConnectionId,
    pub identity: Identity,
    pub joined_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Last general location tick (feeds the guest discovery list).
    pub location: Option<GeoPoint>,
    pub sink: ConnectionSink,
}

impl Connection {
    pub fn new(connection_id: impl Into<ConnectionId>, identity: Identity, sink: ConnectionSink) -> Self {
        let now = Utc::now();
        Self {
            connection_id: connection_id.into(),
            identity,
            joined_at: now,
            last_seen: now,
            location: None,
            sink,
        }
    }
}

/// Summary returned by the admin list endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub connection_id: ConnectionId,
    pub identity: Identity,
    pub joined_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Result of removing a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Deregistered {
    pub identity: Identity,
    /// The identity has no live connections left.
    pub went_offline: bool,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Connection>,
    by_identity: HashMap<String, HashSet<ConnectionId>>,
}

impl Inner {
    fn unlink(&mut self, identity_id: &str, connection_id: &str) -> bool {
        let Some(set) = self.by_identity.get_mut(identity_id) else {
            return true;
        };
        set.remove(connection_id);
        if set.is_empty() {
            self.by_identity.remove(identity_id);
            true
        } else {
            false
        }
    }
}

/// Thread-safe registry of all live connections.
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Register a connection.  Idempotent: registering the same connection
    /// id again replaces the entry, moving it between identities if needed.
    /// Returns how many connections the identity now holds.
    pub fn register(&self, conn: Connection) -> usize {
        let connection_id = conn.connection_id.clone();
        let identity_id = conn.identity.id.clone();
        let guest = conn.identity.is_guest();

        let count = {
            let mut inner = self.inner.write();
            if let Some(previous) = inner.connections.remove(&connection_id) {
                if previous.identity.id != identity_id {
                    inner.unlink(&previous.identity.id, &connection_id);
                }
            }
            let set = inner.by_identity.entry(identity_id.clone()).or_default();
            set.insert(connection_id.clone());
            let count = set.len();
            inner.connections.insert(connection_id.clone(), conn);
            count
        };

        TraceEvent::ConnectionRegistered {
            connection_id,
            identity_id,
            guest,
            connections_for_identity: count,
        }
        .emit();
        count
    }

    /// Remove a connection (on disconnect).  Returns `None` for a connection
    /// that was never registered or is already gone.
    pub fn deregister(&self, connection_id: &str) -> Option<Deregistered> {
        let result = {
            let mut inner = self.inner.write();
            let conn = inner.connections.remove(connection_id)?;
            let went_offline = inner.unlink(&conn.identity.id, connection_id);
            Deregistered {
                identity: conn.identity,
                went_offline,
            }
        };

        TraceEvent::ConnectionDeregistered {
            connection_id: connection_id.to_owned(),
            identity_id: result.identity.id.clone(),
            went_offline: result.went_offline,
        }
        .emit();
        Some(result)
    }

    /// Live connections currently held by an identity.
    pub fn connections_for(&self, identity_id: &str) -> HashSet<ConnectionId> {
        self.inner
            .read()
            .by_identity
            .get(identity_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_online(&self, identity_id: &str) -> bool {
        self.inner.read().by_identity.contains_key(identity_id)
    }

    pub fn identity_of(&self, connection_id: &str) -> Option<Identity> {
        self.inner
            .read()
            .connections
            .get(connection_id)
            .map(|c| c.identity.clone())
    }

    pub fn sink(&self, connection_id: &str) -> Option<ConnectionSink> {
        self.inner
            .read()
            .connections
            .get(connection_id)
            .map(|c| c.sink.clone())
    }

    /// Update the last_seen timestamp (called on any inbound message).
    pub fn touch(&self, connection_id: &str) {
        if let Some(conn) = self.inner.write().connections.get_mut(connection_id) {
            conn.last_seen = Utc::now();
        }
    }

    /// Rename a guest.  Members keep the name from the identity provider.
    pub fn set_guest_name(&self, connection_id: &str, name: &str) -> Option<Identity> {
        let mut inner = self.inner.write();
        let conn = inner.connections.get_mut(connection_id)?;
        if conn.identity.is_guest() {
            conn.identity = Identity::guest(connection_id, Some(name));
        }
        Some(conn.identity.clone())
    }

    pub fn set_location(&self, connection_id: &str, point: GeoPoint) {
        if let Some(conn) = self.inner.write().connections.get_mut(connection_id) {
            conn.location = Some(point);
        }
    }

    /// Guest discovery list, oldest connection first.
    pub fn guests(&self) -> Vec<PresenceEntry> {
        let inner = self.inner.read();
        let mut guests: Vec<&Connection> = inner
            .connections
            .values()
            .filter(|c| c.identity.is_guest())
            .collect();
        guests.sort_by_key(|c| c.joined_at);
        guests
            .into_iter()
            .map(|c| PresenceEntry {
                id: c.connection_id.clone(),
                display_name: c.identity.display_name.clone(),
                location: c.location,
            })
            .collect()
    }

    /// `(connection_id, display_name)` for every guest connection.
    pub fn guest_names(&self) -> Vec<(ConnectionId, String)> {
        self.inner
            .read()
            .connections
            .values()
            .filter(|c| c.identity.is_guest())
            .map(|c| (c.connection_id.clone(), c.identity.display_name.clone()))
            .collect()
    }

    pub fn guest_connections(&self) -> HashSet<ConnectionId> {
        self.inner
            .read()
            .connections
            .values()
            .filter(|c| c.identity.is_guest())
            .map(|c| c.connection_id.clone())
            .collect()
    }

    pub fn all_connections(&self) -> HashSet<ConnectionId> {
        self.inner.read().connections.keys().cloned().collect()
    }

    /// List all live connections.
    pub fn list(&self) -> Vec<ConnectionInfo> {
        self.inner
            .read()
            .connections
            .values()
            .map(|c| ConnectionInfo {
                connection_id: c.connection_id.clone(),
                identity: c.identity.clone(),
                joined_at: c.joined_at,
                last_seen: c.last_seen,
            })
            .collect()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.inner.read().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().connections.is_empty()
    }
}
