//! Identities attached to live connections.
//!
//! A **member** identity is durable: the same id comes back on every device
//! and every reconnect.  A **guest** identity is synthesized per connection
//! and its id is the connection id, so it does not survive a reconnect.

use serde::{Deserialize, Serialize};

/// Opaque connection identifier minted by the gateway on upgrade.
pub type ConnectionId = String;

/// Display name used when a guest joins without choosing one.
pub const DEFAULT_GUEST_NAME: &str = "Guest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    Guest,
    Member,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub kind: IdentityKind,
    pub id: String,
    pub display_name: String,
}

impl Identity {
    pub fn member(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            kind: IdentityKind::Member,
            id: id.into(),
            display_name: display_name.into(),
        }
    }

    /// Guest identity scoped to one connection.  A blank name falls back to
    /// [`DEFAULT_GUEST_NAME`].
    pub fn guest(connection_id: &str, display_name: Option<&str>) -> Self {
        let name = display_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_GUEST_NAME);
        Self {
            kind: IdentityKind::Guest,
            id: connection_id.to_owned(),
            display_name: name.to_owned(),
        }
    }

    pub fn is_guest(&self) -> bool {
        self.kind == IdentityKind::Guest
    }

    pub fn is_member(&self) -> bool {
        self.kind == IdentityKind::Member
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_id_is_connection_id() {
        let g = Identity::guest("conn-1", Some("  Ava  "));
        assert!(g.is_guest());
        assert_eq!(g.id, "conn-1");
        assert_eq!(g.display_name, "Ava");
    }

    #[test]
    fn blank_guest_name_falls_back() {
        assert_eq!(Identity::guest("c", Some("   ")).display_name, "Guest");
        assert_eq!(Identity::guest("c", None).display_name, "Guest");
    }

    #[test]
    fn serializes_camel_case() {
        let m = Identity::member("u1", "Noor");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["kind"], "member");
        assert_eq!(v["displayName"], "Noor");
    }
}
