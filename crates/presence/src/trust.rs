//! Trust-scoped recipient resolution.
//!
//! Circle *membership* is fixed when a walk starts; circle *reachability* is
//! recomputed from the connection registry on every call and never cached,
//! so reconnects and extra devices are picked up on the next tick.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use st_domain::error::{Error, Result};
use st_domain::identity::{ConnectionId, Identity};
use st_protocol::PresenceEntry;

use crate::collaborators::RelationshipStore;
use crate::registry::ConnectionRegistry;

/// A requested trusted circle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "entries", rename_all = "snake_case")]
pub enum CircleSpec {
    /// Durable member ids.
    Members(BTreeSet<String>),
    /// Free-text display names, stored lowercase.
    GuestNames(BTreeSet<String>),
}

impl CircleSpec {
    /// Interpret raw circle entries according to who is asking.  Entries are
    /// trimmed; blanks and duplicates are dropped.
    pub fn for_requester(requester: &Identity, raw: Vec<String>) -> Self {
        let cleaned = raw
            .into_iter()
            .map(|e| e.trim().to_owned())
            .filter(|e| !e.is_empty());
        if requester.is_member() {
            CircleSpec::Members(cleaned.collect())
        } else {
            CircleSpec::GuestNames(cleaned.map(|e| e.to_lowercase()).collect())
        }
    }

    pub fn len(&self) -> usize {
        match self {
            CircleSpec::Members(ids) => ids.len(),
            CircleSpec::GuestNames(names) => names.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<String> {
        match self {
            CircleSpec::Members(ids) => ids.iter().cloned().collect(),
            CircleSpec::GuestNames(names) => names.iter().cloned().collect(),
        }
    }
}

/// Guest name matching: case-insensitive, and a match if either name
/// contains the other.  Short names over-match; that is accepted.
pub fn guest_name_matches(candidate: &str, requested: &str) -> bool {
    let candidate = candidate.trim().to_lowercase();
    let requested = requested.trim().to_lowercase();
    if candidate.is_empty() || requested.is_empty() {
        return false;
    }
    candidate.contains(&requested) || requested.contains(&candidate)
}

pub struct TrustResolver {
    registry: Arc<ConnectionRegistry>,
    relationships: Arc<dyn RelationshipStore>,
}

impl TrustResolver {
    pub fn new(registry: Arc<ConnectionRegistry>, relationships: Arc<dyn RelationshipStore>) -> Self {
        Self {
            registry,
            relationships,
        }
    }

    /// Check that a member circle is a subset of the requester's friends.
    /// Guest circles have nothing durable to check against.
    pub async fn validate(&self, requester: &Identity, circle: &CircleSpec) -> Result<()> {
        let CircleSpec::Members(ids) = circle else {
            return Ok(());
        };
        if requester.is_guest() {
            return Err(Error::InvalidCircle("guests cannot address members by id".into()));
        }
        let friends = self.relationships.friends_of(&requester.id).await?;
        let strangers: Vec<&str> = ids
            .iter()
            .filter(|id| !friends.contains(*id))
            .map(String::as_str)
            .collect();
        if !strangers.is_empty() {
            return Err(Error::InvalidCircle(format!(
                "not in your friends list: {}",
                strangers.join(", ")
            )));
        }
        Ok(())
    }

    /// Validate, then resolve to the connections reachable right now.
    pub async fn resolve_live_circle(
        &self,
        requester: &Identity,
        circle: &CircleSpec,
    ) -> Result<HashSet<ConnectionId>> {
        self.validate(requester, circle).await?;
        Ok(self.reachable(requester, circle))
    }

    /// Live connections for an already-validated circle.  The requester's
    /// own connections are never included.
    pub fn reachable(&self, requester: &Identity, circle: &CircleSpec) -> HashSet<ConnectionId> {
        let mut out = HashSet::new();
        match circle {
            CircleSpec::Members(ids) => {
                for id in ids {
                    out.extend(self.registry.connections_for(id));
                }
            }
            CircleSpec::GuestNames(names) => {
                for (connection_id, display_name) in self.registry.guest_names() {
                    if names.iter().any(|n| guest_name_matches(&display_name, n)) {
                        out.insert(connection_id);
                    }
                }
            }
        }
        for own in self.registry.connections_for(&requester.id) {
            out.remove(&own);
        }
        out
    }

    /// Every live connection of every friend of a member.
    pub async fn friend_connections(&self, member: &Identity) -> Result<HashSet<ConnectionId>> {
        let friends = self.relationships.friends_of(&member.id).await?;
        Ok(friends
            .iter()
            .flat_map(|f| self.registry.connections_for(f))
            .collect())
    }

    /// A member's friends that currently hold at least one connection.
    pub async fn online_friends(&self, member: &Identity) -> Result<Vec<PresenceEntry>> {
        let friends = self.relationships.friends_of(&member.id).await?;
        let mut online = Vec::new();
        for id in friends {
            if !self.registry.is_online(&id) {
                continue;
            }
            let display_name = self
                .relationships
                .display_name(&id)
                .await?
                .unwrap_or_else(|| id.clone());
            online.push(PresenceEntry {
                id,
                display_name,
                location: None,
            });
        }
        online.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(online)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Connection;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    struct Graph(HashMap<String, HashSet<String>>);

    #[async_trait]
    impl RelationshipStore for Graph {
        async fn friends_of(&self, identity_id: &str) -> Result<HashSet<String>> {
            Ok(self.0.get(identity_id).cloned().unwrap_or_default())
        }

        async fn display_name(&self, identity_id: &str) -> Result<Option<String>> {
            Ok(Some(identity_id.to_uppercase()))
        }
    }

    fn setup() -> (Arc<ConnectionRegistry>, TrustResolver) {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut graph = HashMap::new();
        graph.insert(
            "w".to_string(),
            ["a", "b"].iter().map(|s| s.to_string()).collect(),
        );
        let trust = TrustResolver::new(registry.clone(), Arc::new(Graph(graph)));
        (registry, trust)
    }

    fn add(registry: &ConnectionRegistry, conn_id: &str, identity: Identity) {
        let (tx, _rx) = mpsc::channel(1);
        registry.register(Connection::new(conn_id, identity, tx));
    }

    #[test]
    fn guest_matching_is_bidirectional_substring() {
        assert!(guest_name_matches("Ava123", "ava"));
        assert!(guest_name_matches("ava", "Ava123"));
        assert!(guest_name_matches("  AVA ", "ava"));
        assert!(!guest_name_matches("Ben", "ava"));
        assert!(!guest_name_matches("", "ava"));
        // Short names over-match by design of the heuristic.
        assert!(guest_name_matches("Al", "Alice"));
    }

    #[test]
    fn circle_spec_cleans_entries() {
        let member = Identity::member("w", "W");
        let spec = CircleSpec::for_requester(&member, vec![" a ".into(), "a".into(), "".into()]);
        assert_eq!(spec, CircleSpec::Members(["a".to_string()].into_iter().collect()));

        let guest = Identity::guest("g", None);
        let spec = CircleSpec::for_requester(&guest, vec!["Ava".into(), "AVA".into()]);
        assert_eq!(spec.len(), 1);
    }

    #[tokio::test]
    async fn member_circle_must_be_subset_of_friends() {
        let (_registry, trust) = setup();
        let walker = Identity::member("w", "W");
        let ok = CircleSpec::Members(["a".to_string()].into_iter().collect());
        assert!(trust.validate(&walker, &ok).await.is_ok());

        let bad = CircleSpec::Members(["a".to_string(), "z".to_string()].into_iter().collect());
        let err = trust.validate(&walker, &bad).await.unwrap_err();
        assert!(matches!(err, Error::InvalidCircle(ref m) if m.contains('z')), "{err}");
    }

    #[tokio::test]
    async fn member_circle_reaches_every_device() {
        let (registry, trust) = setup();
        let walker = Identity::member("w", "W");
        add(&registry, "a-phone", Identity::member("a", "A"));
        add(&registry, "a-laptop", Identity::member("a", "A"));
        add(&registry, "w-phone", walker.clone());

        let circle = CircleSpec::Members(["a".to_string(), "b".to_string()].into_iter().collect());
        let live = trust.resolve_live_circle(&walker, &circle).await.unwrap();
        assert_eq!(live.len(), 2);

        // b comes online later; the next resolution sees it.
        add(&registry, "b-phone", Identity::member("b", "B"));
        assert_eq!(trust.reachable(&walker, &circle).len(), 3);
    }

    #[tokio::test]
    async fn guest_circle_matches_all_same_named_guests_but_not_self() {
        let (registry, trust) = setup();
        add(&registry, "g-walker", Identity::guest("g-walker", Some("Ava")));
        add(&registry, "g1", Identity::guest("g1", Some("Ava123")));
        add(&registry, "g2", Identity::guest("g2", Some("ava")));
        add(&registry, "g3", Identity::guest("g3", Some("Ben")));
        add(&registry, "m1", Identity::member("ava-member", "ava"));

        let walker = registry.identity_of("g-walker").unwrap();
        let circle = CircleSpec::for_requester(&walker, vec!["ava".into()]);
        let live = trust.resolve_live_circle(&walker, &circle).await.unwrap();
        let expected: HashSet<String> = ["g1", "g2"].iter().map(|s| s.to_string()).collect();
        assert_eq!(live, expected);
    }

    #[tokio::test]
    async fn online_friends_lists_only_connected() {
        let (registry, trust) = setup();
        add(&registry, "a-phone", Identity::member("a", "A"));
        let online = trust.online_friends(&Identity::member("w", "W")).await.unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].id, "a");
        assert_eq!(online[0].display_name, "A");
    }
}
