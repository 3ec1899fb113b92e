//! Presence event translator.
//!
//! Turns raw socket lifecycle (connect, inbound frame, disconnect) into
//! registry updates, walk transitions, and fanout.  Errors from a single
//! inbound event are reported back to the sender as an `error` frame and
//! never affect other connections.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use st_domain::config::WalkConfig;
use st_domain::error::{Error, Result};
use st_domain::geo::GeoPoint;
use st_domain::identity::{ConnectionId, Identity};
use st_domain::walk::{AlertKind, EmergencyAlert};
use st_protocol::{ClientMessage, ServerMessage};

use crate::collaborators::{IdentityProvider, PersistenceRecord, PersistenceStore, RelationshipStore};
use crate::dispatch::FanoutDispatcher;
use crate::identity::IdentityResolver;
use crate::persistence::PersistenceWriter;
use crate::proximity;
use crate::registry::{Connection, ConnectionRegistry, ConnectionSink};
use crate::trust::{CircleSpec, TrustResolver};
use crate::walks::WalkService;

/// External systems the engine is wired to.
pub struct Collaborators {
    pub identity: Arc<dyn IdentityProvider>,
    pub relationships: Arc<dyn RelationshipStore>,
    pub persistence: Arc<dyn PersistenceStore>,
}

pub struct PresenceEngine {
    registry: Arc<ConnectionRegistry>,
    identity: IdentityResolver,
    trust: Arc<TrustResolver>,
    dispatcher: FanoutDispatcher,
    walks: WalkService,
    persistence: PersistenceWriter,
}

impl PresenceEngine {
    /// Build the engine and start its persistence writer.  Must be called
    /// inside a tokio runtime.
    pub fn new(walk_config: &WalkConfig, collaborators: Collaborators) -> Self {
        let persistence = PersistenceWriter::spawn(collaborators.persistence);
        let registry = Arc::new(ConnectionRegistry::new());
        let trust = Arc::new(TrustResolver::new(
            registry.clone(),
            collaborators.relationships,
        ));
        let dispatcher = FanoutDispatcher::new(registry.clone());
        let walks = WalkService::new(
            walk_config.clone(),
            trust.clone(),
            dispatcher.clone(),
            persistence.clone(),
            proximity::from_config(walk_config),
        );
        Self {
            registry,
            identity: IdentityResolver::new(collaborators.identity),
            trust,
            dispatcher,
            walks,
            persistence,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn walks(&self) -> &WalkService {
        &self.walks
    }

    /// Queue one message for one connection.  Returns false on a gap.
    pub fn send(&self, connection_id: &str, msg: ServerMessage) -> bool {
        self.dispatcher.send(connection_id, msg)
    }

    /// Resolve the joining identity and register the connection.  A rejected
    /// credential registers nothing; the caller closes the socket.
    pub async fn connect(
        &self,
        connection_id: &str,
        credential: Option<&str>,
        username: Option<&str>,
        sink: ConnectionSink,
    ) -> Result<Identity> {
        let identity = self
            .identity
            .resolve_connection(connection_id, credential, username)
            .await?;

        let count = self
            .registry
            .register(Connection::new(connection_id, identity.clone(), sink));
        tracing::info!(
            connection_id,
            identity_id = %identity.id,
            kind = ?identity.kind,
            connections = count,
            "connection joined"
        );

        self.dispatcher.send(
            connection_id,
            ServerMessage::JoinedAck {
                identity: identity.clone(),
            },
        );

        if identity.is_guest() {
            self.broadcast_guest_list();
        } else {
            if count == 1 {
                self.persistence.append(PersistenceRecord::Presence {
                    identity_id: identity.id.clone(),
                    online: true,
                    at: Utc::now(),
                });
            }
            let friends = match self.trust.online_friends(&identity).await {
                Ok(friends) => friends,
                Err(e) => {
                    tracing::warn!(identity_id = %identity.id, error = %e, "online friends lookup failed");
                    Vec::new()
                }
            };
            self.dispatcher
                .send(connection_id, ServerMessage::OnlineFriends { friends });
        }
        Ok(identity)
    }

    /// Tear down a connection.  Safe to call for connections that never
    /// finished joining.
    pub async fn disconnect(&self, connection_id: &str) {
        let Some(gone) = self.registry.deregister(connection_id) else {
            return;
        };
        tracing::info!(
            connection_id,
            identity_id = %gone.identity.id,
            went_offline = gone.went_offline,
            "connection left"
        );

        if gone.identity.is_member() && gone.went_offline {
            self.persistence.append(PersistenceRecord::Presence {
                identity_id: gone.identity.id.clone(),
                online: false,
                at: Utc::now(),
            });
        }

        let connection_id: ConnectionId = connection_id.to_owned();
        self.walks.on_disconnect(&connection_id, &gone.identity).await;

        if gone.identity.is_guest() {
            self.broadcast_guest_list();
        }
    }

    /// Process one inbound event from a joined connection.
    pub async fn handle(&self, connection_id: &str, msg: ClientMessage) {
        self.registry.touch(connection_id);
        let Some(identity) = self.registry.identity_of(connection_id) else {
            tracing::debug!(connection_id, "event from unregistered connection dropped");
            return;
        };
        if let Err(e) = self.route(connection_id, &identity, msg).await {
            tracing::warn!(
                connection_id,
                identity_id = %identity.id,
                kind = e.kind(),
                error = %e,
                "event rejected"
            );
            self.dispatcher.send(connection_id, ServerMessage::error(&e));
        }
    }

    async fn route(&self, connection_id: &str, identity: &Identity, msg: ClientMessage) -> Result<()> {
        match msg {
            ClientMessage::Join { username, .. } => {
                let identity = match username.as_deref() {
                    Some(name) if identity.is_guest() => self
                        .registry
                        .set_guest_name(connection_id, name)
                        .unwrap_or_else(|| identity.clone()),
                    _ => identity.clone(),
                };
                let guest = identity.is_guest();
                self.dispatcher
                    .send(connection_id, ServerMessage::JoinedAck { identity });
                if guest {
                    self.broadcast_guest_list();
                }
                Ok(())
            }

            ClientMessage::LocationTick {
                lat,
                lng,
                speed,
                accuracy,
            } => {
                let point = GeoPoint {
                    lat,
                    lng,
                    accuracy,
                    speed,
                };
                self.registry.set_location(connection_id, point);
                let mut recipients = if identity.is_guest() {
                    self.registry.guest_connections()
                } else {
                    self.persistence.append(PersistenceRecord::Location {
                        identity_id: identity.id.clone(),
                        point,
                        at: Utc::now(),
                    });
                    self.trust.friend_connections(identity).await?
                };
                recipients.remove(connection_id);
                self.dispatcher.dispatch(
                    &ServerMessage::LocationUpdate {
                        identity: identity.clone(),
                        point,
                    },
                    &recipients,
                );
                Ok(())
            }

            ClientMessage::WalkStart {
                circle,
                destination,
                location,
            } => {
                self.walks
                    .start(identity, connection_id, circle, &destination, location)
                    .await?;
                Ok(())
            }

            ClientMessage::WalkLocation { point } => {
                let session_id = self.active_walk(identity)?;
                self.walks
                    .report_location(&session_id, identity, connection_id, point)
                    .await
            }

            ClientMessage::WalkComplete { status } => {
                let session_id = self.active_walk(identity)?;
                self.walks
                    .complete(&session_id, identity, status.as_deref())
                    .await
            }

            ClientMessage::WalkEmergency {
                kind,
                message,
                location,
            } => {
                let session_id = self.active_walk(identity)?;
                self.walks
                    .trigger_emergency(&session_id, identity, kind, message, location)
                    .await
            }

            ClientMessage::WalkCancel => {
                let session_id = self.active_walk(identity)?;
                self.walks.cancel(&session_id, identity).await
            }

            ClientMessage::WalkNotice { kind } => {
                let session_id = self.active_walk(identity)?;
                self.walks.notify(&session_id, identity, kind).await
            }

            ClientMessage::Chat { text } => {
                let text = text.trim();
                if text.is_empty() {
                    return Ok(());
                }
                self.dispatcher.dispatch(
                    &ServerMessage::Chat {
                        from_id: identity.id.clone(),
                        from_name: identity.display_name.clone(),
                        text: text.to_owned(),
                        timestamp: Utc::now(),
                    },
                    &self.registry.all_connections(),
                );
                Ok(())
            }

            ClientMessage::Sos {
                location,
                message,
                circle,
            } => self.sos(identity, location, message, circle).await,

            ClientMessage::ZoneEvent {
                event_type,
                zone_name,
            } => {
                tracing::info!(
                    identity_id = %identity.id,
                    event_type = %event_type,
                    zone = %zone_name,
                    "zone event"
                );
                let mut recipients = self.registry.all_connections();
                recipients.remove(connection_id);
                self.dispatcher.dispatch(
                    &ServerMessage::ZoneEventBroadcast {
                        username: identity.display_name.clone(),
                        event_type,
                        zone_name,
                        timestamp: Utc::now(),
                    },
                    &recipients,
                );
                Ok(())
            }

            ClientMessage::FriendRequest { friend_id } => {
                self.relay_to_member(
                    identity,
                    &friend_id,
                    ServerMessage::FriendRequestReceived {
                        from: identity.clone(),
                    },
                )
            }

            ClientMessage::FriendAccepted { requester_id } => {
                self.relay_to_member(
                    identity,
                    &requester_id,
                    ServerMessage::FriendRequestAccepted {
                        from: identity.clone(),
                    },
                )
            }

            ClientMessage::GetUsers => {
                self.dispatcher.send(
                    connection_id,
                    ServerMessage::PresenceList {
                        users: self.registry.guests(),
                    },
                );
                Ok(())
            }

            ClientMessage::Ping { timestamp } => {
                self.dispatcher
                    .send(connection_id, ServerMessage::Pong { timestamp });
                Ok(())
            }
        }
    }

    /// SOS outside a walk.  A circle scopes it through the trust resolver;
    /// without one it goes to every other connection.
    async fn sos(
        &self,
        identity: &Identity,
        location: Option<GeoPoint>,
        message: Option<String>,
        circle: Option<Vec<String>>,
    ) -> Result<()> {
        let message = message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| format!("{} needs help", identity.display_name));

        let recipients: HashSet<ConnectionId> = match circle.filter(|c| !c.is_empty()) {
            Some(raw) => {
                let spec = CircleSpec::for_requester(identity, raw);
                if spec.is_empty() {
                    return Err(Error::EmptyCircle);
                }
                self.trust.resolve_live_circle(identity, &spec).await?
            }
            None => {
                let mut all = self.registry.all_connections();
                for own in self.registry.connections_for(&identity.id) {
                    all.remove(&own);
                }
                all
            }
        };

        let alert = EmergencyAlert {
            kind: AlertKind::Sos,
            message,
            location,
            raised_at: Utc::now(),
        };
        tracing::warn!(
            identity_id = %identity.id,
            recipients = recipients.len(),
            "sos raised"
        );
        self.dispatcher.dispatch(
            &ServerMessage::SosBroadcast {
                from_id: identity.id.clone(),
                from_name: identity.display_name.clone(),
                message: alert.message.clone(),
                location,
                timestamp: alert.raised_at,
            },
            &recipients,
        );
        self.persistence.append(PersistenceRecord::Alert {
            session_id: self.walks.active_session_id(&identity.id),
            identity_id: identity.id.clone(),
            alert,
        });
        Ok(())
    }

    fn relay_to_member(&self, from: &Identity, target_id: &str, msg: ServerMessage) -> Result<()> {
        if from.is_guest() {
            return Err(Error::Auth("sign in to manage friends".into()));
        }
        if target_id == from.id {
            return Err(Error::InvalidCircle("cannot befriend yourself".into()));
        }
        let report = self
            .dispatcher
            .dispatch(&msg, &self.registry.connections_for(target_id));
        tracing::debug!(
            from = %from.id,
            target = target_id,
            event = msg.event_name(),
            delivered = report.delivered,
            "friend relay"
        );
        Ok(())
    }

    fn active_walk(&self, identity: &Identity) -> Result<String> {
        self.walks
            .active_session_id(&identity.id)
            .ok_or_else(|| Error::InvalidState("no active walk".into()))
    }

    fn broadcast_guest_list(&self) {
        self.dispatcher.dispatch(
            &ServerMessage::PresenceList {
                users: self.registry.guests(),
            },
            &self.registry.guest_connections(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::collaborators::NullPersistence;

    struct Tokens;

    #[async_trait]
    impl IdentityProvider for Tokens {
        async fn resolve(&self, credential: &str) -> Result<Identity> {
            match credential {
                "tok-ava" => Ok(Identity::member("ava", "Ava")),
                "tok-ben" => Ok(Identity::member("ben", "Ben")),
                _ => Err(Error::Auth("unknown token".into())),
            }
        }
    }

    struct Friends;

    #[async_trait]
    impl RelationshipStore for Friends {
        async fn friends_of(&self, identity_id: &str) -> Result<HashSet<String>> {
            let other = match identity_id {
                "ava" => "ben",
                "ben" => "ava",
                _ => return Ok(HashSet::new()),
            };
            Ok([other.to_string()].into_iter().collect())
        }

        async fn display_name(&self, identity_id: &str) -> Result<Option<String>> {
            Ok(Some(identity_id.to_string()))
        }
    }

    fn engine() -> PresenceEngine {
        PresenceEngine::new(
            &WalkConfig::default(),
            Collaborators {
                identity: Arc::new(Tokens),
                relationships: Arc::new(Friends),
                persistence: Arc::new(NullPersistence),
            },
        )
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn bad_credential_registers_nothing() {
        let engine = engine();
        let (tx, _rx) = mpsc::channel(8);
        let err = engine.connect("c1", Some("forged"), None, tx).await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert!(engine.registry().is_empty());
    }

    #[tokio::test]
    async fn member_join_gets_ack_and_online_friends() {
        let engine = engine();
        let (ben_tx, _ben_rx) = mpsc::channel(8);
        engine.connect("b1", Some("tok-ben"), None, ben_tx).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let id = engine.connect("a1", Some("tok-ava"), None, tx).await.unwrap();
        assert_eq!(id.id, "ava");

        let msgs = drain(&mut rx);
        assert!(matches!(&msgs[0], ServerMessage::JoinedAck { identity } if identity.id == "ava"));
        match &msgs[1] {
            ServerMessage::OnlineFriends { friends } => {
                assert_eq!(friends.len(), 1);
                assert_eq!(friends[0].id, "ben");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn guests_see_each_other_join_and_leave() {
        let engine = engine();
        let (tx1, mut rx1) = mpsc::channel(16);
        let (tx2, _rx2) = mpsc::channel(16);
        engine.connect("g1", None, Some("Ava"), tx1).await.unwrap();
        engine.connect("g2", None, Some("Ben"), tx2).await.unwrap();

        let lists: Vec<usize> = drain(&mut rx1)
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::PresenceList { users } => Some(users.len()),
                _ => None,
            })
            .collect();
        assert_eq!(lists, vec![1, 2]);

        engine.disconnect("g2").await;
        let after: Vec<ServerMessage> = drain(&mut rx1);
        assert!(matches!(&after[..], [ServerMessage::PresenceList { users }] if users.len() == 1));
    }

    #[tokio::test]
    async fn walk_events_without_a_walk_are_invalid_state() {
        let engine = engine();
        let (tx, mut rx) = mpsc::channel(8);
        engine.connect("a1", Some("tok-ava"), None, tx).await.unwrap();
        drain(&mut rx);

        engine.handle("a1", ClientMessage::WalkCancel).await;
        match drain(&mut rx).as_slice() {
            [ServerMessage::Error { kind, .. }] => assert_eq!(kind, "invalid-state"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn guest_friend_request_is_rejected() {
        let engine = engine();
        let (tx, mut rx) = mpsc::channel(8);
        engine.connect("g1", None, None, tx).await.unwrap();
        drain(&mut rx);

        engine
            .handle("g1", ClientMessage::FriendRequest { friend_id: "ava".into() })
            .await;
        match drain(&mut rx).as_slice() {
            [ServerMessage::Error { kind, .. }] => assert_eq!(kind, "authentication-failure"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn ping_pongs_and_chat_reaches_everyone() {
        let engine = engine();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        engine.connect("a1", Some("tok-ava"), None, tx1).await.unwrap();
        engine.connect("g1", None, Some("Kim"), tx2).await.unwrap();
        drain(&mut rx1);
        drain(&mut rx2);

        engine.handle("a1", ClientMessage::Ping { timestamp: 7 }).await;
        assert_eq!(drain(&mut rx1), vec![ServerMessage::Pong { timestamp: 7 }]);

        engine.handle("g1", ClientMessage::Chat { text: " hi ".into() }).await;
        for rx in [&mut rx1, &mut rx2] {
            match drain(rx).as_slice() {
                [ServerMessage::Chat { text, from_name, .. }] => {
                    assert_eq!(text, "hi");
                    assert_eq!(from_name, "Kim");
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn member_location_tick_goes_to_friends_only() {
        let engine = engine();
        let (ava_tx, mut ava_rx) = mpsc::channel(8);
        let (ben_tx, mut ben_rx) = mpsc::channel(8);
        let (guest_tx, mut guest_rx) = mpsc::channel(8);
        engine.connect("a1", Some("tok-ava"), None, ava_tx).await.unwrap();
        engine.connect("b1", Some("tok-ben"), None, ben_tx).await.unwrap();
        engine.connect("g1", None, None, guest_tx).await.unwrap();
        drain(&mut ava_rx);
        drain(&mut ben_rx);
        drain(&mut guest_rx);

        engine
            .handle(
                "a1",
                ClientMessage::LocationTick {
                    lat: 1.0,
                    lng: 2.0,
                    speed: None,
                    accuracy: Some(5.0),
                },
            )
            .await;

        assert!(matches!(
            drain(&mut ben_rx).as_slice(),
            [ServerMessage::LocationUpdate { identity, .. }] if identity.id == "ava"
        ));
        assert!(drain(&mut guest_rx).is_empty());
        assert!(drain(&mut ava_rx).is_empty());
    }

    #[tokio::test]
    async fn scoped_sos_reaches_circle_only() {
        let engine = engine();
        let (ava_tx, _ava_rx) = mpsc::channel(8);
        let (ben_tx, mut ben_rx) = mpsc::channel(8);
        let (guest_tx, mut guest_rx) = mpsc::channel(8);
        engine.connect("a1", Some("tok-ava"), None, ava_tx).await.unwrap();
        engine.connect("b1", Some("tok-ben"), None, ben_tx).await.unwrap();
        engine.connect("g1", None, None, guest_tx).await.unwrap();
        drain(&mut ben_rx);
        drain(&mut guest_rx);

        engine
            .handle(
                "a1",
                ClientMessage::Sos {
                    location: None,
                    message: None,
                    circle: Some(vec!["ben".into()]),
                },
            )
            .await;

        match drain(&mut ben_rx).as_slice() {
            [ServerMessage::SosBroadcast { message, .. }] => assert_eq!(message, "Ava needs help"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(drain(&mut guest_rx).is_empty());
    }
}
