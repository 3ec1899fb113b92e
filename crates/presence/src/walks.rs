//! Walk service: owns every live walk session and drives its transitions.
//!
//! Sessions are keyed by walker identity id, so a walker reconnecting on a
//! new device keeps reporting into the same session.  Each transition runs
//! under the walker's key lock; the table itself sits behind a short
//! `parking_lot` lock that is never held across an `.await`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use st_domain::config::{DisconnectStatus, WalkConfig};
use st_domain::error::{Error, Result};
use st_domain::geo::{GeoPoint, PathPoint};
use st_domain::identity::{ConnectionId, Identity};
use st_domain::trace::TraceEvent;
use st_domain::walk::{end_status, AlertKind, EmergencyAlert, WalkStatus};
use st_protocol::{ServerMessage, WalkNoticeKind};

use crate::collaborators::PersistenceRecord;
use crate::dispatch::FanoutDispatcher;
use crate::lock::KeyLockMap;
use crate::persistence::PersistenceWriter;
use crate::proximity::DestinationProximity;
use crate::trust::{CircleSpec, TrustResolver};
use crate::walk::{WalkSession, WalkSnapshot};

#[derive(Default)]
struct WalkTable {
    by_walker: HashMap<String, WalkSession>,
    /// session id → walker id
    by_session: HashMap<String, String>,
}

impl WalkTable {
    fn insert(&mut self, session: WalkSession) {
        self.by_session
            .insert(session.session_id.clone(), session.walker.id.clone());
        self.by_walker.insert(session.walker.id.clone(), session);
    }

    fn remove(&mut self, walker_id: &str) -> Option<WalkSession> {
        let session = self.by_walker.remove(walker_id)?;
        self.by_session.remove(&session.session_id);
        Some(session)
    }

    fn session_mut(&mut self, session_id: &str) -> Option<&mut WalkSession> {
        let walker_id = self.by_session.get(session_id)?;
        self.by_walker.get_mut(walker_id)
    }
}

/// What a transition needs for its fanout once the table lock is released.
struct Outcome {
    snapshot: WalkSnapshot,
    walker: Identity,
    circle: CircleSpec,
}

pub struct WalkService {
    config: WalkConfig,
    table: RwLock<WalkTable>,
    locks: KeyLockMap,
    trust: Arc<TrustResolver>,
    dispatcher: FanoutDispatcher,
    persistence: PersistenceWriter,
    proximity: Arc<dyn DestinationProximity>,
}

impl WalkService {
    pub fn new(
        config: WalkConfig,
        trust: Arc<TrustResolver>,
        dispatcher: FanoutDispatcher,
        persistence: PersistenceWriter,
        proximity: Arc<dyn DestinationProximity>,
    ) -> Self {
        Self {
            config,
            table: RwLock::new(WalkTable::default()),
            locks: KeyLockMap::new(),
            trust,
            dispatcher,
            persistence,
            proximity,
        }
    }

    /// Start a walk for `walker`, reporting from `connection_id`.  Returns
    /// the new session id.  On any error nothing is created or sent.
    pub async fn start(
        &self,
        walker: &Identity,
        connection_id: &str,
        circle: Vec<String>,
        destination: &str,
        initial: Option<GeoPoint>,
    ) -> Result<String> {
        let circle = CircleSpec::for_requester(walker, circle);
        if circle.is_empty() {
            return Err(Error::EmptyCircle);
        }
        if circle.len() > self.config.max_circle_size {
            return Err(Error::CircleTooLarge {
                size: circle.len(),
                max: self.config.max_circle_size,
            });
        }
        self.trust.validate(walker, &circle).await?;

        let _permit = self.locks.acquire(&walker.id).await?;

        let mut session = WalkSession::new(
            walker.clone(),
            circle.clone(),
            destination,
            connection_id,
            self.config.path_retention,
        );
        let first_point = initial.map(PathPoint::now);
        if let Some(point) = first_point {
            session.append(point)?;
        }
        let session_id = session.session_id.clone();
        let snapshot = session.snapshot();

        {
            let mut table = self.table.write();
            if let Some(existing) = table.by_walker.get(&walker.id) {
                return Err(Error::InvalidState(format!(
                    "walk {} is already active",
                    existing.session_id
                )));
            }
            table.insert(session);
        }

        let recipients = self.trust.reachable(walker, &circle);
        self.dispatcher.dispatch(
            &ServerMessage::WalkAddedYou {
                walker_id: walker.id.clone(),
                walker_name: walker.display_name.clone(),
                destination: destination.to_owned(),
                session_id: session_id.clone(),
            },
            &recipients,
        );
        if let Some(point) = first_point {
            self.dispatcher.dispatch(
                &location_update(walker, &snapshot.destination, &session_id, point.point),
                &recipients,
            );
        }
        self.dispatcher.send(
            connection_id,
            ServerMessage::WalkStarted {
                session_id: session_id.clone(),
            },
        );

        tracing::info!(
            session_id = %session_id,
            walker_id = %walker.id,
            circle_size = circle.len(),
            reachable = recipients.len(),
            "walk started"
        );
        TraceEvent::WalkStarted {
            session_id: session_id.clone(),
            walker_id: walker.id.clone(),
            circle_size: circle.len(),
        }
        .emit();
        self.persistence.append(PersistenceRecord::WalkStarted { session: snapshot });
        Ok(session_id)
    }

    /// Append a location and fan it out to whoever in the circle is
    /// reachable right now.
    pub async fn report_location(
        &self,
        session_id: &str,
        actor: &Identity,
        connection_id: &str,
        point: GeoPoint,
    ) -> Result<()> {
        let _permit = self.lock_for(session_id, actor).await?;
        let path_point = PathPoint::now(point);

        let (circle, destination, reached) = {
            let mut table = self.table.write();
            let session = owned_session(&mut table, session_id, actor)?;
            session.append(path_point)?;
            session.owner_connection = connection_id.to_owned();
            let reached =
                self.proximity.reached(session, &path_point) && session.mark_reached();
            (session.circle.clone(), session.destination.clone(), reached)
        };

        let recipients = self.trust.reachable(actor, &circle);
        self.dispatcher.dispatch(
            &location_update(actor, &destination, session_id, point),
            &recipients,
        );
        if reached {
            tracing::info!(session_id, walker_id = %actor.id, "destination reached");
            TraceEvent::DestinationReached {
                session_id: session_id.to_owned(),
                walker_id: actor.id.clone(),
            }
            .emit();
            self.dispatcher.dispatch(
                &ServerMessage::WalkDestinationReached {
                    walker_id: actor.id.clone(),
                    walker_name: actor.display_name.clone(),
                    destination,
                },
                &recipients,
            );
        }

        self.persistence.append(PersistenceRecord::PathPoint {
            session_id: session_id.to_owned(),
            walker_id: actor.id.clone(),
            point: path_point,
        });
        Ok(())
    }

    /// End the walk normally.  `status` is the walker-supplied end label
    /// carried on `walk-ended` (default `safe`).
    pub async fn complete(
        &self,
        session_id: &str,
        actor: &Identity,
        status: Option<&str>,
    ) -> Result<()> {
        let label = status
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(end_status::SAFE)
            .to_owned();
        let outcome = self
            .terminate(session_id, actor, |s| s.complete())
            .await?;
        self.announce_end(&outcome, &label);
        Ok(())
    }

    pub async fn cancel(&self, session_id: &str, actor: &Identity) -> Result<()> {
        let outcome = self.terminate(session_id, actor, |s| s.cancel()).await?;
        self.announce_end(&outcome, end_status::CANCELLED);
        Ok(())
    }

    /// Walker-raised emergency.  Missing message and location fall back to
    /// a default text and the last reported point.
    pub async fn trigger_emergency(
        &self,
        session_id: &str,
        actor: &Identity,
        kind: AlertKind,
        message: Option<String>,
        location: Option<GeoPoint>,
    ) -> Result<()> {
        // Connection-loss alerts come from on_disconnect only.
        let kind = match kind {
            AlertKind::Disconnect => {
                tracing::warn!(session_id, walker_id = %actor.id, "client-sent disconnect alert treated as manual");
                AlertKind::Manual
            }
            other => other,
        };
        let message = message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| format!("{} needs help", actor.display_name));
        let mut raised = None;
        let outcome = self
            .terminate(session_id, actor, |s| {
                let alert = EmergencyAlert {
                    kind,
                    message,
                    location: location.or_else(|| s.last_location()),
                    raised_at: Utc::now(),
                };
                raised = Some(alert.clone());
                s.raise_emergency(alert)
            })
            .await?;

        if let Some(alert) = raised {
            self.announce_emergency(&outcome, alert);
        }
        self.finish(&outcome);
        Ok(())
    }

    /// Advisory from the walker.  Status is unchanged.
    pub async fn notify(
        &self,
        session_id: &str,
        actor: &Identity,
        kind: WalkNoticeKind,
    ) -> Result<()> {
        let _permit = self.lock_for(session_id, actor).await?;
        let circle = {
            let mut table = self.table.write();
            let session = owned_session(&mut table, session_id, actor)?;
            session.ensure_active()?;
            session.circle.clone()
        };

        let name = &actor.display_name;
        let message = match kind {
            WalkNoticeKind::Extended => format!("{name} extended their walk time"),
            WalkNoticeKind::ScreenOff => format!("{name}'s screen turned off during the walk"),
            WalkNoticeKind::ScreenOn => format!("{name}'s screen turned back on"),
        };
        tracing::info!(session_id, walker_id = %actor.id, ?kind, "walk notice");
        let recipients = self.trust.reachable(actor, &circle);
        self.dispatcher.dispatch(
            &ServerMessage::WalkNotification {
                walker_id: actor.id.clone(),
                message,
            },
            &recipients,
        );
        Ok(())
    }

    /// The connection is gone.  If it owned an active walk, settle the walk
    /// and tell the circle: one emergency, one `walk-ended{disconnected}`.
    /// Never fails; returns the ended session, if any.
    pub async fn on_disconnect(
        &self,
        connection_id: &ConnectionId,
        identity: &Identity,
    ) -> Option<WalkSnapshot> {
        if !self.owns_active(connection_id, &identity.id) {
            return None;
        }
        let permit = match self.locks.acquire(&identity.id).await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::warn!(walker_id = %identity.id, error = %e, "disconnect cleanup skipped");
                return None;
            }
        };

        let status = match self.config.disconnect_status {
            DisconnectStatus::Emergency => WalkStatus::Emergency,
            DisconnectStatus::Cancelled => WalkStatus::Cancelled,
        };
        let (outcome, alert) = {
            let mut table = self.table.write();
            // Re-check under the lock: a racing transition may have ended
            // the walk or another device may have taken it over.
            let session = table.by_walker.get_mut(&identity.id)?;
            if &session.owner_connection != connection_id || !session.is_active() {
                return None;
            }
            let alert = EmergencyAlert {
                kind: AlertKind::Disconnect,
                message: format!("{} lost connection during the walk", identity.display_name),
                location: session.last_location(),
                raised_at: Utc::now(),
            };
            if let Err(e) = session.abandon(alert.clone(), status) {
                tracing::warn!(walker_id = %identity.id, error = %e, "disconnect transition rejected");
                return None;
            }
            let session = table.remove(&identity.id)?;
            (
                Outcome {
                    snapshot: session.snapshot(),
                    walker: session.walker,
                    circle: session.circle,
                },
                alert,
            )
        };
        drop(permit);
        self.locks.prune_idle();

        tracing::warn!(
            session_id = %outcome.snapshot.session_id,
            walker_id = %identity.id,
            connection_id = %connection_id,
            "walker disconnected during an active walk"
        );
        self.announce_emergency(&outcome, alert);
        self.announce_end(&outcome, end_status::DISCONNECTED);
        Some(outcome.snapshot)
    }

    /// Id of the walker's active session.
    pub fn active_session_id(&self, walker_id: &str) -> Option<String> {
        self.table
            .read()
            .by_walker
            .get(walker_id)
            .map(|s| s.session_id.clone())
    }

    pub fn get(&self, session_id: &str) -> Option<WalkSnapshot> {
        let table = self.table.read();
        let walker_id = table.by_session.get(session_id)?;
        table.by_walker.get(walker_id).map(WalkSession::snapshot)
    }

    pub fn list(&self) -> Vec<WalkSnapshot> {
        let mut walks: Vec<WalkSnapshot> = self
            .table
            .read()
            .by_walker
            .values()
            .map(WalkSession::snapshot)
            .collect();
        walks.sort_by_key(|w| w.start_time);
        walks
    }

    pub fn len(&self) -> usize {
        self.table.read().by_walker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().by_walker.is_empty()
    }

    // ── internals ────────────────────────────────────────────────────

    fn owns_active(&self, connection_id: &str, walker_id: &str) -> bool {
        self.table
            .read()
            .by_walker
            .get(walker_id)
            .is_some_and(|s| s.owner_connection == connection_id && s.is_active())
    }

    /// Take the walker lock for a session, rejecting unknown sessions and
    /// sessions that belong to someone else.
    async fn lock_for(
        &self,
        session_id: &str,
        actor: &Identity,
    ) -> Result<tokio::sync::OwnedSemaphorePermit> {
        let walker_id = self.table.read().by_session.get(session_id).cloned();
        match walker_id {
            Some(walker_id) if walker_id == actor.id => self.locks.acquire(&walker_id).await,
            _ => Err(unknown_session(session_id)),
        }
    }

    /// Apply a terminal transition and remove the session from memory.
    async fn terminate<F>(&self, session_id: &str, actor: &Identity, transition: F) -> Result<Outcome>
    where
        F: FnOnce(&mut WalkSession) -> Result<()>,
    {
        let permit = self.lock_for(session_id, actor).await?;
        let outcome = {
            let mut table = self.table.write();
            let session = owned_session(&mut table, session_id, actor)?;
            transition(session)?;
            let session = table
                .remove(&actor.id)
                .ok_or_else(|| unknown_session(session_id))?;
            Outcome {
                snapshot: session.snapshot(),
                walker: session.walker,
                circle: session.circle,
            }
        };
        drop(permit);
        self.locks.prune_idle();
        Ok(outcome)
    }

    fn announce_emergency(&self, outcome: &Outcome, alert: EmergencyAlert) {
        let recipients = self.trust.reachable(&outcome.walker, &outcome.circle);
        self.dispatcher.dispatch(
            &ServerMessage::WalkEmergencyReceived {
                walker_id: outcome.walker.id.clone(),
                walker_name: outcome.walker.display_name.clone(),
                kind: alert.kind.clone(),
                message: alert.message.clone(),
                location: alert.location,
                timestamp: alert.raised_at,
            },
            &recipients,
        );
        self.persistence.append(PersistenceRecord::Alert {
            session_id: Some(outcome.snapshot.session_id.clone()),
            identity_id: outcome.walker.id.clone(),
            alert,
        });
    }

    fn announce_end(&self, outcome: &Outcome, label: &str) {
        let recipients = self.trust.reachable(&outcome.walker, &outcome.circle);
        self.dispatcher.dispatch(
            &ServerMessage::WalkEnded {
                walker_id: outcome.walker.id.clone(),
                walker_name: outcome.walker.display_name.clone(),
                status: label.to_owned(),
            },
            &recipients,
        );
        self.finish(outcome);
    }

    fn finish(&self, outcome: &Outcome) {
        let snap = &outcome.snapshot;
        tracing::info!(
            session_id = %snap.session_id,
            walker_id = %snap.walker_id,
            status = snap.status.as_str(),
            "walk ended"
        );
        TraceEvent::WalkEnded {
            session_id: snap.session_id.clone(),
            walker_id: snap.walker_id.clone(),
            status: snap.status.as_str().to_owned(),
            path_points: snap.path.len(),
        }
        .emit();
        self.persistence.append(PersistenceRecord::WalkEnded {
            session: snap.clone(),
        });
    }
}

fn owned_session<'a>(
    table: &'a mut WalkTable,
    session_id: &str,
    actor: &Identity,
) -> Result<&'a mut WalkSession> {
    match table.session_mut(session_id) {
        Some(session) if session.walker.id == actor.id => Ok(session),
        _ => Err(unknown_session(session_id)),
    }
}

fn unknown_session(session_id: &str) -> Error {
    Error::InvalidState(format!("no active walk with id {session_id}"))
}

fn location_update(
    walker: &Identity,
    destination: &str,
    session_id: &str,
    point: GeoPoint,
) -> ServerMessage {
    ServerMessage::WalkLocationUpdate {
        walker_id: walker.id.clone(),
        walker_name: walker.display_name.clone(),
        point,
        destination: destination.to_owned(),
        session_id: session_id.to_owned(),
    }
}
