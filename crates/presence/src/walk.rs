//! Walk session state.
//!
//! ```text
//! Active ──complete──▶ Completed
//!   │ ───cancel────▶ Cancelled
//!   │ ───emergency─▶ Emergency
//!   └───disconnect─▶ Emergency | Cancelled (configurable)
//! ```
//!
//! Terminal states accept nothing further.  Transitions only mutate the
//! session; notifying the circle is the service's job.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use st_domain::error::{Error, Result};
use st_domain::geo::{GeoPoint, PathPoint};
use st_domain::identity::{ConnectionId, Identity};
use st_domain::walk::{EmergencyAlert, WalkStatus};

use crate::trust::CircleSpec;

#[derive(Debug, Clone)]
pub struct WalkSession {
    pub session_id: String,
    pub walker: Identity,
    pub circle: CircleSpec,
    pub destination: String,
    pub status: WalkStatus,
    path: VecDeque<PathPoint>,
    retention: usize,
    pub alerts: Vec<EmergencyAlert>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub destination_reached: bool,
    /// Connection that last reported for this walk.  Its loss ends the walk.
    pub owner_connection: ConnectionId,
}

impl WalkSession {
    pub fn new(
        walker: Identity,
        circle: CircleSpec,
        destination: impl Into<String>,
        owner_connection: impl Into<ConnectionId>,
        retention: usize,
    ) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            walker,
            circle,
            destination: destination.into(),
            status: WalkStatus::Active,
            path: VecDeque::new(),
            retention: retention.max(1),
            alerts: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
            destination_reached: false,
            owner_connection: owner_connection.into(),
        }
    }

    pub fn path(&self) -> impl Iterator<Item = &PathPoint> {
        self.path.iter()
    }

    pub fn path_len(&self) -> usize {
        self.path.len()
    }

    pub fn last_location(&self) -> Option<GeoPoint> {
        self.path.back().map(|p| p.point)
    }

    pub fn is_active(&self) -> bool {
        self.status == WalkStatus::Active
    }

    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "walk {} is already {}",
                self.session_id,
                self.status.as_str()
            )))
        }
    }

    /// Append a point, evicting the oldest beyond the retention bound.
    pub fn append(&mut self, point: PathPoint) -> Result<()> {
        self.ensure_active()?;
        if self.path.len() == self.retention {
            self.path.pop_front();
        }
        self.path.push_back(point);
        Ok(())
    }

    /// Latch destination-reached.  Returns true only on the first call.
    pub fn mark_reached(&mut self) -> bool {
        if self.destination_reached {
            return false;
        }
        self.destination_reached = true;
        true
    }

    pub fn complete(&mut self) -> Result<()> {
        self.finish(WalkStatus::Completed)
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.finish(WalkStatus::Cancelled)
    }

    pub fn raise_emergency(&mut self, alert: EmergencyAlert) -> Result<()> {
        self.ensure_active()?;
        self.alerts.push(alert);
        self.finish(WalkStatus::Emergency)
    }

    /// The owning connection is gone.  Records the alert and settles into
    /// `status`, which must be terminal.
    pub fn abandon(&mut self, alert: EmergencyAlert, status: WalkStatus) -> Result<()> {
        self.ensure_active()?;
        if !status.is_terminal() {
            return Err(Error::InvalidState("abandon needs a terminal status".into()));
        }
        self.alerts.push(alert);
        self.finish(status)
    }

    fn finish(&mut self, status: WalkStatus) -> Result<()> {
        self.ensure_active()?;
        self.status = status;
        self.end_time = Some(Utc::now());
        Ok(())
    }

    pub fn snapshot(&self) -> WalkSnapshot {
        WalkSnapshot {
            session_id: self.session_id.clone(),
            walker_id: self.walker.id.clone(),
            walker_name: self.walker.display_name.clone(),
            circle: self.circle.entries(),
            destination: self.destination.clone(),
            status: self.status,
            path: self.path.iter().copied().collect(),
            start_time: self.start_time,
            end_time: self.end_time,
            alerts: self.alerts.clone(),
            destination_reached: self.destination_reached,
        }
    }
}

/// Serializable copy of a session, used for persistence and the admin API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkSnapshot {
    pub session_id: String,
    pub walker_id: String,
    pub walker_name: String,
    pub circle: Vec<String>,
    pub destination: String,
    pub status: WalkStatus,
    pub path: Vec<PathPoint>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub alerts: Vec<EmergencyAlert>,
    pub destination_reached: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_domain::walk::AlertKind;

    fn session(retention: usize) -> WalkSession {
        WalkSession::new(
            Identity::member("w", "Walker"),
            CircleSpec::Members(["a".to_string()].into_iter().collect()),
            "Library",
            "c1",
            retention,
        )
    }

    fn alert() -> EmergencyAlert {
        EmergencyAlert {
            kind: AlertKind::Manual,
            message: "help".into(),
            location: None,
            raised_at: Utc::now(),
        }
    }

    #[test]
    fn path_is_bounded_fifo() {
        let mut s = session(3);
        for i in 0..5 {
            s.append(PathPoint::now(GeoPoint::new(i as f64, 0.0))).unwrap();
        }
        let lats: Vec<f64> = s.path().map(|p| p.point.lat).collect();
        assert_eq!(lats, vec![2.0, 3.0, 4.0]);
        assert_eq!(s.last_location().map(|p| p.lat), Some(4.0));
    }

    #[test]
    fn terminal_states_reject_everything() {
        let mut s = session(10);
        s.complete().unwrap();
        assert_eq!(s.status, WalkStatus::Completed);
        assert!(s.end_time.is_some());

        assert!(matches!(s.complete(), Err(Error::InvalidState(_))));
        assert!(matches!(s.cancel(), Err(Error::InvalidState(_))));
        assert!(matches!(s.raise_emergency(alert()), Err(Error::InvalidState(_))));
        assert!(matches!(
            s.append(PathPoint::now(GeoPoint::new(0.0, 0.0))),
            Err(Error::InvalidState(_))
        ));
        assert!(s.alerts.is_empty());
    }

    #[test]
    fn emergency_records_alert() {
        let mut s = session(10);
        s.raise_emergency(alert()).unwrap();
        assert_eq!(s.status, WalkStatus::Emergency);
        assert_eq!(s.alerts.len(), 1);
    }

    #[test]
    fn abandon_rejects_active_target() {
        let mut s = session(10);
        assert!(s.abandon(alert(), WalkStatus::Active).is_err());
        assert!(s.is_active());
        s.abandon(alert(), WalkStatus::Cancelled).unwrap();
        assert_eq!(s.status, WalkStatus::Cancelled);
    }

    #[test]
    fn reached_latches_once() {
        let mut s = session(10);
        assert!(s.mark_reached());
        assert!(!s.mark_reached());
    }

    #[test]
    fn snapshot_roundtrips_json() {
        let mut s = session(10);
        s.append(PathPoint::now(GeoPoint::new(1.0, 2.0))).unwrap();
        let snap = s.snapshot();
        let json = serde_json::to_string(&snap).unwrap();
        let back: WalkSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
        assert_eq!(back.circle, vec!["a".to_string()]);
    }
}
