//! Destination-reached detection.
//!
//! Pluggable so the elapsed-time placeholder can be swapped for a real
//! geometric check without touching the walk service.

use std::sync::Arc;
use std::time::Duration;

use st_domain::config::{ProximityMode, WalkConfig};
use st_domain::geo::{GeoPoint, PathPoint};

use crate::walk::WalkSession;

pub trait DestinationProximity: Send + Sync {
    /// Whether `latest` counts as arrival for `session`.  Called once per
    /// accepted location report, after the point is appended.
    fn reached(&self, session: &WalkSession, latest: &PathPoint) -> bool;
}

/// Arrival once the walk has lasted long enough.
pub struct ElapsedProximity {
    pub after: Duration,
}

impl DestinationProximity for ElapsedProximity {
    fn reached(&self, session: &WalkSession, latest: &PathPoint) -> bool {
        let elapsed = latest.timestamp - session.start_time;
        elapsed
            .to_std()
            .map(|d| d >= self.after)
            .unwrap_or(false)
    }
}

/// Arrival within `radius_m` of a `"lat,lng"` destination.
pub struct RadiusProximity {
    pub radius_m: f64,
}

impl DestinationProximity for RadiusProximity {
    fn reached(&self, session: &WalkSession, latest: &PathPoint) -> bool {
        match GeoPoint::parse_pair(&session.destination) {
            Some(target) => latest.point.distance_m(&target) <= self.radius_m,
            None => false,
        }
    }
}

pub struct NeverProximity;

impl DestinationProximity for NeverProximity {
    fn reached(&self, _session: &WalkSession, _latest: &PathPoint) -> bool {
        false
    }
}

pub fn from_config(cfg: &WalkConfig) -> Arc<dyn DestinationProximity> {
    match cfg.proximity {
        ProximityMode::Elapsed => Arc::new(ElapsedProximity {
            after: Duration::from_secs(cfg.arrival_after_secs),
        }),
        ProximityMode::Radius => Arc::new(RadiusProximity {
            radius_m: cfg.arrival_radius_m,
        }),
        ProximityMode::Never => Arc::new(NeverProximity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::CircleSpec;
    use st_domain::identity::Identity;

    fn session(destination: &str) -> WalkSession {
        WalkSession::new(
            Identity::member("w", "W"),
            CircleSpec::Members(Default::default()),
            destination,
            "c1",
            10,
        )
    }

    #[test]
    fn elapsed_uses_point_timestamp() {
        let s = session("Library");
        let rule = ElapsedProximity {
            after: Duration::from_secs(120),
        };
        let early = PathPoint {
            point: GeoPoint::new(0.0, 0.0),
            timestamp: s.start_time + chrono::Duration::seconds(30),
        };
        let late = PathPoint {
            point: GeoPoint::new(0.0, 0.0),
            timestamp: s.start_time + chrono::Duration::seconds(121),
        };
        assert!(!rule.reached(&s, &early));
        assert!(rule.reached(&s, &late));
    }

    #[test]
    fn radius_needs_coordinate_destination() {
        let rule = RadiusProximity { radius_m: 50.0 };
        let near = PathPoint::now(GeoPoint::new(22.7196, 75.8577));
        let far = PathPoint::now(GeoPoint::new(22.7300, 75.8577));

        let s = session("22.7197,75.8577");
        assert!(rule.reached(&s, &near));
        assert!(!rule.reached(&s, &far));

        assert!(!rule.reached(&session("Library"), &near));
    }

    #[test]
    fn config_selects_rule() {
        let cfg = WalkConfig {
            proximity: ProximityMode::Never,
            ..WalkConfig::default()
        };
        let rule = from_config(&cfg);
        let s = session("0,0");
        assert!(!rule.reached(&s, &PathPoint::now(GeoPoint::new(0.0, 0.0))));
    }
}
