use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mean Earth radius in metres.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A location fix as reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            accuracy: None,
            speed: None,
        }
    }

    /// Great-circle distance in metres (haversine).
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos()
                * other.lat.to_radians().cos()
                * (d_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }

    /// Parse a `"lat,lng"` pair.  Returns `None` for free-text destinations.
    pub fn parse_pair(raw: &str) -> Option<GeoPoint> {
        let (lat, lng) = raw.split_once(',')?;
        let lat: f64 = lat.trim().parse().ok()?;
        let lng: f64 = lng.trim().parse().ok()?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return None;
        }
        Some(GeoPoint::new(lat, lng))
    }
}

/// One entry of a walk's path history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    #[serde(flatten)]
    pub point: GeoPoint,
    pub timestamp: DateTime<Utc>,
}

impl PathPoint {
    pub fn now(point: GeoPoint) -> Self {
        Self {
            point,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_between_identical_points_is_zero() {
        let p = GeoPoint::new(22.68, 75.87);
        assert!(p.distance_m(&p) < 1e-6);
    }

    #[test]
    fn one_degree_latitude_is_about_111_km() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(1.0, 0.0);
        let d = a.distance_m(&b);
        assert!((d - 111_195.0).abs() < 100.0, "got {d}");
    }

    #[test]
    fn parse_pair_accepts_coordinates_only() {
        let p = GeoPoint::parse_pair(" 22.5 , 75.9 ").unwrap();
        assert_eq!((p.lat, p.lng), (22.5, 75.9));
        assert!(GeoPoint::parse_pair("Library").is_none());
        assert!(GeoPoint::parse_pair("91,0").is_none());
    }
}
