use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Walk sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How "destination reached" is decided for a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProximityMode {
    /// Arrival once the walk has lasted `arrival_after_secs`.
    #[default]
    Elapsed,
    /// Arrival within `arrival_radius_m` of a `"lat,lng"` destination.
    /// Free-text destinations never match.
    Radius,
    /// Never report arrival; the walker ends the walk explicitly.
    Never,
}

/// Terminal status a walk settles into when its owning connection drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectStatus {
    #[default]
    Emergency,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkConfig {
    /// Upper bound on trusted circle size.
    #[serde(default = "d_max_circle")]
    pub max_circle_size: usize,
    /// Path points kept per session; oldest evicted first.
    #[serde(default = "d_path_retention")]
    pub path_retention: usize,
    #[serde(default)]
    pub proximity: ProximityMode,
    #[serde(default = "d_arrival_after")]
    pub arrival_after_secs: u64,
    #[serde(default = "d_arrival_radius")]
    pub arrival_radius_m: f64,
    #[serde(default)]
    pub disconnect_status: DisconnectStatus,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            max_circle_size: d_max_circle(),
            path_retention: d_path_retention(),
            proximity: ProximityMode::default(),
            arrival_after_secs: d_arrival_after(),
            arrival_radius_m: d_arrival_radius(),
            disconnect_status: DisconnectStatus::default(),
        }
    }
}

fn d_max_circle() -> usize {
    3
}
fn d_path_retention() -> usize {
    100
}
fn d_arrival_after() -> u64 {
    120
}
fn d_arrival_radius() -> f64 {
    50.0
}
