use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Best-effort append-only persistence of walk, alert, and presence records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            state_path: d_state_path(),
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_state_path() -> PathBuf {
    PathBuf::from("./data/state")
}
