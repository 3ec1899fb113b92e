use std::sync::Arc;

use chrono::{DateTime, Utc};

use st_domain::config::Config;
use st_presence::PresenceEngine;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<PresenceEngine>,
    /// SHA-256 of the admin API bearer token.  `None` disables auth on the
    /// protected routes (dev mode).
    pub api_token_hash: Option<Vec<u8>>,
    pub started_at: DateTime<Utc>,
}
