use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_3000")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Environment variable holding the API bearer token for the admin
    /// endpoints (`/v1/presence`, `/v1/walks`).
    /// If unset, the server logs a warning and allows unauthenticated access.
    #[serde(default = "d_api_token_env")]
    pub api_token_env: String,
    /// Capacity of each connection's outbound queue.  A full queue drops the
    /// message for that connection (the next tick carries fresh state).
    #[serde(default = "d_outbound_queue")]
    pub outbound_queue: usize,
    /// Seconds a fresh socket has to send `join` before it is closed.
    #[serde(default = "d_join_timeout")]
    pub join_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "127.0.0.1".into(),
            cors: CorsConfig::default(),
            api_token_env: d_api_token_env(),
            outbound_queue: d_outbound_queue(),
            join_timeout_secs: d_join_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. Use `["*"]` for permissive (NOT recommended).
    /// Defaults to localhost-only.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_3000() -> u16 {
    3000
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:*".into(),
        "http://127.0.0.1:*".into(),
    ]
}
fn d_api_token_env() -> String {
    "SAFETRACK_API_TOKEN".into()
}
fn d_outbound_queue() -> usize {
    64
}
fn d_join_timeout() -> u64 {
    10
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
