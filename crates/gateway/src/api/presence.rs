//! Read-only presence and walk endpoints.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

/// GET /v1/health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "started_at": state.started_at,
        "connections": state.engine.registry().len(),
        "active_walks": state.engine.walks().len(),
    }))
}

/// GET /v1/presence: list live connections.
pub async fn list_connections(State(state): State<AppState>) -> impl IntoResponse {
    let mut connections = state.engine.registry().list();
    connections.sort_by_key(|c| c.joined_at);
    Json(serde_json::json!({
        "connections": connections,
        "count": connections.len(),
    }))
}

/// GET /v1/walks: list active walk sessions.
pub async fn list_walks(State(state): State<AppState>) -> impl IntoResponse {
    let walks = state.engine.walks().list();
    Json(serde_json::json!({
        "walks": walks,
        "count": walks.len(),
    }))
}
