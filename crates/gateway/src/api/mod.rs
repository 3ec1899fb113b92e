pub mod auth;
pub mod presence;

use axum::middleware;
use axum::routing::get;
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no auth required) and **protected**
/// (gated behind the bearer-token middleware).  The WebSocket endpoint is
/// public: clients authenticate in the `join` frame instead.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/v1/health", get(presence::health))
        .route("/v1/ws", get(crate::ws::client_ws));

    let protected = Router::new()
        .route("/v1/presence", get(presence::list_connections))
        .route("/v1/walks", get(presence::list_walks))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public.merge(protected)
}
