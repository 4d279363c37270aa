use axum::{extract::State, Json, Router};

use crate::session::SessionStatus;
use crate::state::AppState;
use crate::ws::handler as ws_handler;
use crate::ws::Role;

/// GET /api/session: read-only view of the now-playing slot and singer rotation.
async fn session_status(State(state): State<AppState>) -> Json<SessionStatus> {
    Json(state.session.status())
}

/// Build the full axum Router.
pub fn build_router(state: AppState) -> Router {
    // One upgrade path per role so singer and screen traffic never cross-dispatch
    let ws_routes = Router::new()
        .route(
            &Role::Singer.namespace(),
            axum::routing::get(ws_handler::singer_upgrade),
        )
        .route(
            &Role::Screen.namespace(),
            axum::routing::get(ws_handler::screen_upgrade),
        );

    let api_routes = Router::new().route("/api/session", axum::routing::get(session_status));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(api_routes)
        .merge(health)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
