use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
};

use crate::state::AppState;
use crate::ws::actor;

/// GET /ws/singer
/// Registers the connection as a singer as soon as the upgrade completes.
pub async fn singer_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| async move {
        let (handler, frames) = state.session.attach_singer();
        actor::run_connection(socket, handler, frames).await;
    })
}

/// GET /ws/screen
/// Registers the connection as a screen as soon as the upgrade completes.
pub async fn screen_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| async move {
        let (handler, frames) = state.session.attach_screen();
        actor::run_connection(socket, handler, frames).await;
    })
}
