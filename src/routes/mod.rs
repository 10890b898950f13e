use axum::Router;

use crate::state::SharedState;

pub mod docs;
pub mod health;
pub mod rooms;
pub mod websocket;

/// Compose the session socket, read-only room routes, health and docs under one state.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(websocket::router())
        .merge(rooms::router())
        .merge(docs::router())
        .with_state(state)
}
