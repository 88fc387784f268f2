//! Chat room WebSocket surface.

pub mod ws;

use axum::{routing::get, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/chat/{chat_id}", get(ws::chat_ws))
}
