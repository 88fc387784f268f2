pub mod auth;
pub mod broadcast;
pub mod chats;
pub mod config;
pub mod error;
pub mod notify;
pub mod presence;
pub mod store;

use std::sync::Arc;

use axum::{routing::get, Router};
use sqlx::SqlitePool;

use crate::auth::TokenVerifier;
use crate::broadcast::Topics;
use crate::notify::Notify;
use crate::presence::PresenceStore;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub verifier: TokenVerifier,
    pub topics: Arc<Topics>,
    pub presence: Arc<dyn PresenceStore>,
    pub notify: Arc<dyn Notify>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .nest("/ws", chats::router().merge(presence::router()))
        .with_state(state)
}
