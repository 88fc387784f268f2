use std::sync::Arc;

use anyhow::Context;
use backchannel::auth::TokenVerifier;
use backchannel::broadcast::Topics;
use backchannel::config::Config;
use backchannel::notify::{Notify, NullNotifier, WebhookNotifier};
use backchannel::presence::MemoryPresence;
use backchannel::{app, store, AppState};
use sqlx::sqlite::SqlitePoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    // Startup failures are fatal; a process that cannot reach its store
    // should crash loud here, not limp along per-message.
    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(&config.database_url)
        .await
        .context("cannot open database")?;
    store::migrate(&db_pool).await.context("schema bootstrap failed")?;

    let notify: Arc<dyn Notify> = match &config.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(NullNotifier),
    };

    let state = AppState {
        verifier: TokenVerifier::new(&config.secret_key),
        db_pool,
        topics: Arc::new(Topics::new()),
        presence: Arc::new(MemoryPresence::new()),
        notify,
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("cannot bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app(state)).await?;

    Ok(())
}
