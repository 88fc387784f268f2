use anyhow::Context;

/// Process configuration, read once at startup. Missing `DATABASE_URL` or
/// `SECRET_KEY` is fatal; everything else has a default.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub secret_key: String,
    pub bind_addr: String,
    pub notify_webhook_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        Ok(Config {
            database_url: dotenv::var("DATABASE_URL").context("DATABASE_URL is not set")?,
            secret_key: dotenv::var("SECRET_KEY").context("SECRET_KEY is not set")?,
            bind_addr: dotenv::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned()),
            notify_webhook_url: dotenv::var("NOTIFY_WEBHOOK_URL").ok(),
        })
    }
}
