//! Post-persistence notification hook.
//!
//! Invoked after a message row is written, off the session's hot path.
//! Whatever sits behind the trait (a push gateway, an SMS bridge) is an
//! external collaborator; if it fails, the warning in the log is the whole
//! story and message delivery is unaffected.

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageNotice {
    pub chat_id: i64,
    pub message_id: i64,
    pub sender_id: i64,
    pub sender_username: String,
    /// Room members other than the sender.
    pub recipients: Vec<i64>,
}

#[async_trait]
pub trait Notify: Send + Sync {
    async fn message_stored(&self, notice: MessageNotice);
}

/// Default when no webhook is configured.
pub struct NullNotifier;

#[async_trait]
impl Notify for NullNotifier {
    async fn message_stored(&self, _notice: MessageNotice) {}
}

/// POSTs each notice as JSON to a configured endpoint.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> WebhookNotifier {
        WebhookNotifier {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl Notify for WebhookNotifier {
    async fn message_stored(&self, notice: MessageNotice) {
        let result = self.client.post(&self.url).json(&notice).send().await;
        match result {
            Ok(response) if !response.status().is_success() => {
                warn!(
                    chat_id = notice.chat_id,
                    status = %response.status(),
                    "notification webhook rejected notice"
                );
            }
            Err(e) => {
                warn!(chat_id = notice.chat_id, error = %e, "notification dispatch failed");
            }
            Ok(_) => {}
        }
    }
}
