//! Event fan-out across connected sessions.
//!
//! One topic per chat room plus the shared `online_users` channel. A topic
//! is created when its first session subscribes and removed again when the
//! last one leaves. Delivery is per-subscriber FIFO over a bounded channel;
//! there is no ordering guarantee across subscribers, and a publisher that
//! is itself subscribed receives its own events back.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Per-subscriber event buffer. A subscriber that falls this far behind
/// starts losing events rather than stalling the publisher.
pub const EVENT_BUFFER: usize = 64;

/// Logical broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Chat(i64),
    OnlineUsers,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Chat(id) => write!(f, "chat:{id}"),
            Topic::OnlineUsers => f.write_str("online_users"),
        }
    }
}

/// Events flowing through a topic. A tagged enum, so every handler arm is
/// checked at compile time instead of being looked up by a type string.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    Message {
        message: String,
        username: String,
        sender_id: i64,
    },
}

type Subscribers = HashMap<Uuid, mpsc::Sender<Arc<RoomEvent>>>;

/// Topic registry shared by every session. The only frequently mutated
/// shared structure in the process; everything goes through the lock, so a
/// publish never observes a half-applied subscribe or unsubscribe.
pub struct Topics {
    inner: RwLock<HashMap<Topic, Subscribers>>,
}

impl Topics {
    pub fn new() -> Topics {
        Topics {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a session under a topic and hands back its event stream.
    /// Subscribing the same session id twice replaces the old stream.
    pub async fn subscribe(&self, topic: Topic, session: Uuid) -> mpsc::Receiver<Arc<RoomEvent>> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        self.inner.write().await.entry(topic).or_default().insert(session, tx);
        rx
    }

    /// Drops a session's registration. The topic itself is removed once its
    /// subscriber set empties.
    pub async fn unsubscribe(&self, topic: &Topic, session: &Uuid) {
        let mut topics = self.inner.write().await;
        if let Some(subs) = topics.get_mut(topic) {
            subs.remove(session);
            if subs.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Delivers `event` to every current subscriber of `topic`, the
    /// publisher included. Returns how many subscribers got it. A full
    /// buffer means that subscriber misses this event; a closed receiver is
    /// pruned afterwards.
    pub async fn publish(&self, topic: &Topic, event: RoomEvent) -> usize {
        let event = Arc::new(event);
        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let topics = self.inner.read().await;
            let Some(subs) = topics.get(topic) else {
                return 0;
            };
            for (session, tx) in subs {
                match tx.try_send(Arc::clone(&event)) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(%topic, %session, "subscriber lagging, event dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*session),
                }
            }
            debug!(%topic, delivered, "published event");
        }
        for session in &closed {
            self.unsubscribe(topic, session).await;
        }
        delivered
    }

    /// Number of sessions currently subscribed to a topic.
    pub async fn subscriber_count(&self, topic: &Topic) -> usize {
        self.inner.read().await.get(topic).map_or(0, Subscribers::len)
    }
}

impl Default for Topics {
    fn default() -> Topics {
        Topics::new()
    }
}
