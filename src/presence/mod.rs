//! Online-presence tracking with TTL-based expiry.
//!
//! A presence record is ephemeral: written on connect, deleted on clean
//! disconnect, and self-healing through its TTL when a connection dies
//! without ever saying goodbye. Absence of a record means offline. The
//! store sits behind a trait so production can swap in any TTL-capable
//! key-value backend and tests can drive the clock by hand.

pub mod ws;

use std::collections::HashMap;

use async_trait::async_trait;
use axum::{routing::get, Router};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

use crate::AppState;

/// How long a presence record survives without being refreshed.
pub const ONLINE_TTL: Duration = Duration::from_secs(300);

pub fn router() -> Router<AppState> {
    Router::new().route("/user-status", get(ws::user_status_ws))
}

/// A backend problem. Presence degrades to "unknown" on this; it never
/// takes a connection down with it.
#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("presence store unavailable: {0}")]
    Unavailable(String),
}

pub type PresenceResult<T> = Result<T, PresenceError>;

#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Upserts the record and resets its TTL. Never creates a duplicate.
    async fn mark_online(&self, user_id: i64) -> PresenceResult<()>;
    /// Deletes the record. Marking an offline user offline is a no-op.
    async fn mark_offline(&self, user_id: i64) -> PresenceResult<()>;
    async fn is_online(&self, user_id: i64) -> PresenceResult<bool>;
    /// Every user id with a live record, in no particular order.
    async fn list_online(&self) -> PresenceResult<Vec<i64>>;
}

#[derive(Debug)]
struct Record {
    online_at: OffsetDateTime,
    expires_at: Instant,
}

/// In-memory default backend. Records are keyed by user id directly, so
/// enumeration walks only the online set instead of pattern-scanning a
/// whole keyspace. Expired entries are invisible to reads and swept out
/// whenever the set is enumerated.
pub struct MemoryPresence {
    ttl: Duration,
    records: RwLock<HashMap<i64, Record>>,
}

impl MemoryPresence {
    pub fn new() -> MemoryPresence {
        MemoryPresence::with_ttl(ONLINE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> MemoryPresence {
        MemoryPresence {
            ttl,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// When the user came online, if their record is still live.
    pub async fn online_since(&self, user_id: i64) -> Option<OffsetDateTime> {
        let records = self.records.read().await;
        let record = records.get(&user_id)?;
        (record.expires_at > Instant::now()).then_some(record.online_at)
    }
}

impl Default for MemoryPresence {
    fn default() -> MemoryPresence {
        MemoryPresence::new()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresence {
    async fn mark_online(&self, user_id: i64) -> PresenceResult<()> {
        let mut records = self.records.write().await;
        records.insert(
            user_id,
            Record {
                online_at: OffsetDateTime::now_utc(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn mark_offline(&self, user_id: i64) -> PresenceResult<()> {
        self.records.write().await.remove(&user_id);
        Ok(())
    }

    async fn is_online(&self, user_id: i64) -> PresenceResult<bool> {
        let records = self.records.read().await;
        Ok(records
            .get(&user_id)
            .is_some_and(|r| r.expires_at > Instant::now()))
    }

    async fn list_online(&self) -> PresenceResult<Vec<i64>> {
        let now = Instant::now();
        let mut records = self.records.write().await;
        records.retain(|_, r| r.expires_at > now);
        Ok(records.keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_record_means_offline() {
        let presence = MemoryPresence::new();
        assert!(!presence.is_online(1).await.unwrap());
        assert!(presence.list_online().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn online_then_offline() {
        let presence = MemoryPresence::new();
        presence.mark_online(1).await.unwrap();
        assert!(presence.is_online(1).await.unwrap());
        assert_eq!(presence.list_online().await.unwrap(), vec![1]);

        presence.mark_offline(1).await.unwrap();
        assert!(!presence.is_online(1).await.unwrap());
        assert!(presence.list_online().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_offline_is_idempotent() {
        let presence = MemoryPresence::new();
        presence.mark_offline(1).await.unwrap();
        presence.mark_online(1).await.unwrap();
        presence.mark_offline(1).await.unwrap();
        presence.mark_offline(1).await.unwrap();
        assert!(!presence.is_online(1).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn record_expires_after_ttl() {
        let presence = MemoryPresence::new();
        presence.mark_online(1).await.unwrap();

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(presence.is_online(1).await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!presence.is_online(1).await.unwrap());
        assert!(presence.list_online().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_mark_online_resets_ttl_without_duplicates() {
        let presence = MemoryPresence::new();
        presence.mark_online(1).await.unwrap();

        tokio::time::advance(Duration::from_secs(200)).await;
        presence.mark_online(1).await.unwrap();
        assert_eq!(presence.list_online().await.unwrap(), vec![1]);

        // Would have expired by now under the original TTL.
        tokio::time::advance(Duration::from_secs(200)).await;
        assert!(presence.is_online(1).await.unwrap());

        tokio::time::advance(Duration::from_secs(101)).await;
        assert!(!presence.is_online(1).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn list_never_contains_expired_ids() {
        let presence = MemoryPresence::with_ttl(Duration::from_secs(10));
        presence.mark_online(1).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        presence.mark_online(2).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        // 1 has lapsed, 2 is still inside its window.
        let online = presence.list_online().await.unwrap();
        assert_eq!(online, vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn online_since_survives_refresh_tracking() {
        let presence = MemoryPresence::new();
        presence.mark_online(1).await.unwrap();
        let first = presence.online_since(1).await.unwrap();
        assert!(first <= OffsetDateTime::now_utc());

        tokio::time::advance(ONLINE_TTL).await;
        assert!(presence.online_since(1).await.is_none());
    }
}
