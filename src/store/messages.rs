use sqlx::SqlitePool;
use time::OffsetDateTime;

use super::StoreResult;

/// A persisted chat message. Immutable after insert except for `is_read`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub is_read: bool,
    pub created_at: OffsetDateTime,
}

/// A history row joined with the sender's username, the shape the message
/// listing boundary serves.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRecord {
    pub id: i64,
    pub content: String,
    pub sender_id: i64,
    pub sender_username: String,
    pub is_read: bool,
    pub created_at: OffsetDateTime,
}

pub async fn create(
    pool: &SqlitePool,
    chat_id: i64,
    sender_id: i64,
    content: &str,
) -> StoreResult<Message> {
    let message = sqlx::query_as(
        "INSERT INTO messages (chat_id, sender_id, content, created_at) VALUES (?, ?, ?, ?) \
         RETURNING id, chat_id, sender_id, content, is_read, created_at",
    )
    .bind(chat_id)
    .bind(sender_id)
    .bind(content)
    .bind(OffsetDateTime::now_utc())
    .fetch_one(pool)
    .await?;

    Ok(message)
}

/// All messages of a chat in creation order.
pub async fn history(pool: &SqlitePool, chat_id: i64) -> StoreResult<Vec<MessageRecord>> {
    let messages = sqlx::query_as(
        "SELECT m.id, m.content, m.sender_id, u.username AS sender_username, m.is_read, m.created_at \
         FROM messages m JOIN users u ON u.id = m.sender_id \
         WHERE m.chat_id = ? ORDER BY m.created_at, m.id",
    )
    .bind(chat_id)
    .fetch_all(pool)
    .await?;

    Ok(messages)
}

/// Flips the read flag; returns false when the message does not exist.
pub async fn mark_read(pool: &SqlitePool, message_id: i64) -> StoreResult<bool> {
    let result = sqlx::query("UPDATE messages SET is_read = TRUE WHERE id = ?")
        .bind(message_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
