use sqlx::SqlitePool;
use time::OffsetDateTime;

use super::StoreResult;

/// Account row. Owned by the external accounts subsystem; the chat core
/// reads it to resolve tokens and attribute messages.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub mobile: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub created_at: OffsetDateTime,
}

pub async fn create_user(pool: &SqlitePool, username: &str, mobile: &str) -> StoreResult<User> {
    let user = sqlx::query_as(
        "INSERT INTO users (username, mobile, created_at) VALUES (?, ?, ?) \
         RETURNING id, username, mobile, is_active, is_staff, created_at",
    )
    .bind(username)
    .bind(mobile)
    .bind(OffsetDateTime::now_utc())
    .fetch_one(pool)
    .await?;

    Ok(user)
}

pub async fn user(pool: &SqlitePool, id: i64) -> StoreResult<Option<User>> {
    let user = sqlx::query_as(
        "SELECT id, username, mobile, is_active, is_staff, created_at FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(user)
}
