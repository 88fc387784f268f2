use sqlx::SqlitePool;
use time::OffsetDateTime;

use super::{StoreError, StoreResult};

/// A direct (two-party) or named group room. `direct_key` is the unordered
/// user-id pair `"lo:hi"`; its UNIQUE index is what stops two racing
/// creation requests from producing duplicate direct rooms.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Chat {
    pub id: i64,
    pub name: Option<String>,
    pub is_group: bool,
    pub direct_key: Option<String>,
    pub created_at: OffsetDateTime,
}

/// One row of a user's chat list, shaped the way the listing boundary
/// serves it: member count plus a preview of the newest message.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChatSummary {
    pub id: i64,
    pub name: Option<String>,
    pub is_group: bool,
    pub created_at: OffsetDateTime,
    pub members_count: i64,
    pub last_message: Option<String>,
    pub last_sender: Option<String>,
}

fn direct_key(a: i64, b: i64) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

pub async fn chat(pool: &SqlitePool, id: i64) -> StoreResult<Option<Chat>> {
    let chat = sqlx::query_as("SELECT id, name, is_group, direct_key, created_at FROM chats WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(chat)
}

/// Membership test, re-evaluated on every connection attempt. Open sessions
/// are not re-checked; a removal only takes effect for new connections.
pub async fn is_member(pool: &SqlitePool, chat_id: i64, user_id: i64) -> StoreResult<bool> {
    let row = sqlx::query("SELECT 1 FROM chat_members WHERE chat_id = ? AND user_id = ?")
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.is_some())
}

pub async fn member_ids(pool: &SqlitePool, chat_id: i64) -> StoreResult<Vec<i64>> {
    let ids = sqlx::query_scalar("SELECT user_id FROM chat_members WHERE chat_id = ? ORDER BY user_id")
        .bind(chat_id)
        .fetch_all(pool)
        .await?;

    Ok(ids)
}

/// Returns the direct chat between `a` and `b`, creating it if absent.
/// The bool is true when this call created the row.
pub async fn find_or_create_direct(pool: &SqlitePool, a: i64, b: i64) -> StoreResult<(Chat, bool)> {
    if a == b {
        return Err(StoreError::InvalidOperation(
            "a direct chat needs two distinct users".to_owned(),
        ));
    }
    let key = direct_key(a, b);

    let mut tx = pool.begin().await?;
    let existing: Option<Chat> = sqlx::query_as(
        "SELECT id, name, is_group, direct_key, created_at FROM chats WHERE direct_key = ?",
    )
    .bind(&key)
    .fetch_optional(&mut *tx)
    .await?;
    if let Some(chat) = existing {
        return Ok((chat, false));
    }

    let inserted: Result<Chat, sqlx::Error> = sqlx::query_as(
        "INSERT INTO chats (is_group, direct_key, created_at) VALUES (FALSE, ?, ?) \
         RETURNING id, name, is_group, direct_key, created_at",
    )
    .bind(&key)
    .bind(OffsetDateTime::now_utc())
    .fetch_one(&mut *tx)
    .await;

    match inserted {
        Ok(chat) => {
            for user_id in [a, b] {
                sqlx::query("INSERT INTO chat_members (chat_id, user_id) VALUES (?, ?)")
                    .bind(chat.id)
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            Ok((chat, true))
        }
        // Lost the creation race on the direct_key index; hand back the winner's row.
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            drop(tx);
            let chat = sqlx::query_as(
                "SELECT id, name, is_group, direct_key, created_at FROM chats WHERE direct_key = ?",
            )
            .bind(&key)
            .fetch_one(pool)
            .await?;
            Ok((chat, false))
        }
        Err(e) => Err(e.into()),
    }
}

/// Creates a named group with the creator plus `members` (deduplicated).
pub async fn create_group(
    pool: &SqlitePool,
    name: &str,
    creator_id: i64,
    members: &[i64],
) -> StoreResult<Chat> {
    if name.is_empty() {
        return Err(StoreError::InvalidOperation("a group chat needs a name".to_owned()));
    }
    if members.is_empty() {
        return Err(StoreError::InvalidOperation(
            "a group chat needs at least one other member".to_owned(),
        ));
    }

    let mut tx = pool.begin().await?;
    let chat: Chat = sqlx::query_as(
        "INSERT INTO chats (name, is_group, created_at) VALUES (?, TRUE, ?) \
         RETURNING id, name, is_group, direct_key, created_at",
    )
    .bind(name)
    .bind(OffsetDateTime::now_utc())
    .fetch_one(&mut *tx)
    .await?;

    for user_id in members.iter().chain(std::iter::once(&creator_id)) {
        sqlx::query("INSERT OR IGNORE INTO chat_members (chat_id, user_id) VALUES (?, ?)")
            .bind(chat.id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    Ok(chat)
}

pub async fn add_member(pool: &SqlitePool, chat_id: i64, user_id: i64) -> StoreResult<bool> {
    let result = sqlx::query("INSERT OR IGNORE INTO chat_members (chat_id, user_id) VALUES (?, ?)")
        .bind(chat_id)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn remove_member(pool: &SqlitePool, chat_id: i64, user_id: i64) -> StoreResult<bool> {
    let result = sqlx::query("DELETE FROM chat_members WHERE chat_id = ? AND user_id = ?")
        .bind(chat_id)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn chats_for_user(pool: &SqlitePool, user_id: i64) -> StoreResult<Vec<ChatSummary>> {
    let chats = sqlx::query_as(
        "SELECT c.id, c.name, c.is_group, c.created_at, \
            (SELECT COUNT(*) FROM chat_members m WHERE m.chat_id = c.id) AS members_count, \
            (SELECT msg.content FROM messages msg WHERE msg.chat_id = c.id \
                ORDER BY msg.created_at DESC, msg.id DESC LIMIT 1) AS last_message, \
            (SELECT u.username FROM messages msg JOIN users u ON u.id = msg.sender_id \
                WHERE msg.chat_id = c.id ORDER BY msg.created_at DESC, msg.id DESC LIMIT 1) AS last_sender \
         FROM chats c JOIN chat_members cm ON cm.chat_id = c.id \
         WHERE cm.user_id = ? ORDER BY c.id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(chats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{messages, test_pool, users};

    async fn two_users(pool: &SqlitePool) -> (i64, i64) {
        let a = users::create_user(pool, "ana", "09120000010").await.unwrap();
        let b = users::create_user(pool, "bijan", "09120000011").await.unwrap();
        (a.id, b.id)
    }

    #[tokio::test]
    async fn direct_chat_created_once_per_pair() {
        let pool = test_pool().await;
        let (a, b) = two_users(&pool).await;

        let (first, created) = find_or_create_direct(&pool, a, b).await.unwrap();
        assert!(created);
        assert!(!first.is_group);
        assert_eq!(first.name, None);

        let (second, created) = find_or_create_direct(&pool, a, b).await.unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);

        // The pair is unordered.
        let (swapped, created) = find_or_create_direct(&pool, b, a).await.unwrap();
        assert!(!created);
        assert_eq!(swapped.id, first.id);

        let ids = member_ids(&pool, first.id).await.unwrap();
        assert_eq!(ids, vec![a.min(b), a.max(b)]);
    }

    #[tokio::test]
    async fn direct_chat_rejects_self() {
        let pool = test_pool().await;
        let (a, _) = two_users(&pool).await;
        let err = find_or_create_direct(&pool, a, a).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn group_chat_includes_creator_and_dedups() {
        let pool = test_pool().await;
        let (a, b) = two_users(&pool).await;

        let chat = create_group(&pool, "weekend plans", a, &[b, b, a]).await.unwrap();
        assert!(chat.is_group);
        assert_eq!(chat.name.as_deref(), Some("weekend plans"));
        assert_eq!(member_ids(&pool, chat.id).await.unwrap(), vec![a.min(b), a.max(b)]);
    }

    #[tokio::test]
    async fn group_chat_requires_name_and_members() {
        let pool = test_pool().await;
        let (a, b) = two_users(&pool).await;

        assert!(matches!(
            create_group(&pool, "", a, &[b]).await.unwrap_err(),
            StoreError::InvalidOperation(_)
        ));
        assert!(matches!(
            create_group(&pool, "empty", a, &[]).await.unwrap_err(),
            StoreError::InvalidOperation(_)
        ));
    }

    #[tokio::test]
    async fn membership_checks() {
        let pool = test_pool().await;
        let (a, b) = two_users(&pool).await;
        let outsider = users::create_user(&pool, "cyrus", "09120000012").await.unwrap();

        let (chat, _) = find_or_create_direct(&pool, a, b).await.unwrap();
        assert!(is_member(&pool, chat.id, a).await.unwrap());
        assert!(is_member(&pool, chat.id, b).await.unwrap());
        assert!(!is_member(&pool, chat.id, outsider.id).await.unwrap());

        assert!(add_member(&pool, chat.id, outsider.id).await.unwrap());
        assert!(!add_member(&pool, chat.id, outsider.id).await.unwrap());
        assert!(is_member(&pool, chat.id, outsider.id).await.unwrap());

        assert!(remove_member(&pool, chat.id, outsider.id).await.unwrap());
        assert!(!remove_member(&pool, chat.id, outsider.id).await.unwrap());
        assert!(!is_member(&pool, chat.id, outsider.id).await.unwrap());
    }

    #[tokio::test]
    async fn missing_chat_is_none() {
        let pool = test_pool().await;
        assert!(chat(&pool, 7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn chat_list_carries_preview() {
        let pool = test_pool().await;
        let (a, b) = two_users(&pool).await;
        let (direct, _) = find_or_create_direct(&pool, a, b).await.unwrap();
        let group = create_group(&pool, "book club", a, &[b]).await.unwrap();

        messages::create(&pool, direct.id, a, "first").await.unwrap();
        messages::create(&pool, direct.id, b, "latest").await.unwrap();

        let list = chats_for_user(&pool, a).await.unwrap();
        assert_eq!(list.len(), 2);

        let direct_row = list.iter().find(|c| c.id == direct.id).unwrap();
        assert_eq!(direct_row.members_count, 2);
        assert_eq!(direct_row.last_message.as_deref(), Some("latest"));
        assert_eq!(direct_row.last_sender.as_deref(), Some("bijan"));

        let group_row = list.iter().find(|c| c.id == group.id).unwrap();
        assert_eq!(group_row.name.as_deref(), Some("book club"));
        assert_eq!(group_row.last_message, None);
        assert_eq!(group_row.last_sender, None);
    }
}
