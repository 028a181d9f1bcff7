//! Per-actor notification log, device tokens and the unread counter.

use sqlx::SqlitePool;
use uuid::Uuid;

use super::templates::Template;
use crate::db::row_parsers::notification_from_row;
use crate::errors::AppResult;
use crate::models::notification::Notification;
use crate::utils::{timestamp, utc_now};

pub async fn record(pool: &SqlitePool, actor_id: Uuid, event: &str, message: &Template) -> AppResult<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO notifications (id, actor_id, event, title, text, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(actor_id.to_string())
    .bind(event)
    .bind(message.title.as_deref().unwrap_or_default())
    .bind(&message.text)
    .bind(timestamp(utc_now()))
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn device_token(pool: &SqlitePool, actor_id: Uuid) -> AppResult<Option<String>> {
    Ok(sqlx::query_scalar("SELECT token FROM firebase_tokens WHERE actor_id = ?")
        .bind(actor_id.to_string())
        .fetch_optional(pool)
        .await?)
}

/// Replaces the actor's device token.
pub async fn set_device_token(pool: &SqlitePool, actor_id: Uuid, token: &str) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO firebase_tokens (actor_id, token, created_at) VALUES (?, ?, ?) \
         ON CONFLICT(actor_id) DO UPDATE SET token = excluded.token, created_at = excluded.created_at",
    )
    .bind(actor_id.to_string())
    .bind(token)
    .bind(timestamp(utc_now()))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn total(pool: &SqlitePool, actor_id: Uuid) -> AppResult<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE actor_id = ?")
        .bind(actor_id.to_string())
        .fetch_one(pool)
        .await?)
}

/// Newest first. Reading the list marks everything up to now as seen.
pub async fn list(pool: &SqlitePool, actor_id: Uuid, limit: i64, offset: i64) -> AppResult<(i64, Vec<Notification>)> {
    let rows = sqlx::query(
        "SELECT id, actor_id, event, title, text, created_at FROM notifications \
         WHERE actor_id = ? ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
    )
    .bind(actor_id.to_string())
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let items = rows.iter().map(notification_from_row).collect::<AppResult<Vec<_>>>()?;
    let count = total(pool, actor_id).await?;
    mark_seen(pool, actor_id, count).await?;
    Ok((count, items))
}

pub async fn mark_seen(pool: &SqlitePool, actor_id: Uuid, seen: i64) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO notification_counters (actor_id, seen_count) VALUES (?, ?) \
         ON CONFLICT(actor_id) DO UPDATE SET seen_count = MAX(seen_count, excluded.seen_count)",
    )
    .bind(actor_id.to_string())
    .bind(seen)
    .execute(pool)
    .await?;
    Ok(())
}

/// Notifications written since the actor last listed them. Never negative.
pub async fn unseen(pool: &SqlitePool, actor_id: Uuid) -> AppResult<i64> {
    let seen: Option<i64> = sqlx::query_scalar("SELECT seen_count FROM notification_counters WHERE actor_id = ?")
        .bind(actor_id.to_string())
        .fetch_optional(pool)
        .await?;
    let total = total(pool, actor_id).await?;
    Ok((total - seen.unwrap_or(0)).max(0))
}
