//! Account activation and password reset lifecycles.
//!
//! Invite: `NoToken -> Issued -> Consumed | Expired`. Reset: `Requested -> CodeChecked -> Completed`.
//! Each actor owns at most one row of each kind (`UNIQUE(actor_id)`), so issuing is an upsert and two
//! concurrent issues for the same actor leave exactly one live token.

use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::context;
use crate::db::row_parsers::{db_actor_from_row, parse_datetime, parse_uuid};
use crate::errors::{AppError, AppResult};
use crate::models::actor::{DbActor, ACTOR_COLUMNS};
use crate::models::onboarding::InviteToken;
use crate::notify::{events, Dispatch, Notifier};
use crate::utils::{
    confirm_password, digest_token, generate_reset_code, hash_password, new_opaque_token, normalize_email,
    timestamp,
};

pub(crate) async fn load_actor(tx: &mut Transaction<'_, Sqlite>, id: Uuid) -> AppResult<DbActor> {
    let sql = format!("SELECT {} FROM actors WHERE id = ?", ACTOR_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_one(&mut **tx)
        .await?;
    db_actor_from_row(&row)
}

/// Issues a fresh invite for `actor`, replacing any earlier one, and queues the invite email.
/// The actor stays inactive until the token is consumed.
pub async fn invite(
    pool: &SqlitePool,
    notifier: &Notifier,
    actor: &DbActor,
    inviter_name: &str,
    locale: &str,
    now: DateTime<Utc>,
) -> AppResult<InviteToken> {
    let mut tx = pool.begin().await?;
    let token = issue_invite(&mut tx, actor.id, now).await?;
    tx.commit().await?;

    send_invite(notifier, &token, inviter_name, locale);
    Ok(token)
}

/// Deactivates the actor and upserts its invite row inside the caller's transaction.
/// Nothing is queued; call [`send_invite`] once the transaction has committed.
pub async fn issue_invite(
    tx: &mut Transaction<'_, Sqlite>,
    actor_id: Uuid,
    now: DateTime<Utc>,
) -> AppResult<InviteToken> {
    let token = InviteToken {
        id: Uuid::new_v4(),
        actor_id,
        token: new_opaque_token(),
        issued_at: now,
    };

    sqlx::query("UPDATE actors SET is_active = 0 WHERE id = ?")
        .bind(actor_id.to_string())
        .execute(&mut **tx)
        .await?;

    sqlx::query(
        "INSERT INTO invite_tokens (id, actor_id, token_digest, issued_at, is_active) VALUES (?, ?, ?, ?, 1) \
         ON CONFLICT(actor_id) DO UPDATE SET id = excluded.id, token_digest = excluded.token_digest, \
         issued_at = excluded.issued_at, is_active = 1",
    )
    .bind(token.id.to_string())
    .bind(actor_id.to_string())
    .bind(digest_token(&token.token))
    .bind(timestamp(now))
    .execute(&mut **tx)
    .await?;

    Ok(token)
}

pub fn send_invite(notifier: &Notifier, token: &InviteToken, inviter_name: &str, locale: &str) {
    tracing::info!(actor_id = %token.actor_id, "invite issued");
    notifier.dispatch(Dispatch::email(
        token.actor_id,
        events::INVITE,
        locale,
        context! { "user" => inviter_name, "url_sign_up" => token.token.as_str() },
    ));
}

/// Consumes an invite token: sets the password, activates the actor and deletes the token, atomically.
pub async fn activate(
    pool: &SqlitePool,
    token: &str,
    password: &str,
    confirm: &str,
    ttl: Duration,
    now: DateTime<Utc>,
) -> AppResult<DbActor> {
    confirm_password(password, confirm)?;

    let mut tx = pool.begin().await?;

    let row = sqlx::query("SELECT id, actor_id, issued_at FROM invite_tokens WHERE token_digest = ? AND is_active = 1")
        .bind(digest_token(token))
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::InvalidToken)?;

    let token_id: String = row.try_get("id")?;
    let actor_id = parse_uuid(&row.try_get::<String, _>("actor_id")?)?;
    let issued_at = parse_datetime(&row.try_get::<String, _>("issued_at")?)?;

    if now > issued_at + ttl {
        tracing::info!(actor_id = %actor_id, "expired invite token presented");
        return Err(AppError::ExpiredToken);
    }

    let password_hash = hash_password(password)?;

    sqlx::query("UPDATE actors SET password_hash = ?, is_active = 1 WHERE id = ?")
        .bind(&password_hash)
        .bind(actor_id.to_string())
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM invite_tokens WHERE id = ?")
        .bind(&token_id)
        .execute(&mut *tx)
        .await?;

    let actor = load_actor(&mut tx, actor_id).await?;
    tx.commit().await?;

    tracing::info!(actor_id = %actor_id, "account activated");
    Ok(actor)
}

/// Starts a reset for the active account behind `email`. Succeeds identically when no such account exists.
pub async fn request_reset(
    pool: &SqlitePool,
    notifier: &Notifier,
    email: &str,
    locale: &str,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let actor_id: Option<String> = sqlx::query_scalar("SELECT id FROM actors WHERE email = ? AND is_active = 1")
        .bind(normalize_email(email))
        .fetch_optional(pool)
        .await?;

    let Some(actor_id) = actor_id else {
        tracing::debug!("password reset requested for unknown email");
        return Ok(());
    };
    let actor_id = parse_uuid(&actor_id)?;
    let code = generate_reset_code();

    sqlx::query(
        "INSERT INTO password_resets (id, actor_id, code, hash_digest, is_active, created_at) VALUES (?, ?, ?, ?, 1, ?) \
         ON CONFLICT(actor_id) DO UPDATE SET id = excluded.id, code = excluded.code, \
         hash_digest = excluded.hash_digest, is_active = 1, created_at = excluded.created_at",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(actor_id.to_string())
    .bind(&code)
    .bind(digest_token(&new_opaque_token()))
    .bind(timestamp(now))
    .execute(pool)
    .await?;

    tracing::info!(actor_id = %actor_id, "password reset requested");
    notifier.dispatch(Dispatch::email(
        actor_id,
        events::PASSWORD_RESET,
        locale,
        context! { "code" => code.as_str() },
    ));

    Ok(())
}

/// Exchanges the emailed code for an opaque hash. Each successful check mints a new hash and
/// invalidates the one returned before; the request itself stays open.
pub async fn check_code(pool: &SqlitePool, email: &str, code: &str) -> AppResult<String> {
    let row = sqlx::query(
        "SELECT r.id, r.code FROM password_resets r JOIN actors a ON a.id = r.actor_id \
         WHERE a.email = ? AND r.is_active = 1",
    )
    .bind(normalize_email(email))
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::InvalidCode)?;

    let request_id: String = row.try_get("id")?;
    let stored_code: String = row.try_get("code")?;
    if digest_token(&stored_code) != digest_token(code) {
        return Err(AppError::InvalidCode);
    }

    let hash = new_opaque_token();
    sqlx::query("UPDATE password_resets SET hash_digest = ? WHERE id = ? AND is_active = 1")
        .bind(digest_token(&hash))
        .bind(&request_id)
        .execute(pool)
        .await?;

    Ok(hash)
}

/// Sets the new password for the request behind `hash` and deletes the request, atomically.
pub async fn complete_reset(
    pool: &SqlitePool,
    notifier: &Notifier,
    hash: &str,
    password: &str,
    confirm: &str,
    locale: &str,
) -> AppResult<DbActor> {
    confirm_password(password, confirm)?;

    let mut tx = pool.begin().await?;

    let row = sqlx::query("SELECT id, actor_id FROM password_resets WHERE hash_digest = ? AND is_active = 1")
        .bind(digest_token(hash))
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::InvalidHash)?;

    let request_id: String = row.try_get("id")?;
    let actor_id = parse_uuid(&row.try_get::<String, _>("actor_id")?)?;
    let password_hash = hash_password(password)?;

    sqlx::query("UPDATE actors SET password_hash = ? WHERE id = ?")
        .bind(&password_hash)
        .bind(actor_id.to_string())
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM password_resets WHERE id = ?")
        .bind(&request_id)
        .execute(&mut *tx)
        .await?;

    let actor = load_actor(&mut tx, actor_id).await?;
    tx.commit().await?;

    tracing::info!(actor_id = %actor_id, "password reset completed");
    notifier.dispatch(Dispatch::email(
        actor_id,
        events::PASSWORD_RESET_COMPLETE,
        locale,
        context! { "user" => actor.full_name() },
    ));

    Ok(actor)
}
