mod common;

use anyhow::{Context, Result};
use chrono::Duration;
use sqlx::SqlitePool;
use uuid::Uuid;

use field_users::authz::RoleKind;
use field_users::errors::AppError;
use field_users::models::actor::DbActor;
use field_users::notify::{events, Notifier};
use field_users::onboarding;
use field_users::utils::{utc_now, verify_password};

use common::{context_str, insert_actor, next_dispatch, setup_db};

async fn pending_actor(pool: &SqlitePool) -> Result<DbActor> {
    let id = insert_actor(pool, RoleKind::Brigadier, None, "new.brigadier@example.com", false).await?;
    load(pool, id).await
}

async fn load(pool: &SqlitePool, id: Uuid) -> Result<DbActor> {
    let sql = format!(
        "SELECT {} FROM actors WHERE id = ?",
        field_users::models::actor::ACTOR_COLUMNS
    );
    let row = sqlx::query(&sql).bind(id.to_string()).fetch_one(pool).await?;
    Ok(field_users::db::row_parsers::db_actor_from_row(&row)?)
}

async fn token_rows(pool: &SqlitePool, actor: Uuid) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM invite_tokens WHERE actor_id = ?")
        .bind(actor.to_string())
        .fetch_one(pool)
        .await?)
}

#[tokio::test]
async fn reinvite_replaces_the_previous_token() -> Result<()> {
    let db = setup_db().await?;
    let actor = pending_actor(&db.pool).await?;
    let (notifier, mut rx) = Notifier::channel(8);
    let now = utc_now();

    let first = onboarding::invite(&db.pool, &notifier, &actor, "Petrov Ivan", "en", now).await?;
    let second = onboarding::invite(&db.pool, &notifier, &actor, "Petrov Ivan", "en", now).await?;
    assert_ne!(first.token, second.token);
    assert_eq!(token_rows(&db.pool, actor.id).await?, 1);

    let ttl = Duration::hours(24);
    let err = onboarding::activate(&db.pool, &first.token, "password123", "password123", ttl, now).await;
    assert!(matches!(err, Err(AppError::InvalidToken)));

    let activated = onboarding::activate(&db.pool, &second.token, "password123", "password123", ttl, now).await?;
    assert!(activated.is_active);
    assert_eq!(token_rows(&db.pool, actor.id).await?, 0);

    // Both issues queued an invite carrying their own token.
    let d1 = next_dispatch(&mut rx).context("first invite queued")?;
    let d2 = next_dispatch(&mut rx).context("second invite queued")?;
    assert_eq!(d1.event, events::INVITE);
    assert_eq!(context_str(&d1, "url_sign_up"), Some(first.token.clone()));
    assert_eq!(context_str(&d2, "url_sign_up"), Some(second.token.clone()));
    assert_eq!(context_str(&d2, "user").as_deref(), Some("Petrov Ivan"));
    Ok(())
}

#[tokio::test]
async fn concurrent_invites_leave_one_live_token() -> Result<()> {
    let db = setup_db().await?;
    let actor = pending_actor(&db.pool).await?;
    let (notifier, _rx) = Notifier::channel(8);
    let now = utc_now();

    let (a, b) = tokio::join!(
        onboarding::invite(&db.pool, &notifier, &actor, "X", "en", now),
        onboarding::invite(&db.pool, &notifier, &actor, "X", "en", now),
    );
    let issued: Vec<_> = [a, b].into_iter().filter_map(Result::ok).collect();
    assert!(!issued.is_empty());
    assert_eq!(token_rows(&db.pool, actor.id).await?, 1);

    let ttl = Duration::hours(24);
    let mut activated = 0;
    for token in &issued {
        if onboarding::activate(&db.pool, &token.token, "password123", "password123", ttl, now)
            .await
            .is_ok()
        {
            activated += 1;
        }
    }
    assert_eq!(activated, 1);
    Ok(())
}

#[tokio::test]
async fn token_expires_after_the_window() -> Result<()> {
    let db = setup_db().await?;
    let actor = pending_actor(&db.pool).await?;
    let (notifier, _rx) = Notifier::channel(8);
    let ttl = Duration::hours(24);
    let issued_at = utc_now();

    let token = onboarding::invite(&db.pool, &notifier, &actor, "X", "en", issued_at).await?;

    let late = issued_at + ttl + Duration::seconds(1);
    let err = onboarding::activate(&db.pool, &token.token, "password123", "password123", ttl, late).await;
    assert!(matches!(err, Err(AppError::ExpiredToken)));
    assert!(!load(&db.pool, actor.id).await?.is_active);

    let in_time = issued_at + ttl - Duration::seconds(1);
    let activated = onboarding::activate(&db.pool, &token.token, "password123", "password123", ttl, in_time).await?;
    assert!(activated.is_active);
    let hash = activated.password_hash.context("password set")?;
    assert!(verify_password("password123", &hash)?);
    Ok(())
}

#[tokio::test]
async fn failed_activation_changes_nothing() -> Result<()> {
    let db = setup_db().await?;
    let actor = pending_actor(&db.pool).await?;
    let (notifier, _rx) = Notifier::channel(8);
    let now = utc_now();
    let ttl = Duration::hours(24);

    let token = onboarding::invite(&db.pool, &notifier, &actor, "X", "en", now).await?;

    let err = onboarding::activate(&db.pool, &token.token, "password123", "password124", ttl, now).await;
    assert!(matches!(err, Err(AppError::PasswordMismatch)));

    let err = onboarding::activate(&db.pool, &token.token, "short", "short", ttl, now).await;
    assert!(matches!(err, Err(AppError::BadRequest(_))));

    let after = load(&db.pool, actor.id).await?;
    assert!(!after.is_active);
    assert!(after.password_hash.is_none());
    assert_eq!(token_rows(&db.pool, actor.id).await?, 1);

    onboarding::activate(&db.pool, &token.token, "password123", "password123", ttl, now).await?;
    Ok(())
}

#[tokio::test]
async fn reinviting_an_active_account_deactivates_it() -> Result<()> {
    let db = setup_db().await?;
    let id = insert_actor(&db.pool, RoleKind::Coordinator, None, "active@example.com", true).await?;
    let actor = load(&db.pool, id).await?;
    let (notifier, _rx) = Notifier::channel(8);

    onboarding::invite(&db.pool, &notifier, &actor, "X", "ru", utc_now()).await?;
    assert!(!load(&db.pool, id).await?.is_active);
    Ok(())
}
