#![allow(dead_code)]

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tokio::sync::mpsc;
use tower::ServiceExt; // for `oneshot`
use uuid::Uuid;

use field_users::app::{router, AppState};
use field_users::authz::RoleKind;
use field_users::config::Settings;
use field_users::jwt::JwtConfig;
use field_users::notify::{Dispatch, Notifier};
use field_users::utils::{hash_password, timestamp, utc_now};

pub const PASSWORD: &str = "password123";

/// Keeps the temp dir alive for as long as the pool is in use.
pub struct TestDb {
    pub _dir: TempDir,
    pub pool: SqlitePool,
}

pub async fn setup_db() -> Result<TestDb> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");

    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator =
        sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    Ok(TestDb { _dir: dir, pool })
}

pub async fn insert_actor(
    pool: &SqlitePool,
    role: RoleKind,
    parent: Option<Uuid>,
    email: &str,
    active: bool,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let password_hash = if active { Some(hash_password(PASSWORD)?) } else { None };

    sqlx::query(
        "INSERT INTO actors (id, email, first_name, last_name, role, parent_id, is_active, password_hash, date_joined) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(email)
    .bind("Test")
    .bind(role.as_str())
    .bind(role.as_str())
    .bind(parent.map(|p| p.to_string()))
    .bind(active)
    .bind(password_hash)
    .bind(timestamp(utc_now()))
    .execute(pool)
    .await?;

    Ok(id)
}

pub async fn grant(pool: &SqlitePool, actor: Uuid, codename: &str) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO actor_permissions (actor_id, codename) VALUES (?, ?)")
        .bind(actor.to_string())
        .bind(codename)
        .execute(pool)
        .await?;
    Ok(())
}

/// One full reporting chain: candidate <- coordinator <- brigadier <- budget owner.
#[derive(Debug, Clone, Copy)]
pub struct Chain {
    pub candidate: Uuid,
    pub coordinator: Uuid,
    pub brigadier: Uuid,
    pub budget: Uuid,
}

pub async fn seed_chain(pool: &SqlitePool, tag: &str) -> Result<Chain> {
    let candidate = insert_actor(pool, RoleKind::Candidate, None, &format!("candidate.{tag}@example.com"), true).await?;
    let coordinator = insert_actor(
        pool,
        RoleKind::Coordinator,
        Some(candidate),
        &format!("coordinator.{tag}@example.com"),
        true,
    )
    .await?;
    let brigadier = insert_actor(
        pool,
        RoleKind::Brigadier,
        Some(coordinator),
        &format!("brigadier.{tag}@example.com"),
        true,
    )
    .await?;
    let budget = insert_actor(
        pool,
        RoleKind::BudgetOwner,
        Some(brigadier),
        &format!("budget.{tag}@example.com"),
        true,
    )
    .await?;

    Ok(Chain {
        candidate,
        coordinator,
        brigadier,
        budget,
    })
}

pub fn test_settings() -> Settings {
    Settings::default()
}

pub fn test_jwt() -> JwtConfig {
    JwtConfig::new("test-secret", 1)
}

/// Router over an explicit state; the notification queue is handed back so tests can
/// read what would have been delivered.
pub fn test_app(pool: &SqlitePool) -> (Router, AppState, mpsc::Receiver<Dispatch>) {
    let (notifier, rx) = Notifier::channel(64);
    let state = AppState::new(pool.clone(), test_jwt(), test_settings(), notifier);
    (router(state.clone()), state, rx)
}

/// Token for `actor` as login would issue it, bound to the stored password hash.
pub async fn bearer(state: &AppState, actor: Uuid) -> Result<String> {
    let password_hash: Option<String> = sqlx::query_scalar("SELECT password_hash FROM actors WHERE id = ?")
        .bind(actor.to_string())
        .fetch_one(&state.pool)
        .await?;
    Ok(state.jwt.encode(actor, password_hash.as_deref())?)
}

pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let resp = app.clone().oneshot(req).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

/// Next queued dispatch, if any, without waiting.
pub fn next_dispatch(rx: &mut mpsc::Receiver<Dispatch>) -> Option<Dispatch> {
    rx.try_recv().ok()
}

pub fn context_str(dispatch: &Dispatch, key: &str) -> Option<String> {
    dispatch.context.get(key).and_then(Value::as_str).map(str::to_string)
}
