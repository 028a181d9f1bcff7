use std::time::Duration;

use anyhow::Context;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::errors::AppError;

pub mod row_parsers;

/// Maps a UNIQUE constraint failure to `Conflict`; anything else stays a database error.
pub fn conflict_on_unique(err: sqlx::Error, message: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => AppError::conflict(message),
        _ => AppError::Database(err),
    }
}

pub async fn connect() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;

    SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

/// Connects and brings the schema up to date.
pub async fn init() -> anyhow::Result<SqlitePool> {
    let pool = connect().await?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    Ok(pool)
}
