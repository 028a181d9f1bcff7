mod common;

use anyhow::Result;
use axum::http::StatusCode;

use field_users::create_app;

use common::{send, setup_db};

#[tokio::test]
async fn health_endpoint_reports_db_ok() -> Result<()> {
    let db = setup_db().await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(db.pool.clone()).await?;

    let (status, v) = send(&app, "GET", "/api/health", None, None).await?;
    assert_eq!(status, StatusCode::OK, "health endpoint did not return 200");
    let db_ok = v.get("db_ok").and_then(|b| b.as_bool()).unwrap_or(false);
    assert!(db_ok, "expected db_ok: true, got: {}", v);
    assert_eq!(v["status"], "ok");

    Ok(())
}

#[tokio::test]
async fn closed_pool_reports_degraded() -> Result<()> {
    let db = setup_db().await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(db.pool.clone()).await?;
    db.pool.close().await;

    let (status, v) = send(&app, "GET", "/api/health", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "degraded");
    assert_eq!(v["db_ok"], false);
    assert!(v["db_error"].is_string());

    Ok(())
}
