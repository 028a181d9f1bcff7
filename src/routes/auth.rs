use axum::extract::State;
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::db::row_parsers;
use crate::errors::{AppError, AppResult};
use crate::jwt::{authenticate, AuthUser};
use crate::models::actor::{Actor, AuthResponse, DbActor, LoginRequest, TokenRequest, TokenResponse, ACTOR_COLUMNS};
use crate::utils::{normalize_email, timestamp, utc_now, verify_password};

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let sql = format!("SELECT {} FROM actors WHERE email = ? AND is_active = 1", ACTOR_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(normalize_email(&payload.email))
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;
    let db_actor = row_parsers::db_actor_from_row(&row)?;

    let password_ok = match db_actor.password_hash.as_deref() {
        Some(hash) => verify_password(&payload.password, hash)?,
        None => false,
    };
    if !password_ok {
        return Err(AppError::unauthorized("invalid credentials"));
    }

    let now = utc_now();
    sqlx::query("UPDATE actors SET last_login = ? WHERE id = ?")
        .bind(timestamp(now))
        .bind(db_actor.id.to_string())
        .execute(&state.pool)
        .await?;

    let token = state.jwt.encode(db_actor.id, db_actor.password_hash.as_deref())?;
    tracing::info!(actor_id = %db_actor.id, "login");

    let mut user: Actor = db_actor.into();
    user.last_login = Some(now);
    Ok(Json(AuthResponse { token, user }))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses(
        (status = 200, description = "Current actor", body = Actor),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer_auth" = []))
)]
pub async fn me(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Actor>> {
    let db_actor = fetch_actor_by_id(&state.pool, auth.id()).await?;
    Ok(Json(db_actor.into()))
}

#[utoipa::path(
    post,
    path = "/auth/verify",
    tag = "Auth",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Token is valid", body = TokenResponse),
        (status = 401, description = "Invalid, expired or revoked token")
    )
)]
pub async fn verify(
    State(state): State<AppState>,
    Json(payload): Json<TokenRequest>,
) -> AppResult<Json<TokenResponse>> {
    authenticate(&state.pool, &state.jwt, &payload.token).await?;
    Ok(Json(TokenResponse {
        token: payload.token.trim().to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    tag = "Auth",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Fresh token for the same login", body = TokenResponse),
        (status = 401, description = "Invalid, expired or revoked token, or refresh window closed")
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<TokenRequest>,
) -> AppResult<Json<TokenResponse>> {
    let (claims, _) = authenticate(&state.pool, &state.jwt, &payload.token).await?;
    let token = state.jwt.refresh(&claims, utc_now())?;
    tracing::debug!(actor_id = %claims.sub, "token refreshed");
    Ok(Json(TokenResponse { token }))
}

pub(crate) async fn fetch_actor_by_id(pool: &SqlitePool, actor_id: Uuid) -> AppResult<DbActor> {
    let sql = format!("SELECT {} FROM actors WHERE id = ?", ACTOR_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(actor_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("actor not found"))?;
    row_parsers::db_actor_from_row(&row)
}
