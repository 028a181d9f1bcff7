use axum::extract::State;
use axum::Json;

use crate::app::AppState;
use crate::errors::AppResult;
use crate::models::actor::Actor;
use crate::models::onboarding::{
    CheckCodeRequest, CheckCodeResponse, EmailResponse, ResetPasswordRequest, SetPasswordRequest, SignUpRequest,
    StatusResponse,
};
use crate::onboarding;
use crate::utils::utc_now;

#[utoipa::path(
    post,
    path = "/accounts/sign-up",
    tag = "Accounts",
    request_body = SignUpRequest,
    responses(
        (status = 200, description = "Account activated", body = Actor),
        (status = 400, description = "invalid_token, expired_token or password_mismatch")
    )
)]
pub async fn sign_up(
    State(state): State<AppState>,
    Json(payload): Json<SignUpRequest>,
) -> AppResult<Json<Actor>> {
    let actor = onboarding::activate(
        &state.pool,
        &payload.token,
        &payload.password,
        &payload.confirm_password,
        state.settings.invite_ttl,
        utc_now(),
    )
    .await?;
    Ok(Json(actor.into()))
}

#[utoipa::path(
    post,
    path = "/accounts/reset-pass",
    tag = "Accounts",
    request_body = ResetPasswordRequest,
    responses((status = 200, description = "Accepted, whether or not the email is known", body = StatusResponse))
)]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> AppResult<Json<StatusResponse>> {
    let locale = state.settings.select_locale(payload.lang.as_deref());
    onboarding::request_reset(&state.pool, &state.notifier, &payload.email, &locale, utc_now()).await?;
    Ok(Json(StatusResponse {
        status: "ok".to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/accounts/check-code",
    tag = "Accounts",
    request_body = CheckCodeRequest,
    responses(
        (status = 200, description = "Code accepted", body = CheckCodeResponse),
        (status = 400, description = "invalid_code")
    )
)]
pub async fn check_code(
    State(state): State<AppState>,
    Json(payload): Json<CheckCodeRequest>,
) -> AppResult<Json<CheckCodeResponse>> {
    let hash = onboarding::check_code(&state.pool, &payload.email, &payload.code).await?;
    Ok(Json(CheckCodeResponse { hash }))
}

#[utoipa::path(
    post,
    path = "/accounts/set-password",
    tag = "Accounts",
    request_body = SetPasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = EmailResponse),
        (status = 400, description = "invalid_hash or password_mismatch")
    )
)]
pub async fn set_password(
    State(state): State<AppState>,
    Json(payload): Json<SetPasswordRequest>,
) -> AppResult<Json<EmailResponse>> {
    let locale = state.settings.select_locale(payload.lang.as_deref());
    let actor = onboarding::complete_reset(
        &state.pool,
        &state.notifier,
        &payload.hash,
        &payload.password,
        &payload.confirm_password,
        &locale,
    )
    .await?;
    Ok(Json(EmailResponse { email: actor.email }))
}
