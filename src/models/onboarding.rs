use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Pending activation grant. `token` is only known at issue time; the store keeps a digest.
#[derive(Debug, Clone)]
pub struct InviteToken {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub token: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SignUpRequest {
    pub token: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResetPasswordRequest {
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[serde(default)]
    pub lang: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckCodeRequest {
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "04718263")]
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckCodeResponse {
    pub hash: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetPasswordRequest {
    pub hash: String,
    pub password: String,
    pub confirm_password: String,
    #[serde(default)]
    pub lang: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EmailResponse {
    pub email: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub status: String,
}
