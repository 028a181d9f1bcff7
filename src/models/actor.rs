use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::RoleKind;

/// Any user of the hierarchy, as exposed to clients.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Actor {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub description: String,
    pub role: RoleKind,
    pub parent_id: Option<Uuid>,
    pub is_active: bool,
    pub is_superuser: bool,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct DbActor {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub description: String,
    pub role: RoleKind,
    pub parent_id: Option<Uuid>,
    pub is_active: bool,
    pub password_hash: Option<String>,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl DbActor {
    /// "Last First", the form used in outgoing messages.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.last_name, self.first_name).trim().to_string()
    }
}

impl From<DbActor> for Actor {
    fn from(value: DbActor) -> Self {
        Actor {
            id: value.id,
            email: value.email,
            first_name: value.first_name,
            last_name: value.last_name,
            phone_number: value.phone_number,
            description: value.description,
            is_superuser: value.role == RoleKind::SuperUser,
            role: value.role,
            parent_id: value.parent_id,
            is_active: value.is_active,
            date_joined: value.date_joined,
            last_login: value.last_login,
        }
    }
}

pub const ACTOR_COLUMNS: &str = "id, email, first_name, last_name, phone_number, description, role, parent_id, is_active, password_hash, date_joined, last_login";

#[derive(Debug, Deserialize, ToSchema)]
pub struct ActorCreateRequest {
    #[schema(example = "field.agent@example.com")]
    pub email: String,
    #[schema(example = "Ivan")]
    pub first_name: String,
    #[schema(example = "Petrov")]
    pub last_name: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Defaults to the inviting actor.
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub lang: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ActorUpdateRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct InviteAgainRequest {
    #[serde(default)]
    pub lang: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FirebaseTokenRequest {
    #[schema(example = "fcm-device-token")]
    pub token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: Actor,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TokenResponse {
    pub token: String,
}
