use std::collections::HashSet;

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::RoleKind;
use crate::errors::{AppError, AppResult};

/// Principal represents the authenticated actor with its effective permissions
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: RoleKind,
    pub permissions: HashSet<String>,
}

impl Principal {
    pub fn new(user_id: Uuid, role: RoleKind) -> Self {
        Self {
            user_id,
            role,
            permissions: HashSet::new(),
        }
    }

    pub fn with_permissions<S: Into<String>>(mut self, perms: impl IntoIterator<Item = S>) -> Self {
        self.permissions = perms.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    pub fn is_superuser(&self) -> bool {
        self.role == RoleKind::SuperUser
    }
}

/// Loads an active actor with the union of its role grants and direct grants.
/// Inactive or unknown actors yield `None`.
pub async fn load_principal(pool: &SqlitePool, user_id: Uuid) -> AppResult<Option<Principal>> {
    let row = sqlx::query("SELECT role, is_active FROM actors WHERE id = ?")
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let is_active: bool = row.try_get("is_active")?;
    if !is_active {
        return Ok(None);
    }

    let role_s: String = row.try_get("role")?;
    let role = RoleKind::parse(&role_s)
        .ok_or_else(|| AppError::internal(format!("unknown role kind: {role_s}")))?;

    let permissions: Vec<String> = sqlx::query_scalar(
        "SELECT codename FROM role_permissions WHERE role = ? \
         UNION \
         SELECT codename FROM actor_permissions WHERE actor_id = ?",
    )
    .bind(role.as_str())
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(Some(Principal::new(user_id, role).with_permissions(permissions)))
}
