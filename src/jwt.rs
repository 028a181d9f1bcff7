use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{load_principal, Principal};
use crate::errors::AppError;
use crate::utils::digest_token;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: Arc<Vec<u8>>,
    pub exp_hours: i64,
    /// How long after the original login a token may still be refreshed.
    pub refresh_days: i64,
}

impl JwtConfig {
    pub const DEFAULT_REFRESH_DAYS: i64 = 7;

    pub fn new(secret: impl Into<Vec<u8>>, exp_hours: i64) -> Self {
        Self {
            secret: Arc::new(secret.into()),
            exp_hours,
            refresh_days: Self::DEFAULT_REFRESH_DAYS,
        }
    }

    pub fn with_refresh_days(mut self, refresh_days: i64) -> Self {
        self.refresh_days = refresh_days;
        self
    }

    pub fn from_env() -> Result<Self, AppError> {
        let secret = std::env::var("JWT_SECRET").map_err(|_| AppError::configuration("JWT_SECRET not set"))?;
        if secret.is_empty() {
            return Err(AppError::configuration("JWT_SECRET must not be empty"));
        }
        let exp_hours = std::env::var("JWT_EXP_HOURS")
            .map(|val| val.parse::<i64>())
            .unwrap_or(Ok(24))
            .map_err(|_| AppError::configuration("JWT_EXP_HOURS must be a valid integer"))?;

        let refresh_days = std::env::var("JWT_REFRESH_DAYS")
            .map(|val| val.parse::<i64>())
            .unwrap_or(Ok(Self::DEFAULT_REFRESH_DAYS))
            .map_err(|_| AppError::configuration("JWT_REFRESH_DAYS must be a valid integer"))?;

        Ok(Self::new(secret.into_bytes(), exp_hours).with_refresh_days(refresh_days))
    }

    /// Issues a token bound to the actor's current password hash.
    pub fn encode(&self, actor_id: Uuid, password_hash: Option<&str>) -> Result<String, AppError> {
        let now = Utc::now();
        self.sign(actor_id, credential_fingerprint(password_hash), now.timestamp() as usize, now)
    }

    /// Re-issues `claims` with a fresh expiry, keeping the original login time.
    /// Refused once the refresh window measured from that login has passed.
    pub fn refresh(&self, claims: &Claims, now: DateTime<Utc>) -> Result<String, AppError> {
        let refresh_deadline = claims.orig_iat as i64 + Duration::days(self.refresh_days).num_seconds();
        if now.timestamp() > refresh_deadline {
            return Err(AppError::token("refresh has expired"));
        }
        self.sign(claims.sub, claims.cred.clone(), claims.orig_iat, now)
    }

    fn sign(&self, actor_id: Uuid, cred: String, orig_iat: usize, now: DateTime<Utc>) -> Result<String, AppError> {
        let exp = now + Duration::hours(self.exp_hours);

        let claims = Claims {
            sub: actor_id,
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
            orig_iat,
            cred,
        };

        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|err| AppError::token(err.to_string()))
    }

    pub fn decode(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
            .map_err(|err| AppError::token(err.to_string()))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
    pub iat: usize,
    /// Issue time of the login this token descends from.
    pub orig_iat: usize,
    /// Fingerprint of the password hash at login; a password change invalidates the token.
    pub cred: String,
}

/// Short digest of the stored password hash.
pub fn credential_fingerprint(password_hash: Option<&str>) -> String {
    digest_token(password_hash.unwrap_or_default()).chars().take(16).collect()
}

/// Full token check: signature and expiry, then the account must still be active and hold the
/// password the token was issued against.
pub async fn authenticate(pool: &SqlitePool, jwt: &JwtConfig, token: &str) -> Result<(Claims, Principal), AppError> {
    let claims = jwt.decode(token.trim())?;

    let password_hash: Option<Option<String>> = sqlx::query_scalar("SELECT password_hash FROM actors WHERE id = ?")
        .bind(claims.sub.to_string())
        .fetch_optional(pool)
        .await?;
    let Some(password_hash) = password_hash else {
        return Err(AppError::unauthorized("account is not active"));
    };
    if credential_fingerprint(password_hash.as_deref()) != claims.cred {
        return Err(AppError::token("credentials have changed"));
    }

    let principal = load_principal(pool, claims.sub)
        .await?
        .ok_or_else(|| AppError::unauthorized("account is not active"))?;

    Ok((claims, principal))
}

/// Verified caller. A missing header is `Unauthorized`, a bad token is `Token`;
/// tokens of deleted or inactive accounts are refused.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub principal: Principal,
}

impl AuthUser {
    pub fn id(&self) -> Uuid {
        self.principal.user_id
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::unauthorized("Authorization header missing"))?;

        let (_, principal) = authenticate(&state.pool, &state.jwt, token).await?;
        Ok(AuthUser { principal })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_keeps_subject() -> Result<(), AppError> {
        let jwt = JwtConfig::new("secret", 1);
        let id = Uuid::new_v4();
        let claims = jwt.decode(&jwt.encode(id, Some("hash-a"))?)?;
        assert_eq!(claims.sub, id);
        assert_eq!(claims.cred, credential_fingerprint(Some("hash-a")));
        assert_eq!(claims.orig_iat, claims.iat);
        Ok(())
    }

    #[test]
    fn fingerprint_follows_the_password_hash() {
        assert_ne!(credential_fingerprint(Some("hash-a")), credential_fingerprint(Some("hash-b")));
        assert_eq!(credential_fingerprint(Some("hash-a")).len(), 16);
    }

    #[test]
    fn refresh_keeps_login_time_until_the_window_closes() -> Result<(), AppError> {
        let jwt = JwtConfig::new("secret", 1).with_refresh_days(7);
        let claims = jwt.decode(&jwt.encode(Uuid::new_v4(), Some("hash"))?)?;

        let refreshed = jwt.decode(&jwt.refresh(&claims, Utc::now())?)?;
        assert_eq!(refreshed.orig_iat, claims.orig_iat);
        assert_eq!(refreshed.cred, claims.cred);

        let late = Utc::now() + Duration::days(8);
        assert!(matches!(jwt.refresh(&claims, late), Err(AppError::Token(_))));
        Ok(())
    }

    #[test]
    fn foreign_signature_is_a_token_error() -> Result<(), AppError> {
        let token = JwtConfig::new("one", 1).encode(Uuid::new_v4(), None)?;
        let err = JwtConfig::new("two", 1).decode(&token);
        assert!(matches!(err, Err(AppError::Token(_))));
        Ok(())
    }
}
