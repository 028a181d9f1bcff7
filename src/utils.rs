use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, SecondsFormat, Utc};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::errors::AppError;

const MIN_PASSWORD_LENGTH: usize = 8;
pub const RESET_CODE_LENGTH: usize = 8;

pub fn hash_password(password: &str) -> Result<String, AppError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AppError::bad_request(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AppError::internal(format!("failed to hash password: {err}")))
}

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, AppError> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|err| AppError::internal(format!("invalid password hash: {err}")))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Checks a password/confirmation pair before anything is hashed or written.
pub fn confirm_password(password: &str, confirm: &str) -> Result<(), AppError> {
    if password != confirm {
        return Err(AppError::PasswordMismatch);
    }
    Ok(())
}

/// Fresh opaque value handed to the user (invite token, reset hash).
pub fn new_opaque_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Only digests of opaque tokens are stored, so a leaked table cannot be replayed.
pub fn digest_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.trim().as_bytes());
    hex::encode(hasher.finalize())
}

pub fn generate_reset_code() -> String {
    (0..RESET_CODE_LENGTH)
        .map(|_| char::from(b'0' + (OsRng.next_u32() % 10) as u8))
        .collect()
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Fixed-width RFC3339 text so stored timestamps sort lexically.
pub fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}
