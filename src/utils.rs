use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use rand_core::{OsRng, RngCore};

use crate::errors::AppError;

const MIN_PASSWORD_LENGTH: usize = 8;
const INVITE_TOKEN_BYTES: usize = 32;
const DEFAULT_INVITE_TTL_HOURS: i64 = 48;

pub fn hash_password(password: &str) -> Result<String, AppError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AppError::validation(format!(
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

pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// 32 random bytes, hex encoded.
pub fn generate_invite_token() -> String {
    let mut bytes = [0u8; INVITE_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Lifetime of a pending invite, from `INVITE_TTL_HOURS`.
pub fn invite_ttl() -> Result<Duration, AppError> {
    let hours = std::env::var("INVITE_TTL_HOURS")
        .map(|val| val.parse::<i64>())
        .unwrap_or(Ok(DEFAULT_INVITE_TTL_HOURS))
        .map_err(|_| AppError::configuration("INVITE_TTL_HOURS must be a valid integer"))?;

    Ok(Duration::hours(hours))
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Trims and rejects blank required text fields.
pub fn required_text(value: &str, field: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}
