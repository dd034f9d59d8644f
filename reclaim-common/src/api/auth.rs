//! Bearer-token and signing primitives
//!
//! # Architecture
//!
//! - Clients authenticate with `Authorization: Bearer <token>`
//! - Tokens are 256-bit random values, hex encoded
//! - Only the SHA-256 hash of a token is ever stored, so a database leak
//!   does not leak usable credentials
//! - Service secrets (e.g. the storage URL signing secret) that are not
//!   configured explicitly are generated once and persisted in `settings`
//!
//! # Pure Functions
//!
//! Apart from [`load_or_initialize_secret`], everything here is a pure
//! function with no HTTP framework dependencies.

use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use thiserror::Error;

/// Authentication error types
#[derive(Debug, Clone, Error)]
pub enum ApiAuthError {
    /// Authorization header absent
    #[error("Missing Authorization header")]
    MissingToken,

    /// Header present but not `Bearer <token>`
    #[error("Malformed Authorization header")]
    MalformedHeader,

    /// Token unknown or expired
    #[error("Invalid or expired token")]
    InvalidToken,

    /// Database error loading token or secret
    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// Generate a fresh bearer token (64 hex characters)
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    to_hex(&bytes)
}

/// SHA-256 of a bearer token, as stored in `auth_tokens.token_hash`
///
/// # Examples
///
/// ```
/// use reclaim_common::api::auth::hash_token;
///
/// let hash = hash_token("secret-token");
/// assert_eq!(hash.len(), 64);
/// assert_eq!(hash, hash_token("secret-token"));
/// ```
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Extract the token from an `Authorization` header value
///
/// The scheme is matched case-insensitively; surrounding whitespace is
/// ignored.
///
/// # Examples
///
/// ```
/// use reclaim_common::api::auth::parse_bearer;
///
/// assert_eq!(parse_bearer("Bearer abc").unwrap(), "abc");
/// assert!(parse_bearer("Basic abc").is_err());
/// ```
pub fn parse_bearer(header_value: &str) -> Result<&str, ApiAuthError> {
    let value = header_value.trim();
    let (scheme, token) = value
        .split_once(char::is_whitespace)
        .ok_or(ApiAuthError::MalformedHeader)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(ApiAuthError::MalformedHeader);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(ApiAuthError::MalformedHeader);
    }

    Ok(token)
}

/// SHA-256 over `secret:payload`, hex encoded
///
/// Used for signed storage URLs.
pub fn sign_payload(secret: &str, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b":");
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compare two strings without short-circuiting on the first mismatch
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Load a service secret from `settings`, generating and storing it if absent
///
/// Concurrent first-time callers may race; `INSERT OR IGNORE` followed by a
/// re-read means every caller ends up with the same stored value.
pub async fn load_or_initialize_secret(db: &SqlitePool, key: &str) -> Result<String, ApiAuthError> {
    let existing: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(db)
            .await
            .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    if let Some(Some(value)) = existing {
        if !value.trim().is_empty() {
            return Ok(value);
        }
    }

    let generated = generate_token();
    sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(&generated)
        .execute(db)
        .await
        .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    // NULL/empty value left by an operator: overwrite it
    sqlx::query("UPDATE settings SET value = ? WHERE key = ? AND (value IS NULL OR value = '')")
        .bind(&generated)
        .bind(key)
        .execute(db)
        .await
        .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    let stored: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_one(db)
        .await
        .map_err(|e| ApiAuthError::DatabaseError(e.to_string()))?;

    stored.ok_or_else(|| ApiAuthError::DatabaseError(format!("Secret {} not stored", key)))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
