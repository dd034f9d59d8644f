//! Bearer token persistence
//!
//! Only token hashes are stored; the plaintext is returned once at issue.

use chrono::{DateTime, Duration, Utc};
use reclaim_common::api::{generate_token, hash_token};
use reclaim_common::{time, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::parse_uuid;

/// Issue a new token for `user_id`, valid for `ttl` (or forever)
///
/// Returns the plaintext token.
pub async fn issue_token(pool: &SqlitePool, user_id: Uuid, ttl: Option<Duration>) -> Result<String> {
    let token = generate_token();
    let now = time::now();
    let expires_at = ttl.map(|ttl| time::to_db_timestamp(now + ttl));

    sqlx::query(
        "INSERT INTO auth_tokens (token_hash, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
    )
    .bind(hash_token(&token))
    .bind(user_id.to_string())
    .bind(time::to_db_timestamp(now))
    .bind(expires_at)
    .execute(pool)
    .await?;

    tracing::info!(user_id = %user_id, expires = ttl.is_some(), "Issued bearer token");
    Ok(token)
}

/// Owner of a plaintext token, if the token is known and unexpired at `now`
pub async fn find_user_for_token(
    pool: &SqlitePool,
    token: &str,
    now: DateTime<Utc>,
) -> Result<Option<Uuid>> {
    let user_id: Option<String> = sqlx::query_scalar(
        "SELECT user_id FROM auth_tokens
         WHERE token_hash = ? AND (expires_at IS NULL OR expires_at > ?)",
    )
    .bind(hash_token(token))
    .bind(time::to_db_timestamp(now))
    .fetch_optional(pool)
    .await?;

    user_id
        .map(|id| parse_uuid(&id, "auth_tokens.user_id"))
        .transpose()
}

/// Delete every token of a user; returns how many were removed
pub async fn revoke_all(pool: &SqlitePool, user_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM auth_tokens WHERE user_id = ?")
        .bind(user_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
