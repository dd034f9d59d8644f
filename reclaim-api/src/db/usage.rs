//! Feature usage ledger
//!
//! `usage_tracking` is append-only: one row per metered action, counted per
//! user, feature and billing period.

use reclaim_common::{time, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Number of recorded uses of `feature` by `user_id` in `period`
pub async fn count_usage(
    pool: &SqlitePool,
    user_id: Uuid,
    feature: &str,
    period: &str,
) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM usage_tracking
         WHERE user_id = ? AND feature = ? AND billing_period = ?",
    )
    .bind(user_id.to_string())
    .bind(feature)
    .bind(period)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Append one usage row unconditionally
pub async fn record_usage(
    pool: &SqlitePool,
    user_id: Uuid,
    feature: &str,
    period: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO usage_tracking (id, user_id, feature, billing_period, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id.to_string())
    .bind(feature)
    .bind(period)
    .bind(time::to_db_timestamp(time::now()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Append one usage row only while the period's count is below `limit`
///
/// The count and the insert run as one statement, so concurrent callers
/// cannot both take the last slot. Returns `false` when the limit was
/// already reached.
pub async fn record_usage_within_limit(
    pool: &SqlitePool,
    user_id: Uuid,
    feature: &str,
    period: &str,
    limit: i64,
) -> Result<bool> {
    let user = user_id.to_string();

    let result = sqlx::query(
        r#"
        INSERT INTO usage_tracking (id, user_id, feature, billing_period, created_at)
        SELECT ?, ?, ?, ?, ?
        WHERE (
            SELECT COUNT(*) FROM usage_tracking
            WHERE user_id = ? AND feature = ? AND billing_period = ?
        ) < ?
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&user)
    .bind(feature)
    .bind(period)
    .bind(time::to_db_timestamp(time::now()))
    .bind(&user)
    .bind(feature)
    .bind(period)
    .bind(limit)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}
