//! Stored pattern analyses

use reclaim_common::db::PatternAnalysisRecord;
use reclaim_common::{time, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{parse_json, parse_timestamp, parse_uuid, to_json};

pub async fn insert_analysis(pool: &SqlitePool, record: &PatternAnalysisRecord) -> Result<()> {
    sqlx::query(
        "INSERT INTO pattern_analysis
             (id, user_id, period_days, statistics, insights, insight_source, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(record.id.to_string())
    .bind(record.user_id.to_string())
    .bind(record.period_days)
    .bind(to_json(&record.statistics, "pattern_analysis.statistics")?)
    .bind(to_json(&record.insights, "pattern_analysis.insights")?)
    .bind(&record.insight_source)
    .bind(time::to_db_timestamp(record.created_at))
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn latest_analysis(
    pool: &SqlitePool,
    user_id: Uuid,
) -> Result<Option<PatternAnalysisRecord>> {
    let row = sqlx::query(
        "SELECT id, user_id, period_days, statistics, insights, insight_source, created_at
         FROM pattern_analysis WHERE user_id = ?
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let id: String = row.get("id");
    let user_id: String = row.get("user_id");
    let statistics: String = row.get("statistics");
    let insights: String = row.get("insights");
    let created_at: String = row.get("created_at");

    Ok(Some(PatternAnalysisRecord {
        id: parse_uuid(&id, "pattern_analysis.id")?,
        user_id: parse_uuid(&user_id, "pattern_analysis.user_id")?,
        period_days: row.get("period_days"),
        statistics: parse_json(&statistics, "pattern_analysis.statistics")?,
        insights: parse_json(&insights, "pattern_analysis.insights")?,
        insight_source: row.get("insight_source"),
        created_at: parse_timestamp(&created_at)?,
    }))
}
