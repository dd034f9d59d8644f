//! Pattern analysis endpoints

use axum::{
    body::Bytes,
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use reclaim_common::db::PatternAnalysisRecord;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::AuthUser;
use crate::db::{journal, patterns};
use crate::error::{ApiError, ApiResult};
use crate::services::feature_gate::{ensure_allowed, record_feature_usage, Feature};
use crate::services::pattern_analyzer::{analyze, validate_period, MIN_ENTRIES};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeRequest {
    pub period_days: Option<i64>,
}

/// An empty body selects the defaults; anything else must parse
fn parse_analyze_request(body: &[u8]) -> ApiResult<AnalyzeRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(AnalyzeRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid analysis request: {}", e)))
}

/// POST /api/patterns/analyze
///
/// Body is optional; `{"period_days": N}` picks the window (default 90).
pub async fn analyze_patterns(
    State(state): State<AppState>,
    user: AuthUser,
    body: Bytes,
) -> ApiResult<Json<PatternAnalysisRecord>> {
    let request = parse_analyze_request(&body)?;
    let period_days = validate_period(request.period_days).map_err(ApiError::BadRequest)?;

    let since = (Utc::now() - Duration::days(period_days)).date_naive();
    let entries = journal::entries_since(&state.db, user.user_id, since).await?;

    if entries.len() < MIN_ENTRIES {
        return Err(ApiError::BadRequest(format!(
            "At least {} journal entries in the last {} days are needed, found {}",
            MIN_ENTRIES,
            period_days,
            entries.len()
        )));
    }

    ensure_allowed(&state.db, user.user_id, user.tier(), Feature::PatternAnalysis).await?;

    let analysis = analyze(state.text_generator(), &entries, period_days).await;

    let statistics = serde_json::to_value(&analysis.statistics)
        .map_err(|e| ApiError::Internal(format!("Failed to encode statistics: {}", e)))?;

    let record = PatternAnalysisRecord {
        id: Uuid::new_v4(),
        user_id: user.user_id,
        period_days,
        statistics,
        insights: analysis.insights,
        insight_source: analysis.insight_source.as_str().to_string(),
        created_at: reclaim_common::time::now(),
    };

    patterns::insert_analysis(&state.db, &record).await?;
    record_feature_usage(&state.db, user.user_id, Feature::PatternAnalysis).await?;

    tracing::info!(
        user_id = %user.user_id,
        period_days,
        entries = entries.len(),
        insight_source = %record.insight_source,
        "Pattern analysis stored"
    );

    Ok(Json(record))
}

/// GET /api/patterns/latest
pub async fn latest_analysis(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<PatternAnalysisRecord>> {
    patterns::latest_analysis(&state.db, user.user_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No pattern analysis yet".to_string()))
}

pub fn pattern_routes() -> Router<AppState> {
    Router::new()
        .route("/api/patterns/analyze", post(analyze_patterns))
        .route("/api/patterns/latest", get(latest_analysis))
}
