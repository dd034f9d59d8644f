//! AI title suggestions

use axum::{extract::State, routing::post, Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::api::{ApiJson, AuthUser};
use crate::error::{ApiError, ApiResult};
use crate::services::feature_gate::{ensure_allowed, record_feature_usage, Feature, LimitCheck};
use crate::services::title_suggester::{suggest_titles, SuggestionSource, TitleRequest};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SuggestTitleRequest {
    pub description: String,
    #[serde(default)]
    pub abuse_types: Vec<String>,
    pub incident_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct SuggestTitleResponse {
    pub titles: Vec<String>,
    pub source: SuggestionSource,
    /// Remaining uses this period after this call (`None` = unlimited)
    pub remaining: Option<i64>,
}

/// POST /api/ai/suggest-title
///
/// Fallback titles are metered like model titles: the caller still gets
/// suggestions.
pub async fn suggest_title(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(request): ApiJson<SuggestTitleRequest>,
) -> ApiResult<Json<SuggestTitleResponse>> {
    let title_request = TitleRequest {
        description: request.description,
        abuse_types: request.abuse_types,
        incident_date: request.incident_date,
    };
    title_request.validate().map_err(ApiError::BadRequest)?;

    let check = ensure_allowed(&state.db, user.user_id, user.tier(), Feature::AiTitleSuggestions).await?;

    let suggestions = suggest_titles(state.text_generator(), &title_request).await;

    record_feature_usage(&state.db, user.user_id, Feature::AiTitleSuggestions).await?;

    tracing::info!(
        user_id = %user.user_id,
        count = suggestions.titles.len(),
        source = ?suggestions.source,
        "Title suggestions generated"
    );

    Ok(Json(SuggestTitleResponse {
        titles: suggestions.titles,
        source: suggestions.source,
        remaining: remaining_after_use(&check),
    }))
}

fn remaining_after_use(check: &LimitCheck) -> Option<i64> {
    check.remaining.map(|r| (r - 1).max(0))
}

pub fn ai_routes() -> Router<AppState> {
    Router::new().route("/api/ai/suggest-title", post(suggest_title))
}
