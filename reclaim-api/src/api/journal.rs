//! Journal entry endpoints
//!
//! Creating an entry is metered as `journal_entries`. Every lookup is scoped
//! to the caller, so another user's entry id answers 404.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use reclaim_common::db::JournalEntry;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{ApiJson, AuthUser};
use crate::db::journal::{self, JournalEntryPatch, NewJournalEntry};
use crate::error::{ApiError, ApiResult};
use crate::pagination::{calculate_pagination, PAGE_SIZE};
use crate::services::feature_gate::{consume, Feature};
use crate::AppState;

pub const MAX_TITLE_CHARS: usize = 200;
const MAX_ABUSE_TYPES: usize = 20;

#[derive(Debug, Deserialize)]
pub struct CreateJournalRequest {
    pub title: String,
    pub description: String,
    pub incident_date: NaiveDate,
    pub safety_rating: i64,
    #[serde(default)]
    pub abuse_types: Vec<String>,
    pub mood_before: Option<i64>,
    pub mood_after: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateJournalRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub incident_date: Option<NaiveDate>,
    pub safety_rating: Option<i64>,
    pub abuse_types: Option<Vec<String>>,
    pub mood_before: Option<i64>,
    pub mood_after: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct JournalListResponse {
    pub entries: Vec<JournalEntry>,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub total_entries: i64,
}

fn validate_title(title: &str) -> ApiResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("title is required".to_string()));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ApiError::BadRequest(format!(
            "title must be at most {} characters",
            MAX_TITLE_CHARS
        )));
    }
    Ok(title.to_string())
}

fn validate_description(description: &str) -> ApiResult<String> {
    let description = description.trim();
    if description.is_empty() {
        return Err(ApiError::BadRequest("description is required".to_string()));
    }
    Ok(description.to_string())
}

fn validate_scale(field: &str, value: i64) -> ApiResult<i64> {
    if !(1..=10).contains(&value) {
        return Err(ApiError::BadRequest(format!(
            "{} must be between 1 and 10",
            field
        )));
    }
    Ok(value)
}

/// Trimmed, non-empty, deduplicated in order
fn normalize_abuse_types(types: Vec<String>) -> ApiResult<Vec<String>> {
    let mut normalized: Vec<String> = Vec::new();
    for t in types {
        let t = t.trim().to_lowercase();
        if !t.is_empty() && !normalized.contains(&t) {
            normalized.push(t);
        }
    }
    if normalized.len() > MAX_ABUSE_TYPES {
        return Err(ApiError::BadRequest(format!(
            "at most {} abuse types are allowed",
            MAX_ABUSE_TYPES
        )));
    }
    Ok(normalized)
}

impl CreateJournalRequest {
    fn validate(self) -> ApiResult<NewJournalEntry> {
        Ok(NewJournalEntry {
            title: validate_title(&self.title)?,
            description: validate_description(&self.description)?,
            incident_date: self.incident_date,
            safety_rating: validate_scale("safety_rating", self.safety_rating)?,
            abuse_types: normalize_abuse_types(self.abuse_types)?,
            mood_before: self
                .mood_before
                .map(|m| validate_scale("mood_before", m))
                .transpose()?,
            mood_after: self
                .mood_after
                .map(|m| validate_scale("mood_after", m))
                .transpose()?,
        })
    }
}

impl UpdateJournalRequest {
    fn validate(self) -> ApiResult<JournalEntryPatch> {
        Ok(JournalEntryPatch {
            title: self.title.as_deref().map(validate_title).transpose()?,
            description: self
                .description
                .as_deref()
                .map(validate_description)
                .transpose()?,
            incident_date: self.incident_date,
            safety_rating: self
                .safety_rating
                .map(|r| validate_scale("safety_rating", r))
                .transpose()?,
            abuse_types: self.abuse_types.map(normalize_abuse_types).transpose()?,
            mood_before: self
                .mood_before
                .map(|m| validate_scale("mood_before", m))
                .transpose()?,
            mood_after: self
                .mood_after
                .map(|m| validate_scale("mood_after", m))
                .transpose()?,
        })
    }
}

/// POST /api/journal
///
/// Validation runs before metering, so rejected requests are not counted.
pub async fn create_entry(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(request): ApiJson<CreateJournalRequest>,
) -> ApiResult<(StatusCode, Json<JournalEntry>)> {
    let new_entry = request.validate()?;

    consume(&state.db, user.user_id, user.tier(), Feature::JournalEntries).await?;

    let entry = journal::insert_entry(&state.db, user.user_id, &new_entry).await?;

    tracing::info!(
        user_id = %user.user_id,
        entry_id = %entry.id,
        "Journal entry created"
    );

    Ok((StatusCode::CREATED, Json(entry)))
}

/// GET /api/journal?page=N
pub async fn list_entries(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<JournalListResponse>> {
    let total_entries = journal::count_entries(&state.db, user.user_id).await?;
    let pagination = calculate_pagination(total_entries, query.page.unwrap_or(1));

    let entries =
        journal::list_entries(&state.db, user.user_id, PAGE_SIZE, pagination.offset).await?;

    Ok(Json(JournalListResponse {
        entries,
        page: pagination.page,
        page_size: PAGE_SIZE,
        total_pages: pagination.total_pages,
        total_entries,
    }))
}

/// GET /api/journal/:id
pub async fn get_entry(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JournalEntry>> {
    journal::get_entry(&state.db, user.user_id, id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(id))
}

/// PATCH /api/journal/:id
pub async fn update_entry(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    ApiJson(request): ApiJson<UpdateJournalRequest>,
) -> ApiResult<Json<JournalEntry>> {
    let patch = request.validate()?;

    journal::update_entry(&state.db, user.user_id, id, patch)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(id))
}

/// DELETE /api/journal/:id
///
/// Evidence attached to the entry is kept and detached.
pub async fn delete_entry(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if !journal::delete_entry(&state.db, user.user_id, id).await? {
        return Err(not_found(id));
    }

    tracing::info!(user_id = %user.user_id, entry_id = %id, "Journal entry deleted");
    Ok(StatusCode::NO_CONTENT)
}

fn not_found(id: Uuid) -> ApiError {
    ApiError::NotFound(format!("Journal entry not found: {}", id))
}

pub fn journal_routes() -> Router<AppState> {
    Router::new()
        .route("/api/journal", get(list_entries).post(create_entry))
        .route(
            "/api/journal/:id",
            get(get_entry).patch(update_entry).delete(delete_entry),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_request() -> CreateJournalRequest {
        CreateJournalRequest {
            title: "  Argument at dinner ".into(),
            description: "Raised voice, threw a plate".into(),
            incident_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            safety_rating: 4,
            abuse_types: vec!["Verbal".into(), "verbal".into(), " ".into(), "physical".into()],
            mood_before: Some(6),
            mood_after: None,
        }
    }

    #[test]
    fn test_create_validation_normalizes() {
        let entry = create_request().validate().unwrap();
        assert_eq!(entry.title, "Argument at dinner");
        assert_eq!(entry.abuse_types, vec!["verbal", "physical"]);
    }

    #[test]
    fn test_create_validation_rejects_bad_values() {
        let mut req = create_request();
        req.safety_rating = 11;
        assert!(req.validate().is_err());

        let mut req = create_request();
        req.title = "x".repeat(MAX_TITLE_CHARS + 1);
        assert!(req.validate().is_err());

        let mut req = create_request();
        req.description = "   ".into();
        assert!(req.validate().is_err());

        let mut req = create_request();
        req.mood_after = Some(0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_update_validation_only_checks_present_fields() {
        let patch = UpdateJournalRequest {
            safety_rating: Some(2),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(patch.safety_rating, Some(2));
        assert!(patch.title.is_none());

        let err = UpdateJournalRequest {
            title: Some("".into()),
            ..Default::default()
        }
        .validate();
        assert!(err.is_err());
    }
}
