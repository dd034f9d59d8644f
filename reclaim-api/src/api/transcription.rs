//! Transcription endpoints
//!
//! Handlers only translate HTTP into [`TranscriptionReconciler`] calls; the
//! reconciler owns every status change.
//!
//! [`TranscriptionReconciler`]: crate::services::TranscriptionReconciler

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use reclaim_common::db::{EvidenceFile, TranscriptionStatus};
use serde::Serialize;
use uuid::Uuid;

use crate::api::AuthUser;
use crate::db::evidence;
use crate::error::{ApiError, ApiResult};
use crate::services::feature_gate::{ensure_allowed, record_feature_usage, Feature};
use crate::services::reconciler::{SweepReport, TranscriptionError};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct TranscriptionResponse {
    pub evidence_id: Uuid,
    pub status: Option<TranscriptionStatus>,
    pub transcription: Option<String>,
    pub job_id: Option<String>,
    pub error: Option<String>,
    pub word_count: Option<u64>,
    pub language: Option<String>,
    /// Set when this request ran a reconciliation step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile_outcome: Option<&'static str>,
}

impl TranscriptionResponse {
    fn new(row: &EvidenceFile, reconcile_outcome: Option<&'static str>) -> Self {
        let meta = &row.metadata;
        Self {
            evidence_id: row.id,
            status: row.transcription_status,
            transcription: row.transcription.clone(),
            job_id: row.transcription_job_id().map(str::to_string),
            error: meta
                .get("transcription_error")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            word_count: meta.get("word_count").and_then(|v| v.as_u64()),
            language: meta
                .get("language")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            reconcile_outcome,
        }
    }
}

/// POST /api/evidence/:id/transcription
///
/// Usage is recorded only once the provider accepted the job.
pub async fn start_transcription(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<TranscriptionResponse>)> {
    if !state.reconciler.is_configured() {
        return Err(TranscriptionError::NotConfigured.into());
    }

    ensure_allowed(&state.db, user.user_id, user.tier(), Feature::AudioTranscription).await?;

    let row = state.reconciler.start(user.user_id, id).await?;

    record_feature_usage(&state.db, user.user_id, Feature::AudioTranscription).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(TranscriptionResponse::new(&row, None)),
    ))
}

/// GET /api/evidence/:id/transcription
///
/// A `processing` row is reconciled once before answering, so clients that
/// poll this endpoint converge without waiting for the background poller.
pub async fn get_transcription(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TranscriptionResponse>> {
    let row = evidence::get_evidence(&state.db, user.user_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Evidence file not found: {}", id)))?;

    if !row.is_audio() {
        return Err(TranscriptionError::NotAudio.into());
    }

    if row.transcription_status != Some(TranscriptionStatus::Processing) {
        return Ok(Json(TranscriptionResponse::new(&row, None)));
    }

    match state.reconciler.reconcile(id).await {
        Ok(outcome) => Ok(Json(TranscriptionResponse::new(
            outcome.evidence(),
            Some(outcome.as_str()),
        ))),
        // Provider hiccup: report the stored state, the poller keeps going
        Err(TranscriptionError::Provider(e)) => {
            tracing::warn!(evidence_id = %id, error = %e, "On-demand reconcile failed");
            state
                .record_error(format!("Transcription status check failed: {}", e))
                .await;
            Ok(Json(TranscriptionResponse::new(&row, None)))
        }
        Err(e) => Err(e.into()),
    }
}

/// DELETE /api/evidence/:id/transcription
pub async fn cancel_transcription(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TranscriptionResponse>> {
    let row = state.reconciler.cancel(user.user_id, id).await?;
    Ok(Json(TranscriptionResponse::new(&row, None)))
}

/// POST /api/evidence/transcription/reconcile
///
/// Reconciles the caller's stale `processing` rows immediately instead of
/// waiting for the background sweeper.
pub async fn reconcile_stale(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<SweepReport>> {
    let report = state.reconciler.sweep_stale(Some(user.user_id)).await?;
    Ok(Json(report))
}

pub fn transcription_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/evidence/:id/transcription",
            post(start_transcription)
                .get(get_transcription)
                .delete(cancel_transcription),
        )
        .route("/api/evidence/transcription/reconcile", post(reconcile_stale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_response_reads_metadata() {
        let row = EvidenceFile {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            journal_entry_id: None,
            file_name: "note.mp3".into(),
            file_type: "audio/mpeg".into(),
            storage_path: "a/b/note.mp3".into(),
            file_size: 10,
            transcription: Some("hello there".into()),
            transcription_status: Some(TranscriptionStatus::Completed),
            metadata: json!({
                "transcription_job_id": "job-1",
                "word_count": 2,
                "language": "en"
            }),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let response = TranscriptionResponse::new(&row, Some("applied"));
        assert_eq!(response.job_id.as_deref(), Some("job-1"));
        assert_eq!(response.word_count, Some(2));
        assert_eq!(response.language.as_deref(), Some("en"));
        assert!(response.error.is_none());

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["reconcile_outcome"], "applied");
    }
}
