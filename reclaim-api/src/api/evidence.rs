//! Evidence upload and retrieval
//!
//! Uploads take the raw file bytes as the request body with the file name,
//! MIME type and optional journal entry in the query string. Responses carry
//! a signed download URL.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use reclaim_common::db::EvidenceFile;
use reclaim_common::time;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AuthUser;
use crate::db::{evidence, journal};
use crate::db::evidence::NewEvidence;
use crate::error::{ApiError, ApiResult};
use crate::services::feature_gate::{consume, Feature};
use crate::services::storage::{sanitize_file_name, StorageService};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub file_name: String,
    pub file_type: String,
    pub journal_entry_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub journal_entry_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct EvidenceResponse {
    #[serde(flatten)]
    pub evidence: EvidenceFile,
    pub download_url: String,
}

impl EvidenceResponse {
    pub fn new(evidence: EvidenceFile, storage: &StorageService) -> Self {
        let download_url = storage.signed_url(&evidence.storage_path, time::now().timestamp());
        Self {
            evidence,
            download_url,
        }
    }
}

/// POST /api/evidence?file_name=&file_type=&journal_entry_id=
pub async fn upload_evidence(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<EvidenceResponse>)> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("file body is empty".to_string()));
    }
    if body.len() > state.max_upload_bytes {
        return Err(ApiError::BadRequest(format!(
            "file exceeds the {} byte upload limit",
            state.max_upload_bytes
        )));
    }

    let file_name = sanitize_file_name(&query.file_name);
    let file_type = query.file_type.trim().to_ascii_lowercase();
    if !file_type.contains('/') {
        return Err(ApiError::BadRequest(format!(
            "file_type must be a MIME type: {}",
            query.file_type
        )));
    }

    if let Some(entry_id) = query.journal_entry_id {
        if journal::get_entry(&state.db, user.user_id, entry_id).await?.is_none() {
            return Err(ApiError::NotFound(format!(
                "Journal entry not found: {}",
                entry_id
            )));
        }
    }

    consume(&state.db, user.user_id, user.tier(), Feature::EvidenceUploads).await?;

    let id = Uuid::new_v4();
    let storage_path = StorageService::object_path(user.user_id, id, &file_name);
    state.storage.write(&storage_path, &body).await?;

    let new = NewEvidence {
        id,
        journal_entry_id: query.journal_entry_id,
        file_name,
        file_type,
        storage_path: storage_path.clone(),
        file_size: body.len() as i64,
    };

    let row = match evidence::insert_evidence(&state.db, user.user_id, &new).await {
        Ok(row) => row,
        Err(e) => {
            if let Err(cleanup) = state.storage.delete(&storage_path).await {
                tracing::warn!(path = %storage_path, error = %cleanup, "Failed to remove orphaned upload");
            }
            return Err(e.into());
        }
    };

    tracing::info!(
        user_id = %user.user_id,
        evidence_id = %row.id,
        file_type = %row.file_type,
        file_size = row.file_size,
        "Evidence uploaded"
    );

    Ok((
        StatusCode::CREATED,
        Json(EvidenceResponse::new(row, &state.storage)),
    ))
}

/// GET /api/evidence?journal_entry_id=
pub async fn list_evidence(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<EvidenceResponse>>> {
    let rows = evidence::list_evidence(&state.db, user.user_id, query.journal_entry_id).await?;

    Ok(Json(
        rows.into_iter()
            .map(|row| EvidenceResponse::new(row, &state.storage))
            .collect(),
    ))
}

/// GET /api/evidence/:id
pub async fn get_evidence(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<EvidenceResponse>> {
    let row = evidence::get_evidence(&state.db, user.user_id, id)
        .await?
        .ok_or_else(|| not_found(id))?;

    Ok(Json(EvidenceResponse::new(row, &state.storage)))
}

/// DELETE /api/evidence/:id
///
/// Stops any in-flight transcription poller and removes the stored bytes.
pub async fn delete_evidence(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let row = evidence::delete_evidence(&state.db, user.user_id, id)
        .await?
        .ok_or_else(|| not_found(id))?;

    state.reconciler.forget(id).await;

    if let Err(e) = state.storage.delete(&row.storage_path).await {
        tracing::warn!(evidence_id = %id, error = %e, "Failed to delete stored evidence bytes");
    }

    tracing::info!(user_id = %user.user_id, evidence_id = %id, "Evidence deleted");
    Ok(StatusCode::NO_CONTENT)
}

fn not_found(id: Uuid) -> ApiError {
    ApiError::NotFound(format!("Evidence file not found: {}", id))
}

pub fn evidence_routes() -> Router<AppState> {
    Router::new()
        .route("/api/evidence", get(list_evidence).post(upload_evidence))
        .route("/api/evidence/:id", get(get_evidence).delete(delete_evidence))
}
