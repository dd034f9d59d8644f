//! Signed evidence downloads
//!
//! `GET /storage/{path}?expires=&signature=` needs no bearer token; the
//! signature is the credential.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use reclaim_common::time;
use serde::Deserialize;

use crate::db::evidence;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub signature: String,
}

/// GET /storage/*path
pub async fn download(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<SignedQuery>,
) -> ApiResult<Response> {
    state
        .storage
        .verify(&path, query.expires, &query.signature, time::now().timestamp())
        .map_err(|e| {
            tracing::debug!(path = %path, error = %e, "Rejected storage download");
            ApiError::Forbidden(e.to_string())
        })?;

    let bytes = match state.storage.read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound("Stored file not found".to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
            return Err(ApiError::Forbidden(e.to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    let content_type = evidence::file_type_for_path(&state.db, &path)
        .await?
        .unwrap_or_else(|| "application/octet-stream".to_string());

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "private, no-store".to_string()),
        ],
        bytes,
    )
        .into_response())
}

pub fn storage_routes() -> Router<AppState> {
    Router::new().route("/storage/*path", get(download))
}
