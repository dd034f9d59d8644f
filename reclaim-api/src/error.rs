//! Error types for reclaim-api
//!
//! Every handler returns [`ApiResult`]; errors render as
//! `{"error": {"code", "message"}}` with a status code chosen per variant.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::feature_gate::LimitCheck;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Missing or invalid credentials (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Conflict (409), e.g. transcription already running
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Monthly feature allowance exhausted (429)
    #[error("Feature limit exceeded for {}", .0.feature)]
    LimitExceeded(LimitCheck),

    /// Required provider is not configured (503)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// External provider failed (502)
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// reclaim-common error
    #[error("Common error: {0}")]
    Common(#[from] reclaim_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::LimitExceeded(check) => return limit_exceeded_response(check),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg)
            }
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Database(ref err) => {
                tracing::error!(error = %err, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "Database operation failed".to_string(),
                )
            }
            ApiError::Io(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                err.to_string(),
            ),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
            ApiError::Common(reclaim_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Common(reclaim_common::Error::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
            }
            ApiError::Common(ref err) => {
                tracing::error!(error = %err, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "COMMON_ERROR",
                    err.to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

fn limit_exceeded_response(check: LimitCheck) -> Response {
    let message = match check.limit {
        Some(limit) => format!(
            "Monthly limit of {} reached for {} on the {} tier",
            limit, check.feature, check.tier
        ),
        None => format!("Limit reached for {}", check.feature),
    };

    let body = Json(json!({
        "error": {
            "code": "FEATURE_LIMIT_EXCEEDED",
            "message": message,
        },
        "feature": check.feature,
        "current_usage": check.current_usage,
        "limit": check.limit,
        "tier": check.tier,
        "upgrade_required": check.upgrade_required,
        "suggested_tier": check.suggested_tier,
    }));

    (StatusCode::TOO_MANY_REQUESTS, body).into_response()
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
