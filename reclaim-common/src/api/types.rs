//! Shared API request/response types

use serde::{Deserialize, Serialize};

/// Standard JSON error envelope
///
/// # Examples
///
/// ```
/// use reclaim_common::api::types::ErrorResponse;
///
/// let body = ErrorResponse::new("NOT_FOUND", "Journal entry not found");
/// let json = serde_json::to_value(&body).unwrap();
/// assert_eq!(json["error"]["code"], "NOT_FOUND");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g. "UNAUTHORIZED")
    pub code: String,
    /// Human-readable message
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}
