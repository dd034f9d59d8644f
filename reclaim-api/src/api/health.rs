//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok" or "degraded")
    pub status: String,
    /// Module name ("reclaim-api")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    pub uptime_seconds: u64,
    /// Whether Gladia transcription is available
    pub transcription_enabled: bool,
    /// Whether Gemini text generation is available
    pub ai_enabled: bool,
    /// Last background error, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
///
/// Reports "degraded" when the database cannot be reached.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let db_ok = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();
    let last_error = state.last_error.read().await.clone();

    Json(HealthResponse {
        status: if db_ok { "ok" } else { "degraded" }.to_string(),
        module: "reclaim-api".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        transcription_enabled: state.reconciler.is_configured(),
        ai_enabled: state.text_generator.is_some(),
        last_error,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/buildinfo", get(super::get_build_info))
}
