//! reclaim-api library interface
//!
//! The binary in `main.rs` wires configuration into [`AppState`] and serves
//! [`build_router`]; integration tests drive the same router directly.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod pagination;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{middleware, Router};
use chrono::{DateTime, Utc};
use reclaim_common::config::TranscriptionConfig;
use reclaim_common::events::EventBus;
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::services::{StorageService, TextGenerator, TranscriptionProvider, TranscriptionReconciler};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Transcription lifecycle events for SSE subscribers
    pub event_bus: EventBus,
    pub reconciler: TranscriptionReconciler,
    /// `None` when Gemini is not configured
    pub text_generator: Option<Arc<dyn TextGenerator>>,
    pub storage: StorageService,
    pub max_upload_bytes: usize,
    pub startup_time: DateTime<Utc>,
    /// Last background error, reported by `/health`
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        storage: StorageService,
        transcription_provider: Option<Arc<dyn TranscriptionProvider>>,
        text_generator: Option<Arc<dyn TextGenerator>>,
        transcription_config: &TranscriptionConfig,
        max_upload_bytes: usize,
    ) -> Self {
        let reconciler = TranscriptionReconciler::new(
            db.clone(),
            transcription_provider,
            storage.clone(),
            event_bus.clone(),
            transcription_config,
        );

        Self {
            db,
            event_bus,
            reconciler,
            text_generator,
            storage,
            max_upload_bytes,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn text_generator(&self) -> Option<&dyn TextGenerator> {
        self.text_generator.as_deref()
    }

    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
///
/// Everything under `/api` except the tier catalogue and build info needs a
/// bearer token.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .merge(api::profile_routes())
        .merge(api::usage_routes())
        .merge(api::journal_routes())
        .merge(api::evidence_routes())
        .merge(api::transcription_routes())
        .merge(api::sse_routes())
        .merge(api::ai_routes())
        .merge(api::pattern_routes())
        .merge(api::boundary_routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth::require_auth,
        ));

    Router::new()
        .merge(api::health_routes())
        .merge(api::subscription_routes())
        .merge(api::storage_routes())
        .merge(protected)
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
