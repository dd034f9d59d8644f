//! Shared fixtures for reclaim-api integration tests
//!
//! Each test gets its own temporary SQLite database and storage root.
//! External providers are replaced by in-process fakes.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use reclaim_api::db::{profiles, tokens};
use reclaim_api::services::{
    GeminiError, GladiaError, StorageService, SubmittedJob, TextGenerator, TranscriptionProvider,
};
use reclaim_api::AppState;
use reclaim_common::config::TranscriptionConfig;
use reclaim_common::db::{init_database, SubscriptionTier};
use reclaim_common::events::EventBus;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const TEST_SECRET: &str = "test-signing-secret";
pub const TEST_BASE_URL: &str = "http://reclaim.test";

/// Scripted transcription provider
///
/// `fetch_status` pops scripted payloads in order and repeats the last one
/// once the script is exhausted.
#[derive(Default)]
pub struct FakeProvider {
    pub submissions: Mutex<Vec<String>>,
    pub status_calls: AtomicUsize,
    pub fail_submit: bool,
    script: Mutex<VecDeque<Value>>,
    last: Mutex<Option<Value>>,
}

impl FakeProvider {
    pub fn with_script(script: Vec<Value>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    pub fn failing_submit() -> Self {
        Self {
            fail_submit: true,
            ..Default::default()
        }
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }
}

#[async_trait]
impl TranscriptionProvider for FakeProvider {
    async fn submit(&self, audio_url: &str) -> Result<SubmittedJob, GladiaError> {
        if self.fail_submit {
            return Err(GladiaError::ApiError(500, "provider down".into()));
        }
        let mut submissions = self.submissions.lock().unwrap();
        submissions.push(audio_url.to_string());
        Ok(SubmittedJob {
            id: format!("job-{}", submissions.len()),
            result_url: None,
        })
    }

    async fn fetch_status(&self, _job_id: &str) -> Result<Value, GladiaError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(payload) = next {
            *last = Some(payload);
        }
        Ok(last.clone().unwrap_or_else(|| json!({"status": "processing"})))
    }
}

pub fn done_payload(text: &str) -> Value {
    json!({
        "status": "done",
        "result": {
            "metadata": {"audio_duration": 12.5},
            "transcription": {
                "full_transcript": text,
                "languages": ["en"]
            }
        }
    })
}

/// Text generator returning a fixed response, or failing
pub struct FakeGenerator {
    pub response: Result<String, ()>,
    pub calls: AtomicUsize,
}

impl FakeGenerator {
    pub fn ok(text: &str) -> Self {
        Self {
            response: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            response: Err(()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    async fn generate(&self, _prompt: &str, _t: f32, _m: u32) -> Result<String, GeminiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response
            .clone()
            .map_err(|_| GeminiError::ApiError(503, "overloaded".into()))
    }
}

/// Millisecond-scale polling so background pollers finish inside a test
pub fn fast_transcription_config() -> TranscriptionConfig {
    TranscriptionConfig {
        initial_delay_ms: 5,
        max_delay_ms: 20,
        poll_timeout_secs: 5,
        job_timeout_secs: 3_600,
        sweep_interval_secs: 60,
        stale_after_secs: 0,
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub db: SqlitePool,
    _dir: TempDir,
}

pub struct TestUser {
    pub id: Uuid,
    pub token: String,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_providers(None, None).await
    }

    pub async fn with_providers(
        provider: Option<Arc<dyn TranscriptionProvider>>,
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> Self {
        Self::with_config(provider, generator, fast_transcription_config()).await
    }

    pub async fn with_config(
        provider: Option<Arc<dyn TranscriptionProvider>>,
        generator: Option<Arc<dyn TextGenerator>>,
        transcription: TranscriptionConfig,
    ) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db = init_database(&dir.path().join("reclaim.db"))
            .await
            .expect("Failed to initialize database");

        let storage = StorageService::new(
            dir.path().join("storage"),
            TEST_SECRET.to_string(),
            TEST_BASE_URL,
            3600,
        );

        let state = AppState::new(
            db.clone(),
            EventBus::new(100),
            storage,
            provider,
            generator,
            &transcription,
            1024 * 1024,
        );

        Self {
            router: reclaim_api::build_router(state.clone()),
            state,
            db,
            _dir: dir,
        }
    }

    pub async fn create_user(&self, email: &str, tier: SubscriptionTier) -> TestUser {
        let profile = profiles::create_profile(&self.db, email, None, tier)
            .await
            .expect("Failed to create profile");
        let token = tokens::issue_token(&self.db, profile.id, None)
            .await
            .expect("Failed to issue token");
        TestUser {
            id: profile.id,
            token,
        }
    }

    /// Send a request; `body` is JSON when present
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        self.send(request).await
    }

    /// Upload raw bytes as evidence
    pub async fn upload(
        &self,
        token: &str,
        file_name: &str,
        file_type: &str,
        journal_entry_id: Option<Uuid>,
        bytes: &[u8],
    ) -> (StatusCode, Value) {
        let mut uri = format!(
            "/api/evidence?file_name={}&file_type={}",
            file_name, file_type
        );
        if let Some(id) = journal_entry_id {
            uri.push_str(&format!("&journal_entry_id={}", id));
        }

        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("authorization", format!("Bearer {}", token))
            .header("content-type", "application/octet-stream")
            .body(Body::from(bytes.to_vec()))
            .unwrap();

        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, json)
    }

    /// Raw response bytes for non-JSON endpoints
    pub async fn get_bytes(&self, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = self
            .router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    pub async fn create_entry(&self, token: &str, date: &str, safety: i64) -> Value {
        let (status, body) = self
            .request(
                "POST",
                "/api/journal",
                Some(token),
                Some(json!({
                    "title": format!("Entry on {}", date),
                    "description": "Something happened that I want to remember",
                    "incident_date": date,
                    "safety_rating": safety,
                    "abuse_types": ["emotional"]
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create entry failed: {}", body);
        body
    }
}

/// Wait until `check` passes, polling every 10 ms for up to 3 s
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 3s");
}
