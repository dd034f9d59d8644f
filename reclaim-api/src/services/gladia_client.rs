//! Gladia speech-to-text client
//!
//! v2 API: `POST /v2/transcription` with `{audio_url}` returns `{id, result_url}`;
//! `GET /v2/transcription/{id}` returns the job status payload, which is
//! interpreted by [`crate::services::transcript_extractor`].

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("Reclaim/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum GladiaError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Job accepted by the provider
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubmittedJob {
    pub id: String,
    #[serde(default)]
    pub result_url: Option<String>,
}

/// Speech-to-text backend
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    /// Submit a downloadable audio URL for transcription
    async fn submit(&self, audio_url: &str) -> Result<SubmittedJob, GladiaError>;

    /// Raw status payload of a submitted job
    async fn fetch_status(&self, job_id: &str) -> Result<Value, GladiaError>;
}

pub struct GladiaClient {
    http_client: reqwest::Client,
    rate_limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
    api_key: String,
    base_url: String,
}

impl GladiaClient {
    pub fn new(
        api_key: String,
        base_url: &str,
        requests_per_second: u32,
    ) -> Result<Self, GladiaError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GladiaError::NetworkError(e.to_string()))?;

        let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            http_client,
            rate_limiter: RateLimiter::direct(quota),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, GladiaError> {
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(GladiaError::InvalidApiKey);
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GladiaError::ApiError(status.as_u16(), error_text));
        }

        Ok(response)
    }
}

#[async_trait]
impl TranscriptionProvider for GladiaClient {
    async fn submit(&self, audio_url: &str) -> Result<SubmittedJob, GladiaError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/v2/transcription", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .header("x-gladia-key", &self.api_key)
            .json(&serde_json::json!({ "audio_url": audio_url }))
            .send()
            .await
            .map_err(|e| GladiaError::NetworkError(e.to_string()))?;

        let job: SubmittedJob = Self::check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| GladiaError::ParseError(e.to_string()))?;

        tracing::info!(job_id = %job.id, "Gladia transcription job submitted");
        Ok(job)
    }

    async fn fetch_status(&self, job_id: &str) -> Result<Value, GladiaError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/v2/transcription/{}", self.base_url, job_id);
        let response = self
            .http_client
            .get(&url)
            .header("x-gladia-key", &self.api_key)
            .send()
            .await
            .map_err(|e| GladiaError::NetworkError(e.to_string()))?;

        let payload: Value = Self::check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| GladiaError::ParseError(e.to_string()))?;

        let status = payload
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("unknown");
        tracing::debug!(job_id, status, "Gladia status fetched");
        Ok(payload)
    }
}
