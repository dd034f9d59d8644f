//! Gemini text generation client

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("Reclaim/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Response contained no text")]
    EmptyResponse,
}

/// Large-language-model backend
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        temperature: f32,
        max_output_tokens: u32,
    ) -> Result<String, GeminiError>;
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

pub struct GeminiClient {
    http_client: reqwest::Client,
    rate_limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(
        api_key: String,
        base_url: &str,
        model: &str,
        requests_per_minute: u32,
    ) -> Result<Self, GeminiError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| GeminiError::NetworkError(e.to_string()))?;

        let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            http_client,
            rate_limiter: RateLimiter::direct(quota),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(
        &self,
        prompt: &str,
        temperature: f32,
        max_output_tokens: u32,
    ) -> Result<String, GeminiError> {
        self.rate_limiter.until_ready().await;

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": temperature,
                "maxOutputTokens": max_output_tokens,
            }
        });

        tracing::debug!(model = %self.model, prompt_chars = prompt.len(), "Calling Gemini");

        let response = self
            .http_client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| GeminiError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(GeminiError::InvalidApiKey);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GeminiError::ApiError(status.as_u16(), error_text));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| GeminiError::ParseError(e.to_string()))?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(GeminiError::EmptyResponse);
        }

        Ok(text)
    }
}

/// Pull a list of short strings out of free-form model output
///
/// Prefers the first JSON array of strings in the text (markdown code
/// fences are tolerated). Otherwise treats each non-empty line as an item,
/// stripping bullets, numbering and surrounding quotes.
pub fn parse_string_list(text: &str) -> Vec<String> {
    if let Some(items) = first_json_array(text) {
        return items;
    }

    text.lines()
        .map(clean_line)
        .filter(|line| !line.is_empty() && !line.starts_with("```"))
        .collect()
}

fn first_json_array(text: &str) -> Option<Vec<String>> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('[') {
        let start = search_from + offset;
        // The streaming deserializer stops at the end of the first value,
        // so brackets inside strings and trailing prose are both fine
        let mut values =
            serde_json::Deserializer::from_str(&text[start..]).into_iter::<Vec<String>>();
        if let Some(Ok(items)) = values.next() {
            return Some(
                items
                    .into_iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            );
        }
        search_from = start + 1;
    }
    None
}

fn clean_line(line: &str) -> String {
    let mut s = line.trim();

    s = s.trim_start_matches(['-', '*', '•']).trim_start();

    // "1." / "2)" numbering
    let digits = s.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &s[digits..];
        if let Some(stripped) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            s = stripped.trim_start();
        }
    }

    s.trim_matches(|c| c == '"' || c == '\'' || c == '“' || c == '”')
        .trim()
        .to_string()
}
