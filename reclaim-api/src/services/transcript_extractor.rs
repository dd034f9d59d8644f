//! Gladia status payload interpretation
//!
//! The status endpoint has returned several shapes across API versions.
//! Everything that reads a Gladia payload goes through this module.

use serde::Serialize;
use serde_json::Value;

/// Job status as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Done,
    Error,
}

impl JobStatus {
    /// Unknown or missing values are treated as still processing
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("queued") => JobStatus::Queued,
            Some("done") | Some("completed") => JobStatus::Done,
            Some("error") | Some("failed") => JobStatus::Error,
            _ => JobStatus::Processing,
        }
    }
}

/// Everything derived from one status payload
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSnapshot {
    pub status: JobStatus,
    pub text: Option<String>,
    pub error: Option<String>,
    pub language: Option<String>,
    pub audio_duration_secs: Option<f64>,
}

impl TranscriptSnapshot {
    pub fn from_payload(payload: &Value) -> Self {
        Self {
            status: JobStatus::parse(payload.get("status").and_then(Value::as_str)),
            text: extract_transcript(payload),
            error: extract_error(payload),
            language: extract_language(payload),
            audio_duration_secs: payload
                .pointer("/result/metadata/audio_duration")
                .and_then(Value::as_f64),
        }
    }
}

/// Transcript text from a status payload
///
/// Candidates, first non-empty (after trim) wins:
/// 1. `result.transcription.full_transcript`
/// 2. `transcription.full_transcript`
/// 3. `result.transcription.utterances[*].text` joined with spaces
/// 4. `prediction[*].transcription` joined with spaces
/// 5. `full_transcript`
pub fn extract_transcript(payload: &Value) -> Option<String> {
    let candidates = [
        payload
            .pointer("/result/transcription/full_transcript")
            .and_then(Value::as_str)
            .map(str::to_string),
        payload
            .pointer("/transcription/full_transcript")
            .and_then(Value::as_str)
            .map(str::to_string),
        join_field(payload.pointer("/result/transcription/utterances"), "text"),
        join_field(payload.get("prediction"), "transcription"),
        payload
            .get("full_transcript")
            .and_then(Value::as_str)
            .map(str::to_string),
    ];

    candidates
        .into_iter()
        .flatten()
        .map(|text| text.trim().to_string())
        .find(|text| !text.is_empty())
}

/// Join `field` of every array element that carries non-blank text
fn join_field(array: Option<&Value>, field: &str) -> Option<String> {
    let parts: Vec<&str> = array?
        .as_array()?
        .iter()
        .filter_map(|item| item.get(field).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

fn extract_error(payload: &Value) -> Option<String> {
    ["error_code", "error", "error_message"]
        .iter()
        .filter_map(|key| payload.get(*key))
        .find_map(|value| match value {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.trim().to_string()),
            Value::Object(obj) => obj
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| Some(value.to_string())),
            other => Some(other.to_string()),
        })
}

fn extract_language(payload: &Value) -> Option<String> {
    payload
        .pointer("/result/transcription/languages/0")
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
