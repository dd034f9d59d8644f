//! Gladia and Gemini clients against an in-process fake server

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use reclaim_api::services::{
    GeminiClient, GeminiError, GladiaClient, GladiaError, TextGenerator, TranscriptionProvider,
};
use serde_json::{json, Value};

const GOOD_KEY: &str = "good-key";

async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn has_gladia_key(headers: &HeaderMap) -> bool {
    headers
        .get("x-gladia-key")
        .and_then(|v| v.to_str().ok())
        == Some(GOOD_KEY)
}

#[derive(Clone, Default)]
struct GladiaState {
    submitted: Arc<Mutex<Vec<String>>>,
}

async fn gladia_submit(
    State(state): State<GladiaState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !has_gladia_key(&headers) {
        return (StatusCode::UNAUTHORIZED, "invalid key").into_response();
    }
    let audio_url = body["audio_url"].as_str().unwrap_or_default().to_string();
    if audio_url.contains("broken") {
        return (StatusCode::UNPROCESSABLE_ENTITY, "audio_url unreachable").into_response();
    }
    state.submitted.lock().unwrap().push(audio_url);
    Json(json!({
        "id": "job-42",
        "result_url": "https://api.gladia.test/v2/transcription/job-42"
    }))
    .into_response()
}

async fn gladia_status(headers: HeaderMap, Path(id): Path<String>) -> Response {
    if !has_gladia_key(&headers) {
        return (StatusCode::UNAUTHORIZED, "invalid key").into_response();
    }
    if id != "job-42" {
        return (StatusCode::NOT_FOUND, "no such job").into_response();
    }
    Json(json!({
        "id": id,
        "status": "done",
        "result": {"transcription": {"full_transcript": "It happened again."}}
    }))
    .into_response()
}

async fn gladia_server() -> (String, GladiaState) {
    let state = GladiaState::default();
    let router = Router::new()
        .route("/v2/transcription", post(gladia_submit))
        .route("/v2/transcription/:id", get(gladia_status))
        .with_state(state.clone());
    (spawn_server(router).await, state)
}

#[tokio::test]
async fn test_gladia_submit_and_status() {
    let (base_url, state) = gladia_server().await;
    let client = GladiaClient::new(GOOD_KEY.to_string(), &format!("{}/", base_url), 50).unwrap();

    let job = client
        .submit("http://reclaim.test/storage/u/e/note.mp3?expires=1&signature=abc")
        .await
        .unwrap();
    assert_eq!(job.id, "job-42");
    assert!(job.result_url.is_some());
    assert_eq!(
        *state.submitted.lock().unwrap(),
        vec!["http://reclaim.test/storage/u/e/note.mp3?expires=1&signature=abc".to_string()]
    );

    let payload = client.fetch_status("job-42").await.unwrap();
    assert_eq!(payload["status"], "done");
    assert_eq!(
        reclaim_api::services::extract_transcript(&payload).as_deref(),
        Some("It happened again.")
    );
}

#[tokio::test]
async fn test_gladia_error_mapping() {
    let (base_url, _) = gladia_server().await;

    let bad_key = GladiaClient::new("wrong".to_string(), &base_url, 50).unwrap();
    assert!(matches!(
        bad_key.submit("http://x/a.mp3").await,
        Err(GladiaError::InvalidApiKey)
    ));

    let client = GladiaClient::new(GOOD_KEY.to_string(), &base_url, 50).unwrap();
    match client.submit("http://x/broken.mp3").await {
        Err(GladiaError::ApiError(422, body)) => assert!(body.contains("unreachable")),
        other => panic!("unexpected result: {:?}", other.map(|j| j.id)),
    }
    assert!(matches!(
        client.fetch_status("missing").await,
        Err(GladiaError::ApiError(404, _))
    ));
}

#[tokio::test]
async fn test_gladia_network_error() {
    // Nothing listens on port 9 locally
    let client = GladiaClient::new(GOOD_KEY.to_string(), "http://127.0.0.1:9", 50).unwrap();
    assert!(matches!(
        client.fetch_status("job-42").await,
        Err(GladiaError::NetworkError(_))
    ));
}

#[derive(Clone, Default)]
struct GeminiState {
    requests: Arc<Mutex<Vec<(String, Value)>>>,
}

async fn gemini_generate(
    State(state): State<GeminiState>,
    Path(model_action): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    if query.get("key").map(String::as_str) != Some(GOOD_KEY) {
        return (StatusCode::FORBIDDEN, "API key not valid").into_response();
    }

    let prompt = body["contents"][0]["parts"][0]["text"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    state
        .requests
        .lock()
        .unwrap()
        .push((model_action, body.clone()));

    if prompt.contains("empty") {
        return Json(json!({"candidates": []})).into_response();
    }

    Json(json!({
        "candidates": [{
            "content": {"parts": [{"text": "[\"First\", "}, {"text": "\"Second\"]"}]}
        }]
    }))
    .into_response()
}

async fn gemini_server() -> (String, GeminiState) {
    let state = GeminiState::default();
    let router = Router::new()
        .route("/v1beta/models/:model_action", post(gemini_generate))
        .with_state(state.clone());
    (spawn_server(router).await, state)
}

#[tokio::test]
async fn test_gemini_generate_joins_parts() {
    let (base_url, state) = gemini_server().await;
    let client = GeminiClient::new(GOOD_KEY.to_string(), &base_url, "gemini-test", 600).unwrap();

    let text = client.generate("Suggest titles", 0.7, 256).await.unwrap();
    assert_eq!(text, "[\"First\", \"Second\"]");
    assert_eq!(
        reclaim_api::services::gemini_client::parse_string_list(&text),
        vec!["First", "Second"]
    );

    let requests = state.requests.lock().unwrap();
    let (model_action, body) = &requests[0];
    assert_eq!(model_action, "gemini-test:generateContent");
    assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
}

#[tokio::test]
async fn test_gemini_errors() {
    let (base_url, _) = gemini_server().await;

    let bad_key = GeminiClient::new("nope".to_string(), &base_url, "gemini-test", 600).unwrap();
    assert!(matches!(
        bad_key.generate("hello", 0.5, 64).await,
        Err(GeminiError::InvalidApiKey)
    ));

    let client = GeminiClient::new(GOOD_KEY.to_string(), &base_url, "gemini-test", 600).unwrap();
    assert!(matches!(
        client.generate("return empty please", 0.5, 64).await,
        Err(GeminiError::EmptyResponse)
    ));
}
