//! Transcription lifecycle tests against a scripted provider

mod helpers;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use helpers::{done_payload, eventually, FakeProvider, TestApp};
use http_body_util::BodyExt;
use reclaim_api::db::evidence;
use reclaim_api::services::{ReconcileOutcome, TranscriptionProvider};
use reclaim_common::config::TranscriptionConfig;
use reclaim_common::db::{SubscriptionTier, TranscriptionStatus};
use reclaim_common::events::ReclaimEvent;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;
use uuid::Uuid;

async fn upload_audio(app: &TestApp, token: &str) -> Uuid {
    let (status, body) = app
        .upload(token, "note.mp3", "audio/mpeg", None, b"fake audio")
        .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().parse().unwrap()
}

async fn status_of(app: &TestApp, id: Uuid) -> Option<TranscriptionStatus> {
    evidence::load_evidence(&app.db, id)
        .await
        .unwrap()
        .unwrap()
        .transcription_status
}

/// Polling far slower than any test, so only explicit reconciles act
fn manual_config() -> TranscriptionConfig {
    TranscriptionConfig {
        initial_delay_ms: 60_000,
        max_delay_ms: 60_000,
        poll_timeout_secs: 600,
        job_timeout_secs: 3_600,
        sweep_interval_secs: 60,
        stale_after_secs: 0,
    }
}

#[tokio::test]
async fn test_start_without_provider_is_503() {
    let app = TestApp::new().await;
    let user = app.create_user("noprov@example.com", SubscriptionTier::Foundation).await;
    let id = upload_audio(&app, &user.token).await;

    let (status, body) = app
        .request("POST", &format!("/api/evidence/{}/transcription", id), Some(&user.token), None)
        .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");
    assert_eq!(status_of(&app, id).await, Some(TranscriptionStatus::Pending));
}

#[tokio::test]
async fn test_background_poller_completes_transcription() {
    let provider = Arc::new(FakeProvider::with_script(vec![
        json!({"status": "queued"}),
        json!({"status": "processing"}),
        done_payload("  He took my keys and would not let me leave  "),
    ]));
    let app = TestApp::with_providers(Some(provider.clone()), None).await;
    let user = app.create_user("poller@example.com", SubscriptionTier::Foundation).await;
    let id = upload_audio(&app, &user.token).await;
    let mut events = app.state.event_bus.subscribe();

    let (status, body) = app
        .request("POST", &format!("/api/evidence/{}/transcription", id), Some(&user.token), None)
        .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{}", body);
    assert_eq!(body["job_id"], "job-1");

    eventually(|| async { status_of(&app, id).await == Some(TranscriptionStatus::Completed) })
        .await;

    let row = evidence::load_evidence(&app.db, id).await.unwrap().unwrap();
    assert_eq!(
        row.transcription.as_deref(),
        Some("He took my keys and would not let me leave")
    );
    assert_eq!(row.metadata["word_count"], 10);
    assert_eq!(row.metadata["language"], "en");
    assert_eq!(row.metadata["audio_duration_secs"], 12.5);

    // Submitted URL must be a signed link to the stored file
    let submitted = provider.submissions.lock().unwrap()[0].clone();
    assert!(submitted.contains(&row.storage_path));
    assert!(submitted.contains("signature="));

    let started = events.recv().await.unwrap();
    assert!(matches!(started, ReclaimEvent::TranscriptionStarted { .. }));
    let completed = events.recv().await.unwrap();
    assert!(matches!(
        completed,
        ReclaimEvent::TranscriptionCompleted { word_count: 10, .. }
    ));

    eventually(|| async { app.state.reconciler.active_pollers().await == 0 }).await;
}

#[tokio::test]
async fn test_status_endpoint_reconciles_processing_row() {
    let provider = Arc::new(FakeProvider::with_script(vec![done_payload("on demand")]));
    let app = TestApp::with_config(Some(provider.clone()), None, manual_config()).await;
    let user = app.create_user("ondemand@example.com", SubscriptionTier::Foundation).await;
    let id = upload_audio(&app, &user.token).await;

    app.request("POST", &format!("/api/evidence/{}/transcription", id), Some(&user.token), None)
        .await;

    let uri = format!("/api/evidence/{}/transcription", id);
    let (status, body) = app.request("GET", &uri, Some(&user.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["transcription"], "on demand");
    assert_eq!(body["reconcile_outcome"], "applied");

    // Terminal rows are answered from the database without a provider call
    let calls = provider.status_calls.load(Ordering::SeqCst);
    let (_, body) = app.request("GET", &uri, Some(&user.token), None).await;
    assert_eq!(body["status"], "completed");
    assert!(body.get("reconcile_outcome").is_none());
    assert_eq!(provider.status_calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn test_concurrent_reconciles_apply_exactly_once() {
    let provider = Arc::new(FakeProvider::with_script(vec![done_payload("same text")]));
    let app = TestApp::with_config(Some(provider.clone()), None, manual_config()).await;
    let user = app.create_user("race@example.com", SubscriptionTier::Foundation).await;
    let id = upload_audio(&app, &user.token).await;

    app.state.reconciler.start(user.id, id).await.unwrap();
    let mut events = app.state.event_bus.subscribe();

    let a = app.state.reconciler.clone();
    let b = app.state.reconciler.clone();
    let (first, second) = tokio::join!(a.reconcile(id), b.reconcile(id));
    let outcomes = [first.unwrap(), second.unwrap()];

    let applied = outcomes
        .iter()
        .filter(|o| matches!(o, ReconcileOutcome::Applied(_)))
        .count();
    assert_eq!(applied, 1);

    for outcome in &outcomes {
        assert_eq!(
            outcome.evidence().transcription_status,
            Some(TranscriptionStatus::Completed)
        );
        assert_eq!(outcome.evidence().transcription.as_deref(), Some("same text"));
    }

    // Exactly one completion event
    assert!(matches!(
        events.recv().await.unwrap(),
        ReclaimEvent::TranscriptionCompleted { .. }
    ));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_provider_error_fails_row_and_retry_is_allowed() {
    let provider = Arc::new(FakeProvider::with_script(vec![json!({
        "status": "error",
        "error_code": "audio_unreadable"
    })]));
    let app = TestApp::with_config(Some(provider.clone()), None, manual_config()).await;
    let user = app.create_user("retry@example.com", SubscriptionTier::Recovery).await;
    let id = upload_audio(&app, &user.token).await;

    app.state.reconciler.start(user.id, id).await.unwrap();
    let outcome = app.state.reconciler.reconcile(id).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Applied(_)));
    assert_eq!(
        outcome.evidence().metadata["transcription_error"],
        "audio_unreadable"
    );

    let (status, body) = app
        .request("POST", &format!("/api/evidence/{}/transcription", id), Some(&user.token), None)
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "processing");
    assert_eq!(body["job_id"], "job-2");
    assert!(body["error"].is_null());
    assert_eq!(provider.submission_count(), 2);
}

#[tokio::test]
async fn test_duplicate_start_conflicts_and_single_job() {
    let provider = Arc::new(FakeProvider::default());
    let app = TestApp::with_config(Some(provider.clone()), None, manual_config()).await;
    let user = app.create_user("dupe@example.com", SubscriptionTier::Foundation).await;
    let id = upload_audio(&app, &user.token).await;
    let uri = format!("/api/evidence/{}/transcription", id);

    let (status, _) = app.request("POST", &uri, Some(&user.token), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = app.request("POST", &uri, Some(&user.token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
    assert_eq!(provider.submission_count(), 1);

    // The rejected start is not metered
    let (_, usage) = app.request("GET", "/api/usage", Some(&user.token), None).await;
    let transcription = usage["features"]
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["feature"] == "audio_transcription")
        .unwrap()
        .clone();
    assert_eq!(transcription["current_usage"], 1);
}

#[tokio::test]
async fn test_submission_failure_marks_failed_and_is_not_metered() {
    let provider = Arc::new(FakeProvider::failing_submit());
    let app = TestApp::with_providers(Some(provider), None).await;
    let user = app.create_user("subfail@example.com", SubscriptionTier::Foundation).await;
    let id = upload_audio(&app, &user.token).await;

    let (status, body) = app
        .request("POST", &format!("/api/evidence/{}/transcription", id), Some(&user.token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "UPSTREAM_ERROR");
    assert_eq!(status_of(&app, id).await, Some(TranscriptionStatus::Failed));

    let (_, usage) = app.request("GET", "/api/usage", Some(&user.token), None).await;
    let transcription = usage["features"]
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["feature"] == "audio_transcription")
        .unwrap()
        .clone();
    assert_eq!(transcription["current_usage"], 0);
}

#[tokio::test]
async fn test_transcription_limit_is_429() {
    let provider = Arc::new(FakeProvider::default());
    let app = TestApp::with_config(Some(provider), None, manual_config()).await;
    let user = app.create_user("quota@example.com", SubscriptionTier::Foundation).await;

    for _ in 0..3 {
        let id = upload_audio(&app, &user.token).await;
        let (status, _) = app
            .request("POST", &format!("/api/evidence/{}/transcription", id), Some(&user.token), None)
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    let id = upload_audio(&app, &user.token).await;
    let (status, body) = app
        .request("POST", &format!("/api/evidence/{}/transcription", id), Some(&user.token), None)
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["feature"], "audio_transcription");
    assert_eq!(body["upgrade_required"], true);
    assert_eq!(status_of(&app, id).await, Some(TranscriptionStatus::Pending));
}

#[tokio::test]
async fn test_non_audio_cannot_be_transcribed() {
    let provider = Arc::new(FakeProvider::default());
    let app = TestApp::with_providers(Some(provider.clone()), None).await;
    let user = app.create_user("image@example.com", SubscriptionTier::Foundation).await;

    let (_, body) = app
        .upload(&user.token, "photo.png", "image/png", None, b"png")
        .await;
    let id = body["id"].as_str().unwrap();

    let (status, _) = app
        .request("POST", &format!("/api/evidence/{}/transcription", id), Some(&user.token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(provider.submission_count(), 0);
}

#[tokio::test]
async fn test_cancel_stops_polling_and_fails_row() {
    let provider = Arc::new(FakeProvider::default());
    let app = TestApp::with_config(Some(provider.clone()), None, manual_config()).await;
    let user = app.create_user("cancel@example.com", SubscriptionTier::Foundation).await;
    let id = upload_audio(&app, &user.token).await;
    let uri = format!("/api/evidence/{}/transcription", id);

    app.request("POST", &uri, Some(&user.token), None).await;
    assert_eq!(app.state.reconciler.active_pollers().await, 1);

    let (status, body) = app.request("DELETE", &uri, Some(&user.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["error"], "cancelled");

    eventually(|| async { app.state.reconciler.active_pollers().await == 0 }).await;
    assert_eq!(provider.status_calls.load(Ordering::SeqCst), 0);

    let (status, _) = app.request("DELETE", &uri, Some(&user.token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_sweep_resolves_stale_rows_for_one_user() {
    let provider = Arc::new(FakeProvider::with_script(vec![done_payload("swept text")]));
    let app = TestApp::with_config(Some(provider.clone()), None, manual_config()).await;
    let alice = app.create_user("alice@example.com", SubscriptionTier::Foundation).await;
    let bob = app.create_user("bob@example.com", SubscriptionTier::Foundation).await;

    let alice_id = upload_audio(&app, &alice.token).await;
    let bob_id = upload_audio(&app, &bob.token).await;
    app.state.reconciler.start(alice.id, alice_id).await.unwrap();
    app.state.reconciler.start(bob.id, bob_id).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let (status, report) = app
        .request("POST", "/api/evidence/transcription/reconcile", Some(&alice.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["examined"], 1);
    assert_eq!(report["completed"], 1);

    assert_eq!(status_of(&app, alice_id).await, Some(TranscriptionStatus::Completed));
    assert_eq!(status_of(&app, bob_id).await, Some(TranscriptionStatus::Processing));
}

#[tokio::test]
async fn test_sweep_fails_rows_past_job_timeout() {
    let provider = Arc::new(FakeProvider::default());
    let config = TranscriptionConfig {
        job_timeout_secs: 0,
        ..manual_config()
    };
    let app = TestApp::with_config(Some(provider.clone()), None, config).await;
    let user = app.create_user("timeout@example.com", SubscriptionTier::Foundation).await;
    let id = upload_audio(&app, &user.token).await;

    app.state.reconciler.start(user.id, id).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let report = app.state.reconciler.sweep_stale(None).await.unwrap();
    assert_eq!(report.failed, 1);

    let row = evidence::load_evidence(&app.db, id).await.unwrap().unwrap();
    assert_eq!(row.transcription_status, Some(TranscriptionStatus::Failed));
    assert_eq!(row.metadata["transcription_error"], "transcription timed out");
}

#[tokio::test]
async fn test_reconcile_is_idempotent_on_terminal_rows() {
    let provider: Arc<dyn TranscriptionProvider> =
        Arc::new(FakeProvider::with_script(vec![done_payload("final")]));
    let app = TestApp::with_config(Some(provider), None, manual_config()).await;
    let user = app.create_user("idem@example.com", SubscriptionTier::Foundation).await;
    let id = upload_audio(&app, &user.token).await;

    app.state.reconciler.start(user.id, id).await.unwrap();
    assert!(matches!(
        app.state.reconciler.reconcile(id).await.unwrap(),
        ReconcileOutcome::Applied(_)
    ));

    for _ in 0..3 {
        let outcome = app.state.reconciler.reconcile(id).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::AlreadyResolved(_)));
        assert_eq!(outcome.evidence().transcription.as_deref(), Some("final"));
    }
}

#[tokio::test]
async fn test_retry_survives_sleeping_poller_of_failed_attempt() {
    let provider = Arc::new(FakeProvider::with_script(vec![json!({"status": "error"})]));
    let app = TestApp::with_config(Some(provider.clone()), None, manual_config()).await;
    let user = app.create_user("sleeper@example.com", SubscriptionTier::Recovery).await;
    let id = upload_audio(&app, &user.token).await;
    let uri = format!("/api/evidence/{}/transcription", id);

    // The first poller is parked in its backoff sleep the whole time
    app.request("POST", &uri, Some(&user.token), None).await;
    let (_, body) = app.request("GET", &uri, Some(&user.token), None).await;
    assert_eq!(body["status"], "failed");
    assert_eq!(app.state.reconciler.active_pollers().await, 1);

    let (status, body) = app.request("POST", &uri, Some(&user.token), None).await;
    assert_eq!(status, StatusCode::ACCEPTED, "{}", body);

    // Give the replaced poller time to observe its cancellation
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let row = evidence::load_evidence(&app.db, id).await.unwrap().unwrap();
    assert_eq!(row.transcription_status, Some(TranscriptionStatus::Processing));
    assert!(row.metadata.get("transcription_error").is_none());
    assert_eq!(row.metadata["transcription_job_id"], "job-2");
    assert_eq!(row.metadata["transcription_attempts"], 2);
    assert_eq!(app.state.reconciler.active_pollers().await, 1);
}

#[tokio::test]
async fn test_result_for_earlier_attempt_is_not_applied() {
    let provider = Arc::new(FakeProvider::default());
    let app = TestApp::with_config(Some(provider), None, manual_config()).await;
    let user = app.create_user("attempts@example.com", SubscriptionTier::Foundation).await;
    let id = upload_audio(&app, &user.token).await;

    app.state.reconciler.start(user.id, id).await.unwrap();
    let row = evidence::load_evidence(&app.db, id).await.unwrap().unwrap();
    assert_eq!(row.metadata["transcription_attempts"], 1);

    let stale = evidence::transition(
        &app.db,
        id,
        TranscriptionStatus::Processing,
        Some(0),
        TranscriptionStatus::Completed,
        Some("old result"),
        &row.metadata,
    )
    .await
    .unwrap();
    assert!(!stale);
    assert_eq!(status_of(&app, id).await, Some(TranscriptionStatus::Processing));

    let current = evidence::transition(
        &app.db,
        id,
        TranscriptionStatus::Processing,
        Some(1),
        TranscriptionStatus::Completed,
        Some("new result"),
        &row.metadata,
    )
    .await
    .unwrap();
    assert!(current);
    let row = evidence::load_evidence(&app.db, id).await.unwrap().unwrap();
    assert_eq!(row.transcription.as_deref(), Some("new result"));
}

#[tokio::test]
async fn test_shutdown_stops_pollers_without_failing_rows() {
    let provider = Arc::new(FakeProvider::default());
    let app = TestApp::with_config(Some(provider), None, manual_config()).await;
    let user = app.create_user("shutdown@example.com", SubscriptionTier::Foundation).await;
    let id = upload_audio(&app, &user.token).await;

    app.request(
        "POST",
        &format!("/api/evidence/{}/transcription", id),
        Some(&user.token),
        None,
    )
    .await;
    assert_eq!(app.state.reconciler.active_pollers().await, 1);

    let mut events = app.state.event_bus.subscribe();
    let shutdown = CancellationToken::new();
    let sweeper = app
        .state
        .reconciler
        .spawn_sweeper(std::time::Duration::from_secs(3600), shutdown.clone());

    shutdown.cancel();
    sweeper.await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    assert_eq!(app.state.reconciler.active_pollers().await, 0);
    let row = evidence::load_evidence(&app.db, id).await.unwrap().unwrap();
    assert_eq!(row.transcription_status, Some(TranscriptionStatus::Processing));
    assert!(row.metadata.get("transcription_error").is_none());

    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, ReclaimEvent::TranscriptionFailed { .. }),
            "unexpected failure event: {:?}",
            event
        );
    }
}

#[tokio::test]
async fn test_event_stream_only_carries_callers_evidence() {
    let app = TestApp::new().await;
    let alice = app.create_user("sse-alice@example.com", SubscriptionTier::Foundation).await;
    let bob = app.create_user("sse-bob@example.com", SubscriptionTier::Foundation).await;

    let request = Request::builder()
        .uri("/api/evidence/events")
        .header("authorization", format!("Bearer {}", alice.token))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    let mut body = response.into_body();

    let bobs_evidence = Uuid::new_v4();
    let alices_evidence = Uuid::new_v4();
    app.state.event_bus.emit_lossy(ReclaimEvent::TranscriptionStarted {
        evidence_id: bobs_evidence,
        user_id: bob.id,
        job_id: "job-bob".into(),
        timestamp: Utc::now(),
    });
    app.state.event_bus.emit_lossy(ReclaimEvent::TranscriptionStarted {
        evidence_id: alices_evidence,
        user_id: alice.id,
        job_id: "job-alice".into(),
        timestamp: Utc::now(),
    });

    let frame = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            let frame = body.frame().await.unwrap().unwrap();
            if let Some(data) = frame.data_ref() {
                let text = String::from_utf8_lossy(data).into_owned();
                if text.contains("data:") {
                    return text;
                }
            }
        }
    })
    .await
    .expect("no event delivered");

    assert!(frame.contains("event: TranscriptionStarted"), "{}", frame);
    assert!(frame.contains(&alices_evidence.to_string()));
    assert!(!frame.contains(&bobs_evidence.to_string()));
    assert!(!frame.contains("job-bob"));
}
