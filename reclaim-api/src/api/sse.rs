//! Server-Sent Events for transcription progress
//!
//! Each stream only carries events about the caller's own evidence.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use reclaim_common::events::ReclaimEvent;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::api::AuthUser;
use crate::AppState;

const HEARTBEAT: Duration = Duration::from_secs(15);

/// GET /api/evidence/events
///
/// Streams `TranscriptionStarted`, `TranscriptionCompleted` and
/// `TranscriptionFailed` for the authenticated user.
pub async fn transcription_event_stream(
    State(state): State<AppState>,
    user: AuthUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(user_id = %user.user_id, "SSE client connected to transcription events");

    let mut rx = state.event_bus.subscribe();
    let user_id = user.user_id;

    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(HEARTBEAT) => {
                    debug!("SSE: Sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }

                received = rx.recv() => {
                    match received {
                        Ok(event) if event.user_id() == user_id => {
                            if let Some(sse_event) = to_sse_event(&event) {
                                yield Ok(sse_event);
                            }
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(user_id = %user_id, skipped, "SSE subscriber lagged");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT).text("heartbeat"))
}

fn to_sse_event(event: &ReclaimEvent) -> Option<Event> {
    let event_type = event.event_type();
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().event(event_type).data(json)),
        Err(e) => {
            warn!("SSE: Failed to serialize event {}: {}", event_type, e);
            None
        }
    }
}

pub fn sse_routes() -> Router<AppState> {
    Router::new().route("/api/evidence/events", get(transcription_event_stream))
}
