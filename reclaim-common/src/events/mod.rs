//! Event system for Reclaim
//!
//! Provides shared event definitions and the EventBus used to broadcast
//! transcription lifecycle changes to SSE subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Reclaim event types
///
/// Events are broadcast via [`EventBus`] and serialized for SSE
/// transmission. Every event carries the owning user so that streams can be
/// filtered per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReclaimEvent {
    /// Audio submitted to the transcription provider
    TranscriptionStarted {
        evidence_id: Uuid,
        user_id: Uuid,
        /// External job identifier
        job_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Transcription text stored on the evidence row
    TranscriptionCompleted {
        evidence_id: Uuid,
        user_id: Uuid,
        word_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Transcription resolved as failed (provider error, timeout, cancel)
    TranscriptionFailed {
        evidence_id: Uuid,
        user_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl ReclaimEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            ReclaimEvent::TranscriptionStarted { .. } => "TranscriptionStarted",
            ReclaimEvent::TranscriptionCompleted { .. } => "TranscriptionCompleted",
            ReclaimEvent::TranscriptionFailed { .. } => "TranscriptionFailed",
        }
    }

    /// Owner of the evidence row the event refers to
    pub fn user_id(&self) -> Uuid {
        match self {
            ReclaimEvent::TranscriptionStarted { user_id, .. }
            | ReclaimEvent::TranscriptionCompleted { user_id, .. }
            | ReclaimEvent::TranscriptionFailed { user_id, .. } => *user_id,
        }
    }

    pub fn evidence_id(&self) -> Uuid {
        match self {
            ReclaimEvent::TranscriptionStarted { evidence_id, .. }
            | ReclaimEvent::TranscriptionCompleted { evidence_id, .. }
            | ReclaimEvent::TranscriptionFailed { evidence_id, .. } => *evidence_id,
        }
    }
}

/// Central event distribution bus
///
/// Uses `tokio::broadcast` internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use reclaim_common::events::{EventBus, ReclaimEvent};
/// use uuid::Uuid;
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(ReclaimEvent::TranscriptionFailed {
///     evidence_id: Uuid::new_v4(),
///     user_id: Uuid::new_v4(),
///     reason: "cancelled".to_string(),
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ReclaimEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ReclaimEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ReclaimEvent,
    ) -> Result<usize, broadcast::error::SendError<ReclaimEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ReclaimEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(user_id: Uuid) -> ReclaimEvent {
        ReclaimEvent::TranscriptionCompleted {
            evidence_id: Uuid::new_v4(),
            user_id,
            word_count: 12,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_emit_without_subscribers_fails() {
        let bus = EventBus::new(10);
        assert!(bus.emit(completed(Uuid::new_v4())).is_err());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let user = Uuid::new_v4();

        assert_eq!(bus.emit(completed(user)).unwrap(), 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.user_id(), user);
        assert_eq!(event.event_type(), "TranscriptionCompleted");
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ReclaimEvent::TranscriptionStarted {
            evidence_id: Uuid::nil(),
            user_id: Uuid::nil(),
            job_id: "job-1".to_string(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "TranscriptionStarted");
        assert_eq!(json["job_id"], "job-1");
    }
}
