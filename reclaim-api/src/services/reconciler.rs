//! Transcription reconciler
//!
//! Owns every transcription status change of an evidence row:
//!
//! ```text
//! start ──claim──► processing ──submit──► job id stored ──► poller
//!                     │                                        │
//!                     │ submit failed              reconcile ◄─┘ (backoff)
//!                     ▼                                │
//!                   failed ◄───── error / empty ───────┤
//!                                                      ▼
//!                                                  completed
//! ```
//!
//! Pollers, on-demand status checks and the sweeper all call [`reconcile`],
//! and every write is a conditional update on the observed status, so they
//! may race freely: exactly one of them applies the terminal transition and
//! the rest report [`ReconcileOutcome::AlreadyResolved`].
//!
//! [`reconcile`]: TranscriptionReconciler::reconcile

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reclaim_common::config::TranscriptionConfig;
use reclaim_common::db::{EvidenceFile, TranscriptionStatus};
use reclaim_common::events::{EventBus, ReclaimEvent};
use reclaim_common::time;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::evidence;
use crate::error::ApiError;
use crate::services::gladia_client::{GladiaError, TranscriptionProvider};
use crate::services::poll_policy::{poll_with_backoff, PollOutcome, PollPolicy};
use crate::services::storage::StorageService;
use crate::services::transcript_extractor::{word_count, JobStatus, TranscriptSnapshot};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT};

pub const CANCELLED_REASON: &str = "cancelled";

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("Evidence file not found")]
    NotFound,

    #[error("Only audio evidence can be transcribed")]
    NotAudio,

    #[error("Transcription already completed")]
    AlreadyCompleted,

    #[error("Transcription already in progress")]
    AlreadyProcessing,

    #[error("No transcription in progress")]
    NotProcessing,

    #[error("Transcription provider is not configured")]
    NotConfigured,

    #[error("Transcription provider error: {0}")]
    Provider(#[from] GladiaError),

    #[error(transparent)]
    Database(#[from] reclaim_common::Error),
}

impl From<TranscriptionError> for ApiError {
    fn from(err: TranscriptionError) -> Self {
        match err {
            TranscriptionError::NotFound => ApiError::NotFound(err.to_string()),
            TranscriptionError::NotAudio => ApiError::BadRequest(err.to_string()),
            TranscriptionError::AlreadyCompleted
            | TranscriptionError::AlreadyProcessing
            | TranscriptionError::NotProcessing => ApiError::Conflict(err.to_string()),
            TranscriptionError::NotConfigured => ApiError::ServiceUnavailable(err.to_string()),
            TranscriptionError::Provider(e) => ApiError::Upstream(e.to_string()),
            TranscriptionError::Database(e) => ApiError::Common(e),
        }
    }
}

type TranscriptionResult<T> = Result<T, TranscriptionError>;

/// Result of one reconciliation step
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// This call applied the terminal transition
    Applied(EvidenceFile),
    /// The row was already terminal (or another writer got there first)
    AlreadyResolved(EvidenceFile),
    /// The external job has not finished
    StillProcessing(EvidenceFile),
}

impl ReconcileOutcome {
    pub fn evidence(&self) -> &EvidenceFile {
        match self {
            ReconcileOutcome::Applied(e)
            | ReconcileOutcome::AlreadyResolved(e)
            | ReconcileOutcome::StillProcessing(e) => e,
        }
    }

    pub fn into_evidence(self) -> EvidenceFile {
        match self {
            ReconcileOutcome::Applied(e)
            | ReconcileOutcome::AlreadyResolved(e)
            | ReconcileOutcome::StillProcessing(e) => e,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied(_) => "applied",
            ReconcileOutcome::AlreadyResolved(_) => "already_resolved",
            ReconcileOutcome::StillProcessing(_) => "still_processing",
        }
    }
}

/// Counts from one sweep
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub completed: usize,
    pub failed: usize,
    pub still_processing: usize,
    pub errors: usize,
}

/// In-flight pollers by evidence id
///
/// Each registration gets a generation number so a finished poller only
/// removes its own entry, never a newer poller's.
#[derive(Clone, Default)]
struct PollerRegistry {
    inner: Arc<RwLock<HashMap<Uuid, (u64, CancellationToken)>>>,
    next_generation: Arc<AtomicU64>,
}

impl PollerRegistry {
    async fn register(&self, evidence_id: Uuid) -> (u64, CancellationToken) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        let previous = self
            .inner
            .write()
            .await
            .insert(evidence_id, (generation, token.clone()));
        if let Some((_, old)) = previous {
            old.cancel();
        }

        (generation, token)
    }

    async fn unregister(&self, evidence_id: Uuid, generation: u64) {
        let mut pollers = self.inner.write().await;
        if pollers.get(&evidence_id).map(|(g, _)| *g) == Some(generation) {
            pollers.remove(&evidence_id);
        }
    }

    async fn cancel(&self, evidence_id: Uuid) -> bool {
        match self.inner.write().await.remove(&evidence_id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    async fn cancel_all(&self) {
        for (_, (_, token)) in self.inner.write().await.drain() {
            token.cancel();
        }
    }
}

#[derive(Clone)]
pub struct TranscriptionReconciler {
    db: SqlitePool,
    provider: Option<Arc<dyn TranscriptionProvider>>,
    storage: StorageService,
    event_bus: EventBus,
    policy: PollPolicy,
    job_timeout: Duration,
    stale_after: Duration,
    pollers: PollerRegistry,
}

impl TranscriptionReconciler {
    pub fn new(
        db: SqlitePool,
        provider: Option<Arc<dyn TranscriptionProvider>>,
        storage: StorageService,
        event_bus: EventBus,
        config: &TranscriptionConfig,
    ) -> Self {
        Self {
            db,
            provider,
            storage,
            event_bus,
            policy: PollPolicy::from_config(config),
            job_timeout: Duration::from_secs(config.job_timeout_secs),
            stale_after: Duration::from_secs(config.stale_after_secs),
            pollers: PollerRegistry::default(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    pub async fn active_pollers(&self) -> usize {
        self.pollers.len().await
    }

    /// Submit an audio row for transcription and start polling it
    ///
    /// The row is claimed (`pending|failed → processing`) before the
    /// provider is called, so two concurrent starts cannot both create a
    /// provider job.
    pub async fn start(&self, user_id: Uuid, evidence_id: Uuid) -> TranscriptionResult<EvidenceFile> {
        let provider = self.provider.clone().ok_or(TranscriptionError::NotConfigured)?;

        let row = evidence::get_evidence(&self.db, user_id, evidence_id)
            .await?
            .ok_or(TranscriptionError::NotFound)?;

        if !row.is_audio() {
            return Err(TranscriptionError::NotAudio);
        }

        let current = row.transcription_status.unwrap_or(TranscriptionStatus::Pending);
        match current {
            TranscriptionStatus::Completed => return Err(TranscriptionError::AlreadyCompleted),
            TranscriptionStatus::Processing => return Err(TranscriptionError::AlreadyProcessing),
            TranscriptionStatus::Pending | TranscriptionStatus::Failed => {}
        }

        let now = time::now();
        let mut metadata = metadata_map(&row.metadata);
        for key in [
            "transcription_job_id",
            "transcription_result_url",
            "transcription_error",
            "transcription_failed_at",
        ] {
            metadata.remove(key);
        }
        let attempts = metadata
            .get("transcription_attempts")
            .and_then(Value::as_u64)
            .unwrap_or(0)
            + 1;
        metadata.insert("transcription_attempts".into(), attempts.into());
        metadata.insert(
            "transcription_started_at".into(),
            time::to_db_timestamp(now).into(),
        );
        let metadata = Value::Object(metadata);

        let claimed = self
            .write_transition(
                evidence_id,
                current,
                None,
                TranscriptionStatus::Processing,
                None,
                &metadata,
            )
            .await?;
        if !claimed {
            return Err(TranscriptionError::AlreadyProcessing);
        }

        let audio_url = self.storage.signed_url(&row.storage_path, now.timestamp());

        let job = match provider.submit(&audio_url).await {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(
                    evidence_id = %evidence_id,
                    error = %e,
                    "Transcription submission failed"
                );
                self.fail(evidence_id, &format!("submission failed: {}", e))
                    .await?;
                return Err(TranscriptionError::Provider(e));
            }
        };

        let mut with_job = metadata_map(&metadata);
        with_job.insert("transcription_job_id".into(), job.id.clone().into());
        if let Some(result_url) = &job.result_url {
            with_job.insert("transcription_result_url".into(), result_url.clone().into());
        }

        let stored = evidence::update_metadata_if(
            &self.db,
            evidence_id,
            TranscriptionStatus::Processing,
            Some(attempts as i64),
            &Value::Object(with_job),
        )
        .await?;

        if stored {
            tracing::info!(
                evidence_id = %evidence_id,
                user_id = %user_id,
                job_id = %job.id,
                attempt = attempts,
                "Transcription started"
            );
            self.event_bus.emit_lossy(ReclaimEvent::TranscriptionStarted {
                evidence_id,
                user_id,
                job_id: job.id,
                timestamp: time::now(),
            });
            self.spawn_poller(evidence_id).await;
        } else {
            // Cancelled between claim and submission
            tracing::info!(
                evidence_id = %evidence_id,
                job_id = %job.id,
                "Row left processing before job id was stored"
            );
        }

        self.reload(evidence_id).await
    }

    /// One idempotent reconciliation step
    ///
    /// Rows that are not `processing` are returned unchanged. Otherwise the
    /// provider is queried once and a resolved job is applied with a
    /// conditional update.
    pub async fn reconcile(&self, evidence_id: Uuid) -> TranscriptionResult<ReconcileOutcome> {
        let row = self.reload(evidence_id).await?;

        if row.transcription_status != Some(TranscriptionStatus::Processing) {
            return Ok(ReconcileOutcome::AlreadyResolved(row));
        }

        let (Some(provider), Some(job_id)) = (self.provider.as_ref(), row.transcription_job_id())
        else {
            return Ok(ReconcileOutcome::StillProcessing(row));
        };

        let payload = provider.fetch_status(job_id).await?;
        let snapshot = TranscriptSnapshot::from_payload(&payload);

        self.apply_snapshot(row, snapshot).await
    }

    async fn apply_snapshot(
        &self,
        row: EvidenceFile,
        snapshot: TranscriptSnapshot,
    ) -> TranscriptionResult<ReconcileOutcome> {
        if let Some(text) = snapshot.text.as_deref() {
            return self.complete(row, text, &snapshot).await;
        }

        match snapshot.status {
            JobStatus::Error => {
                let reason = snapshot
                    .error
                    .clone()
                    .unwrap_or_else(|| "transcription failed".to_string());
                self.fail_row(row, &reason).await
            }
            JobStatus::Done => self.fail_row(row, "empty transcript").await,
            JobStatus::Queued | JobStatus::Processing => Ok(ReconcileOutcome::StillProcessing(row)),
        }
    }

    async fn complete(
        &self,
        row: EvidenceFile,
        text: &str,
        snapshot: &TranscriptSnapshot,
    ) -> TranscriptionResult<ReconcileOutcome> {
        let words = word_count(text);

        let mut metadata = metadata_map(&row.metadata);
        metadata.remove("transcription_error");
        metadata.insert("word_count".into(), words.into());
        metadata.insert(
            "transcription_completed_at".into(),
            time::to_db_timestamp(time::now()).into(),
        );
        if let Some(language) = &snapshot.language {
            metadata.insert("language".into(), language.clone().into());
        }
        if let Some(duration) = snapshot.audio_duration_secs {
            metadata.insert("audio_duration_secs".into(), duration.into());
        }

        let applied = self
            .write_transition(
                row.id,
                TranscriptionStatus::Processing,
                attempt_of(&row),
                TranscriptionStatus::Completed,
                Some(text),
                &Value::Object(metadata),
            )
            .await?;

        let current = self.reload(row.id).await?;
        if !applied {
            return Ok(not_applied(current));
        }

        tracing::info!(
            evidence_id = %row.id,
            user_id = %row.user_id,
            word_count = words,
            "Transcription completed"
        );
        self.event_bus.emit_lossy(ReclaimEvent::TranscriptionCompleted {
            evidence_id: row.id,
            user_id: row.user_id,
            word_count: words,
            timestamp: time::now(),
        });

        Ok(ReconcileOutcome::Applied(current))
    }

    async fn fail_row(&self, row: EvidenceFile, reason: &str) -> TranscriptionResult<ReconcileOutcome> {
        let mut metadata = metadata_map(&row.metadata);
        metadata.insert("transcription_error".into(), reason.into());
        metadata.insert(
            "transcription_failed_at".into(),
            time::to_db_timestamp(time::now()).into(),
        );

        let applied = self
            .write_transition(
                row.id,
                TranscriptionStatus::Processing,
                attempt_of(&row),
                TranscriptionStatus::Failed,
                row.transcription.as_deref(),
                &Value::Object(metadata),
            )
            .await?;

        let current = self.reload(row.id).await?;
        if !applied {
            return Ok(not_applied(current));
        }

        tracing::warn!(
            evidence_id = %row.id,
            user_id = %row.user_id,
            reason,
            "Transcription failed"
        );
        self.event_bus.emit_lossy(ReclaimEvent::TranscriptionFailed {
            evidence_id: row.id,
            user_id: row.user_id,
            reason: reason.to_string(),
            timestamp: time::now(),
        });

        Ok(ReconcileOutcome::Applied(current))
    }

    /// Fail a `processing` row; no-op if it already left `processing`
    async fn fail(&self, evidence_id: Uuid, reason: &str) -> TranscriptionResult<ReconcileOutcome> {
        let row = self.reload(evidence_id).await?;
        if row.transcription_status != Some(TranscriptionStatus::Processing) {
            return Ok(ReconcileOutcome::AlreadyResolved(row));
        }
        self.fail_row(row, reason).await
    }

    /// Stop the in-flight poller and mark the row failed (`cancelled`)
    pub async fn cancel(&self, user_id: Uuid, evidence_id: Uuid) -> TranscriptionResult<EvidenceFile> {
        let row = evidence::get_evidence(&self.db, user_id, evidence_id)
            .await?
            .ok_or(TranscriptionError::NotFound)?;

        if row.transcription_status != Some(TranscriptionStatus::Processing) {
            return Err(TranscriptionError::NotProcessing);
        }

        let had_poller = self.pollers.cancel(evidence_id).await;
        tracing::info!(evidence_id = %evidence_id, had_poller, "Cancelling transcription");

        Ok(self.fail(evidence_id, CANCELLED_REASON).await?.into_evidence())
    }

    /// Stop polling a row that is being deleted
    pub async fn forget(&self, evidence_id: Uuid) -> bool {
        self.pollers.cancel(evidence_id).await
    }

    /// Reconcile `processing` rows not written for the stale threshold
    ///
    /// Rows processing longer than the job timeout, and rows whose
    /// submission never recorded a job id, are failed outright.
    pub async fn sweep_stale(&self, user_id: Option<Uuid>) -> TranscriptionResult<SweepReport> {
        let now = time::now();
        let stale_cutoff = now - to_chrono(self.stale_after);
        let rows = evidence::stale_processing(&self.db, stale_cutoff, user_id).await?;

        let mut report = SweepReport {
            examined: rows.len(),
            ..Default::default()
        };

        for row in rows {
            let id = row.id;
            let result = if now - processing_since(&row) > to_chrono(self.job_timeout) {
                self.fail_row(row, "transcription timed out").await
            } else if row.transcription_job_id().is_none() {
                self.fail_row(row, "submission did not complete").await
            } else {
                self.reconcile(id).await
            };

            match result {
                Ok(outcome) => match outcome.evidence().transcription_status {
                    Some(TranscriptionStatus::Completed) => report.completed += 1,
                    Some(TranscriptionStatus::Failed) => report.failed += 1,
                    _ => report.still_processing += 1,
                },
                Err(TranscriptionError::NotFound) => {}
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(evidence_id = %id, error = %e, "Sweep reconcile failed");
                }
            }
        }

        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                completed = report.completed,
                failed = report.failed,
                still_processing = report.still_processing,
                errors = report.errors,
                "Stale transcription sweep finished"
            );
        }

        Ok(report)
    }

    /// Run [`sweep_stale`](Self::sweep_stale) every `interval` until `shutdown`
    pub fn spawn_sweeper(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        this.pollers.cancel_all().await;
                        tracing::info!("Transcription sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = this.sweep_stale(None).await {
                            tracing::error!(error = %e, "Transcription sweep failed");
                        }
                    }
                }
            }
        })
    }

    /// Poll one row in the background until it resolves
    async fn spawn_poller(&self, evidence_id: Uuid) {
        let (generation, token) = self.pollers.register(evidence_id).await;
        let this = self.clone();

        tokio::spawn(async move {
            let outcome = poll_with_backoff("transcription_poll", &this.policy, &token, || {
                let this = this.clone();
                async move {
                    match this.reconcile(evidence_id).await {
                        Ok(ReconcileOutcome::StillProcessing(_)) => Ok(None),
                        Ok(outcome) => Ok(Some(Some(outcome))),
                        // Row deleted while polling
                        Err(TranscriptionError::NotFound) => Ok(Some(None)),
                        Err(e) => Err(e),
                    }
                }
            })
            .await;

            match outcome {
                PollOutcome::Resolved(Some(outcome)) => {
                    tracing::debug!(
                        evidence_id = %evidence_id,
                        outcome = outcome.as_str(),
                        "Poller finished"
                    );
                }
                PollOutcome::Resolved(None) => {
                    tracing::debug!(evidence_id = %evidence_id, "Evidence removed while polling");
                }
                PollOutcome::TimedOut { attempts } => {
                    tracing::warn!(
                        evidence_id = %evidence_id,
                        attempts,
                        "Poll budget exhausted, leaving row to the sweeper"
                    );
                }
                // The row is not touched here: a user cancel already failed
                // it, a newer attempt owns it, or the service is stopping and
                // the sweeper picks it up after restart
                PollOutcome::Cancelled => {
                    tracing::debug!(evidence_id = %evidence_id, "Poller stopped");
                }
            }

            this.pollers.unregister(evidence_id, generation).await;
        });
    }

    async fn write_transition(
        &self,
        evidence_id: Uuid,
        expected: TranscriptionStatus,
        expected_attempt: Option<i64>,
        next: TranscriptionStatus,
        transcription: Option<&str>,
        metadata: &Value,
    ) -> TranscriptionResult<bool> {
        let applied = retry_on_lock("transcription_transition", DEFAULT_MAX_LOCK_WAIT, || {
            evidence::transition(
                &self.db,
                evidence_id,
                expected,
                expected_attempt,
                next,
                transcription,
                metadata,
            )
        })
        .await?;
        Ok(applied)
    }

    async fn reload(&self, evidence_id: Uuid) -> TranscriptionResult<EvidenceFile> {
        evidence::load_evidence(&self.db, evidence_id)
            .await?
            .ok_or(TranscriptionError::NotFound)
    }
}

fn metadata_map(metadata: &Value) -> Map<String, Value> {
    metadata.as_object().cloned().unwrap_or_default()
}

/// Outcome for a write that lost its conditional update: either another
/// writer resolved the row or a newer attempt is now processing it
fn not_applied(current: EvidenceFile) -> ReconcileOutcome {
    if current.transcription_status == Some(TranscriptionStatus::Processing) {
        ReconcileOutcome::StillProcessing(current)
    } else {
        ReconcileOutcome::AlreadyResolved(current)
    }
}

/// Attempt number the row was on when it was read
fn attempt_of(row: &EvidenceFile) -> Option<i64> {
    row.metadata
        .get("transcription_attempts")
        .and_then(Value::as_i64)
}

/// When the current processing attempt began
fn processing_since(row: &EvidenceFile) -> DateTime<Utc> {
    row.metadata
        .get("transcription_started_at")
        .and_then(Value::as_str)
        .and_then(|s| time::parse_db_timestamp(s).ok())
        .unwrap_or(row.updated_at)
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}
