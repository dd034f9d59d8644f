//! Service layer
//!
//! External provider clients sit behind [`TranscriptionProvider`] and
//! [`TextGenerator`] so handlers and tests can swap implementations.

pub mod feature_gate;
pub mod gemini_client;
pub mod gladia_client;
pub mod pattern_analyzer;
pub mod poll_policy;
pub mod reconciler;
pub mod storage;
pub mod title_suggester;
pub mod transcript_extractor;

pub use feature_gate::{Feature, LimitCheck};
pub use gemini_client::{GeminiClient, GeminiError, TextGenerator};
pub use gladia_client::{GladiaClient, GladiaError, SubmittedJob, TranscriptionProvider};
pub use poll_policy::{PollOutcome, PollPolicy};
pub use reconciler::{ReconcileOutcome, SweepReport, TranscriptionError, TranscriptionReconciler};
pub use storage::StorageService;
pub use transcript_extractor::{extract_transcript, JobStatus, TranscriptSnapshot};
