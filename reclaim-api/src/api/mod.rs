//! HTTP API handlers for reclaim-api

pub mod ai;
pub mod auth;
pub mod boundaries;
pub mod buildinfo;
pub mod evidence;
pub mod extract;
pub mod health;
pub mod journal;
pub mod patterns;
pub mod profile;
pub mod sse;
pub mod storage;
pub mod subscription;
pub mod transcription;

pub use ai::ai_routes;
pub use auth::{require_auth, AuthUser};
pub use boundaries::boundary_routes;
pub use buildinfo::get_build_info;
pub use evidence::evidence_routes;
pub use extract::ApiJson;
pub use health::health_routes;
pub use journal::journal_routes;
pub use patterns::pattern_routes;
pub use profile::profile_routes;
pub use sse::sse_routes;
pub use storage::storage_routes;
pub use subscription::{subscription_routes, usage_routes};
pub use transcription::transcription_routes;
