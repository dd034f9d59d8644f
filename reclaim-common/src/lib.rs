//! # Reclaim Common Library
//!
//! Shared code for the Reclaim backend including:
//! - Entity models (tiers, journal entries, evidence files, boundaries)
//! - Database initialization and schema migrations
//! - Event types and the EventBus used for transcription lifecycle events
//! - Bearer-token generation and hashing
//! - Configuration loading
//! - Timestamp helpers

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
