//! API module for shared HTTP API functionality
//!
//! # Design Principle
//!
//! This module contains ONLY:
//! - Pure functions (no HTTP framework dependencies)
//! - Database operations (via sqlx)
//! - Shared types
//!
//! The service wraps these with framework-specific middleware (Axum).

pub mod auth;
pub mod types;

pub use auth::{
    constant_time_eq, generate_token, hash_token, load_or_initialize_secret, parse_bearer,
    sign_payload, ApiAuthError,
};
pub use types::{ErrorBody, ErrorResponse};
