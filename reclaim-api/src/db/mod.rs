//! Database access for reclaim-api
//!
//! One module per table. Every query is scoped by `user_id` where the table
//! has an owner, so a row belonging to another user is indistinguishable
//! from a missing row.

pub mod boundaries;
pub mod evidence;
pub mod journal;
pub mod patterns;
pub mod profiles;
pub mod tokens;
pub mod usage;

use chrono::{DateTime, Utc};
use reclaim_common::{time, Error, Result};
use uuid::Uuid;

pub(crate) fn parse_uuid(value: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Invalid {} '{}': {}", column, value, e)))
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    time::parse_db_timestamp(value)
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(value: &str, column: &str) -> Result<T> {
    serde_json::from_str(value)
        .map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", column, e)))
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T, column: &str) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::Internal(format!("Failed to serialize {}: {}", column, e)))
}
