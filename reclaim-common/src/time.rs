//! Timestamp utilities
//!
//! All timestamps are persisted as RFC 3339 UTC strings with millisecond
//! precision and a `Z` suffix, so lexicographic order in SQL matches
//! chronological order.

use chrono::{DateTime, Datelike, SecondsFormat, Utc};

use crate::{Error, Result};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Format a timestamp for storage
pub fn to_db_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a timestamp previously written by [`to_db_timestamp`]
pub fn parse_db_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid stored timestamp '{}': {}", value, e)))
}

/// Billing period (`YYYY-MM`, UTC calendar month) containing `ts`
pub fn billing_period(ts: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", ts.year(), ts.month())
}
