//! Retry for transient SQLite lock contention
//!
//! Status writers (pollers, on-demand reconciles, the sweeper) can collide
//! on the same row. The busy timeout covers most collisions; this covers the
//! `database is locked` errors that still escape it.

use std::future::Future;
use std::time::{Duration, Instant};

use reclaim_common::{Error, Result};

/// Total time a write may spend retrying
pub const DEFAULT_MAX_LOCK_WAIT: Duration = Duration::from_secs(5);

fn is_lock_error(err: &Error) -> bool {
    match err {
        Error::Database(db_err) => {
            let message = db_err.to_string();
            message.contains("database is locked") || message.contains("database table is locked")
        }
        _ => false,
    }
}

/// Retry `operation` with exponential backoff (10ms doubling, capped at
/// 500ms) while it fails with a lock error and `max_wait` has not elapsed
///
/// Any other error is returned immediately.
pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, max_wait: Duration, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let mut attempt = 0u32;
    let mut backoff = Duration::from_millis(10);

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Database write succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if is_lock_error(&err) => {
                let elapsed = start.elapsed();
                if elapsed >= max_wait {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Database still locked, giving up"
                    );
                    return Err(Error::Internal(format!(
                        "{}: database locked after {} attempts",
                        operation_name, attempt
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Database locked, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_millis(500));
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_success_is_returned_immediately() {
        let result = retry_on_lock("op", DEFAULT_MAX_LOCK_WAIT, || async { Ok::<_, Error>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<()> = retry_on_lock("op", DEFAULT_MAX_LOCK_WAIT, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::NotFound("row".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lock_detection_ignores_non_database_errors() {
        assert!(!is_lock_error(&Error::Internal("database is locked".into())));
        assert!(!is_lock_error(&Error::Database(sqlx::Error::RowNotFound)));
    }
}
