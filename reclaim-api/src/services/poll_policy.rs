//! Exponential-backoff polling
//!
//! Delay before attempt `n` (0-based) is `initial * 2^n`, capped at `max`.
//! With the defaults: 1s, 2s, 4s, 8s, 10s, 10s, ...

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use reclaim_common::config::TranscriptionConfig;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Wall-clock budget for the whole loop
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            timeout: Duration::from_secs(300),
        }
    }
}

impl PollPolicy {
    pub fn from_config(config: &TranscriptionConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            timeout: Duration::from_secs(config.poll_timeout_secs),
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// How a polling loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    Resolved(T),
    TimedOut { attempts: u32 },
    Cancelled,
}

/// Run `attempt` with backoff until it yields `Some`, the timeout elapses,
/// or `cancel` fires
///
/// `Ok(None)` means "not yet". `Err` is treated as transient: it is logged
/// and the loop continues within the timeout.
pub async fn poll_with_backoff<F, Fut, T, E>(
    operation_name: &str,
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: Display,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        let remaining = policy.timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            tracing::warn!(
                operation = operation_name,
                attempts,
                timeout_secs = policy.timeout.as_secs(),
                "Polling timed out"
            );
            return PollOutcome::TimedOut { attempts };
        }

        let delay = policy.delay_for_attempt(attempts).min(remaining);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(operation = operation_name, attempts, "Polling cancelled");
                return PollOutcome::Cancelled;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        attempts += 1;

        match attempt().await {
            Ok(Some(value)) => {
                tracing::debug!(
                    operation = operation_name,
                    attempts,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Polling resolved"
                );
                return PollOutcome::Resolved(value);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    operation = operation_name,
                    attempts,
                    error = %e,
                    "Poll attempt failed, will retry"
                );
            }
        }
    }
}
