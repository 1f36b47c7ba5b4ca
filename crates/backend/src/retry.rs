//! Bounded exponential-backoff retries for backend submission.
//!
//! Only transient errors ([`BackendError::is_transient`]) are retried; a
//! rejection fails immediately. After `max_attempts` the last error is
//! returned and the dispatcher records a `SUBMISSION_ERROR`.

use std::time::Duration;

use evalhub_core::backend::{BackendError, BackendHandle, ExecutionBackend};
use evalhub_core::status::JobType;
use evalhub_core::types::JobId;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Tunable parameters for the submission backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total submission attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`RetryConfig::max_delay`].
pub fn next_delay(current: Duration, config: &RetryConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Submit work, retrying transient failures with exponential backoff.
///
/// Returns early with the last error if `cancel` fires while waiting.
pub async fn submit_with_retry(
    backend: &dyn ExecutionBackend,
    job_id: JobId,
    job_type: JobType,
    spec: &Value,
    config: &RetryConfig,
    cancel: &CancellationToken,
) -> Result<BackendHandle, BackendError> {
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let err = match backend.submit_work(job_id, job_type, spec).await {
            Ok(handle) => {
                if attempt > 1 {
                    tracing::info!(%job_id, attempt, backend = backend.name(), "Submission succeeded after retry");
                }
                return Ok(handle);
            }
            Err(e) => e,
        };

        if !err.is_transient() || attempt >= max_attempts {
            tracing::warn!(
                %job_id,
                attempt,
                backend = backend.name(),
                error = %err,
                "Submission failed permanently",
            );
            return Err(err);
        }

        tracing::warn!(
            %job_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Submission attempt {attempt} failed, retrying",
        );

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return Err(err),
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }
}
