//! Retry with exponential backoff for operations against external services.
//!
//! The delay sequence is deterministic: `initial_delay × multiplier^(n-1)`,
//! capped at `max_delay`, with no jitter. An optional allow-list restricts
//! which error kinds are worth retrying; an empty list retries everything.
//! The error surfaced after the final attempt is the last attempt's error,
//! wrapped with the attempt count — never an aggregate.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, ErrorKind, Result};

/// Observer invoked on each retry with the error and the attempt number
/// that just failed. Lets callers assert on retry behavior in tests and
/// feed external telemetry without global state.
pub type RetryObserver<'a> = &'a (dyn Fn(&Error, u32) + Send + Sync);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Error kinds worth retrying. Empty means every error is retryable.
    pub retryable: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
            retryable: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// Policy that retries only transient and rate-limit failures, the
    /// standard tuning for connector HTTP calls.
    pub fn for_external_calls() -> Self {
        Self {
            retryable: vec![ErrorKind::Transient, ErrorKind::RateLimited],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    fn should_retry(&self, error: &Error) -> bool {
        if self.retryable.is_empty() {
            return true;
        }
        self.retryable.contains(&error.kind())
    }

    /// Backoff delay after the given (1-based) failed attempt.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * exp)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

/// Run `op` until it succeeds or the policy's attempts are exhausted.
///
/// Errors outside the allow-list propagate immediately without retry.
/// After the final attempt the last error is returned wrapped in
/// [`Error::RetriesExhausted`].
pub async fn retry_with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    observer: Option<RetryObserver<'_>>,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !policy.should_retry(&error) {
                    return Err(error);
                }

                if attempt == policy.max_attempts {
                    last_error = Some(error);
                    break;
                }

                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying after failure"
                );
                if let Some(on_retry) = observer {
                    on_retry(&error, attempt);
                }
                last_error = Some(error);

                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(Error::RetriesExhausted {
        attempts: policy.max_attempts,
        source: Box::new(last_error.expect("at least one attempt ran")),
    })
}
