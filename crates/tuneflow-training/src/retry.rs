//! Bounded retry with exponential backoff for service calls.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;
use tuneflow_abstraction::ServiceError;

/// Which service errors are retried, and how often.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first one. Must be >= 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Factor applied to the delay after every retry.
    pub backoff_multiplier: u32,
    /// Status codes treated as transient (rate limiting, overload).
    pub retryable_status_codes: BTreeSet<u16>,
    /// Whether transport failures (no response at all) are retried.
    pub retry_transport_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2,
            retryable_status_codes: BTreeSet::from([429, 503]),
            retry_transport_errors: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// Returns true if the error is transient under this policy.
    #[must_use]
    pub fn is_retryable(&self, error: &ServiceError) -> bool {
        match error {
            ServiceError::Status { code, .. } => self.retryable_status_codes.contains(code),
            ServiceError::Transport(_) => self.retry_transport_errors,
            ServiceError::Decode(_) | ServiceError::Other(_) => false,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// 1s → 2s → 4s → 8s → 10s (cap) with the default policy.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_backoff;
        for _ in 1..attempt {
            delay = delay.saturating_mul(self.backoff_multiplier);
            if delay >= self.max_backoff {
                break;
            }
        }
        delay.min(self.max_backoff)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be >= 1".to_string());
        }
        if self.backoff_multiplier == 0 {
            return Err("retry.backoff_multiplier must be >= 1".to_string());
        }
        if self.initial_backoff > self.max_backoff {
            return Err("retry.initial_backoff must not exceed retry.max_backoff".to_string());
        }
        Ok(())
    }
}

/// Why a retried call gave up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryFailure {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: ServiceError },

    #[error("non-retryable error: {0}")]
    NotRetryable(ServiceError),
}

impl RetryFailure {
    /// The service error that ended the call.
    #[must_use]
    pub fn last_error(&self) -> &ServiceError {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::NotRetryable(error) => error,
        }
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` attempts have been made.
///
/// `operation` receives the 1-based attempt number. `on_retry` is invoked
/// before every backoff sleep with the failed attempt number, the delay and
/// the error.
pub async fn retry_with_backoff<T, F, Fut, R>(
    policy: &RetryPolicy,
    mut on_retry: R,
    mut operation: F,
) -> Result<T, RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
    R: FnMut(u32, Duration, &ServiceError),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if !policy.is_retryable(&error) => {
                return Err(RetryFailure::NotRetryable(error));
            }
            Err(error) if attempt >= max_attempts => {
                return Err(RetryFailure::Exhausted { attempts: attempt, last: error });
            }
            Err(error) => {
                let delay = policy.backoff_for(attempt);
                debug!(attempt, delay = ?delay, error = %error, "Retryable service error, backing off");
                on_retry(attempt, delay, &error);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_default_predicate_matches_rate_limits() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retryable(&ServiceError::status(429, "quota")));
        assert!(policy.is_retryable(&ServiceError::status(503, "overloaded")));
        assert!(policy.is_retryable(&ServiceError::Transport("reset".to_string())));
        assert!(!policy.is_retryable(&ServiceError::status(400, "bad request")));
        assert!(!policy.is_retryable(&ServiceError::Decode("garbage".to_string())));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(4), Duration::from_secs(8));
        assert_eq!(policy.backoff_for(5), Duration::from_secs(10));
        assert_eq!(policy.backoff_for(50), Duration::from_secs(10));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let policy = RetryPolicy { max_attempts: 0, ..RetryPolicy::default() };
        assert!(policy.validate().is_err());
        assert!(RetryPolicy::default().validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let mut retries = Vec::new();

        let result = retry_with_backoff(
            &fast_policy(3),
            |attempt, delay, _| retries.push((attempt, delay)),
            |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 { Err(ServiceError::status(429, "quota")) } else { Ok("done") }
                }
            },
        )
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            retries,
            vec![(1, Duration::from_millis(10)), (2, Duration::from_millis(20))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempts() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_backoff(
            &fast_policy(2),
            |_, _, _| {},
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ServiceError::status(503, "overloaded")) }
            },
        )
        .await;

        let failure = result.unwrap_err();
        assert!(failure.is_exhausted());
        assert_eq!(failure.last_error().status_code(), Some(503));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_is_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_backoff(
            &fast_policy(5),
            |_, _, _| panic!("must not back off"),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ServiceError::status(404, "not found")) }
            },
        )
        .await;

        assert!(matches!(result, Err(RetryFailure::NotRetryable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
