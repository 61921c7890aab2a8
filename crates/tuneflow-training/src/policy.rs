use std::time::Duration;

use tuneflow_abstraction::JobHandle;

use crate::error::WaitError;

/// How long and how often to wait for a remote job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Delay between two status queries.
    pub poll_interval: Duration,
    /// Budget measured from the job's `created_at`.
    pub max_wait: Duration,
    /// Already-completed job substituted when the budget runs out.
    pub fallback_handle: Option<JobHandle>,
    /// Consecutive failed poll cycles after which the wait aborts.
    pub max_consecutive_failures: u32,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            max_wait: Duration::from_secs(10 * 60),
            fallback_handle: None,
            max_consecutive_failures: 3,
        }
    }
}

impl WaitPolicy {
    #[must_use]
    pub fn new(poll_interval: Duration, max_wait: Duration) -> Self {
        Self { poll_interval, max_wait, ..Self::default() }
    }

    #[must_use]
    pub fn with_fallback(mut self, handle: impl Into<JobHandle>) -> Self {
        self.fallback_handle = Some(handle.into());
        self
    }

    #[must_use]
    pub fn with_max_consecutive_failures(mut self, failures: u32) -> Self {
        self.max_consecutive_failures = failures;
        self
    }

    pub fn validate(&self) -> Result<(), WaitError> {
        if self.poll_interval.is_zero() {
            return Err(WaitError::InvalidPolicy("poll_interval must be > 0".to_string()));
        }
        if self.max_consecutive_failures == 0 {
            return Err(WaitError::InvalidPolicy(
                "max_consecutive_failures must be >= 1".to_string(),
            ));
        }
        if let Some(fallback) = &self.fallback_handle {
            if fallback.as_str().trim().is_empty() {
                return Err(WaitError::InvalidPolicy("fallback_handle must not be empty".to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        let policy = WaitPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.max_wait, Duration::from_secs(600));
        assert!(policy.fallback_handle.is_none());
    }

    #[test]
    fn test_validate_rejects_zero_interval_and_blank_fallback() {
        let policy = WaitPolicy::new(Duration::ZERO, Duration::from_secs(1));
        assert!(matches!(policy.validate(), Err(WaitError::InvalidPolicy(_))));

        let policy = WaitPolicy::new(Duration::from_secs(1), Duration::from_secs(1)).with_fallback(" ");
        assert!(policy.validate().is_err());

        let policy = WaitPolicy::default().with_max_consecutive_failures(0);
        assert!(policy.validate().is_err());
    }
}
