use std::time::Duration;

use thiserror::Error;
use tuneflow_abstraction::{JobErrorDetail, JobHandle, JobSnapshot, JobStatus, ServiceError};

use crate::retry::RetryFailure;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Typed outcomes of waiting on a remote job that are not a plain success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    /// A single poll cycle gave up after its retries. Absorbed by the waiter
    /// unless it repeats `max_consecutive_failures` times.
    #[error("status query for job {handle} failed after {attempts} attempts: {source}")]
    TransientQuery { handle: JobHandle, attempts: u32, source: ServiceError },

    #[error("status query for job {handle} failed {failures} consecutive poll cycles: {last}")]
    PersistentQuery { handle: JobHandle, failures: u32, last: ServiceError },

    #[error("status query for job {handle} failed: {source}")]
    Query { handle: JobHandle, source: ServiceError },

    #[error("status query for fallback job {fallback} failed: {source}")]
    FallbackQuery { fallback: JobHandle, source: RetryFailure },

    #[error("job {handle} failed{}", detail.as_ref().map(|d| format!(": {d}")).unwrap_or_default())]
    JobFailed { handle: JobHandle, detail: Option<JobErrorDetail> },

    #[error("job {handle} still {} after waiting {waited:?}", snapshot.status)]
    TimeoutNoFallback { handle: JobHandle, snapshot: JobSnapshot, waited: Duration },

    #[error("fallback job {fallback} is not ready (status {status})")]
    FallbackNotReady { fallback: JobHandle, status: JobStatus },

    #[error("wait for job {handle} was cancelled")]
    Cancelled { handle: JobHandle, last: Option<JobSnapshot> },

    #[error("invalid wait policy: {0}")]
    InvalidPolicy(String),
}

impl WaitError {
    /// True for the degraded-but-usable timeout result.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimeoutNoFallback { .. })
    }
}
