//! Polling a remote job until it finishes or the wait budget runs out.
//!
//! The waiter only ever reads job state. A timed-out job keeps running
//! remotely; its handle and last snapshot are returned alongside the fallback
//! so callers can reconcile it later.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tuneflow_abstraction::{JobHandle, JobSnapshot, JobStatus, JobStatusSource};

use crate::error::{TrainingResult, WaitError};
use crate::policy::WaitPolicy;
use crate::progress::{ProgressSink, TracingProgressSink, WaitEvent};
use crate::retry::{retry_with_backoff, RetryFailure, RetryPolicy};

/// Longest budget honoured by the waiter (about 30 years); larger ones never expire.
pub const UNBOUNDED_WAIT: Duration = Duration::from_secs(86_400 * 365 * 30);

/// State of a single wait.
///
/// `Waiting` is the only non-terminal state. A cancelled wait finishes while
/// still `Waiting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    Waiting,
    Succeeded,
    Failed,
    TimedOut,
}

impl WaitState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Waiting)
    }
}

/// Which path produced the returned snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitPath {
    /// The job reached a terminal status within the budget.
    Completed,
    /// The budget ran out; the snapshot belongs to the fallback job.
    TimedOutWithFallback {
        /// The job that was given up on. It may still finish remotely.
        abandoned: JobHandle,
        /// Last snapshot observed for the abandoned job.
        abandoned_snapshot: JobSnapshot,
    },
    /// The budget ran out and no fallback was configured; the snapshot is the
    /// last non-terminal one observed.
    TimedOutNoFallback,
}

/// Result of a wait that did not abort with an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOutcome {
    /// Job the snapshot belongs to (the fallback job on the fallback path).
    pub handle: JobHandle,
    pub snapshot: JobSnapshot,
    pub path: WaitPath,
    /// Poll cycles spent on the original job.
    pub polls: u32,
    /// Time spent waiting.
    pub waited: Duration,
}

impl WaitOutcome {
    #[must_use]
    pub fn state(&self) -> WaitState {
        match self.path {
            WaitPath::Completed if self.snapshot.has_succeeded() => WaitState::Succeeded,
            WaitPath::Completed => WaitState::Failed,
            WaitPath::TimedOutWithFallback { .. } | WaitPath::TimedOutNoFallback => WaitState::TimedOut,
        }
    }

    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.state() == WaitState::TimedOut
    }

    /// The job given up on, when the fallback path was taken.
    #[must_use]
    pub fn abandoned(&self) -> Option<(&JobHandle, &JobSnapshot)> {
        match &self.path {
            WaitPath::TimedOutWithFallback { abandoned, abandoned_snapshot } => {
                Some((abandoned, abandoned_snapshot))
            }
            _ => None,
        }
    }

    /// Collapses the outcome into the snapshot of a usable, succeeded job.
    ///
    /// # Errors
    /// `JobFailed` if the returned job failed, `TimeoutNoFallback` if the
    /// budget ran out without a fallback, `FallbackNotReady` if the fallback
    /// job has not finished either.
    pub fn into_result(self) -> Result<JobSnapshot, WaitError> {
        let Self { handle, snapshot, path, waited, .. } = self;
        if path == WaitPath::TimedOutNoFallback {
            return Err(WaitError::TimeoutNoFallback { handle, snapshot, waited });
        }
        match snapshot.status {
            JobStatus::Succeeded => Ok(snapshot),
            JobStatus::Failed => Err(WaitError::JobFailed { handle, detail: snapshot.error }),
            status => Err(WaitError::FallbackNotReady { fallback: handle, status }),
        }
    }
}

/// Polls a remote job through a [`JobStatusSource`] under a [`WaitPolicy`].
pub struct AsyncJobWaiter {
    source: Arc<dyn JobStatusSource>,
    policy: WaitPolicy,
    retry: RetryPolicy,
    progress: Arc<dyn ProgressSink>,
}

impl AsyncJobWaiter {
    #[must_use]
    pub fn new(source: Arc<dyn JobStatusSource>, policy: WaitPolicy) -> Self {
        Self {
            source,
            policy,
            retry: RetryPolicy::default(),
            progress: Arc::new(TracingProgressSink),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn policy(&self) -> &WaitPolicy {
        &self.policy
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Waits for `handle` to reach a terminal status.
    ///
    /// # Errors
    /// See [`AsyncJobWaiter::wait_with_cancellation`].
    pub async fn wait(&self, handle: &JobHandle) -> Result<WaitOutcome, WaitError> {
        self.wait_with_cancellation(handle, &CancellationToken::new()).await
    }

    /// Waits for `handle` and returns only a succeeded snapshot (the fallback's,
    /// if the budget ran out).
    ///
    /// # Errors
    /// Everything [`AsyncJobWaiter::wait_with_cancellation`] returns, plus
    /// `JobFailed`, `TimeoutNoFallback` and `FallbackNotReady` from
    /// [`WaitOutcome::into_result`], all wrapped in `TrainingError::Wait`.
    pub async fn wait_for_success(&self, handle: &JobHandle) -> TrainingResult<JobSnapshot> {
        let outcome = self.wait(handle).await?;
        if let Some((abandoned, last)) = outcome.abandoned() {
            info!(abandoned = %abandoned, status = %last.status, "Continuing with fallback job");
        }
        Ok(outcome.into_result()?)
    }

    /// Waits for `handle` to reach a terminal status, stopping early when
    /// `cancel` fires between poll cycles.
    ///
    /// # Errors
    /// - `InvalidPolicy` if the wait or retry policy is unusable
    /// - `Query` on a non-retryable status query error
    /// - `PersistentQuery` after `max_consecutive_failures` failed cycles
    /// - `FallbackQuery` if the fallback job could not be queried
    /// - `Cancelled` if `cancel` fired
    pub async fn wait_with_cancellation(
        &self,
        handle: &JobHandle,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome, WaitError> {
        self.policy.validate()?;
        self.retry.validate().map_err(WaitError::InvalidPolicy)?;

        let started = Instant::now();
        self.progress.on_event(WaitEvent::Started { handle: handle.clone() });

        let mut last: Option<JobSnapshot> = None;
        let mut deadline: Option<Instant> = None;
        let mut polls = 0u32;
        let mut consecutive_failures = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(self.cancelled(handle, last, polls));
            }

            polls += 1;
            match self.poll_cycle(handle).await {
                Ok(snapshot) => {
                    consecutive_failures = 0;
                    if let Some(previous) = &last
                        && snapshot.status.rank() < previous.status.rank()
                    {
                        self.progress.on_event(WaitEvent::StatusRegressed {
                            handle: handle.clone(),
                            from: previous.status,
                            to: snapshot.status,
                        });
                    }
                    self.progress.on_event(WaitEvent::Polled {
                        handle: handle.clone(),
                        poll: polls,
                        status: snapshot.status,
                        elapsed: started.elapsed(),
                    });

                    if snapshot.is_terminal() {
                        return Ok(self.finish(WaitOutcome {
                            handle: handle.clone(),
                            snapshot,
                            path: WaitPath::Completed,
                            polls,
                            waited: started.elapsed(),
                        }));
                    }
                    if deadline.is_none() {
                        deadline = Some(self.deadline_for(&snapshot));
                    }
                    last = Some(snapshot);
                }
                Err(WaitError::TransientQuery { source, .. }) => {
                    consecutive_failures += 1;
                    self.progress.on_event(WaitEvent::CycleFailed {
                        handle: handle.clone(),
                        consecutive_failures,
                        error: source.to_string(),
                    });
                    if consecutive_failures >= self.policy.max_consecutive_failures {
                        return Err(WaitError::PersistentQuery {
                            handle: handle.clone(),
                            failures: consecutive_failures,
                            last: source,
                        });
                    }
                }
                Err(error) => return Err(error),
            }

            if let (Some(at), Some(snapshot)) = (deadline, &last)
                && Instant::now() >= at
            {
                return self.time_out(handle, snapshot.clone(), started, polls).await;
            }

            let nap = deadline.map_or(self.policy.poll_interval, |at| {
                self.policy.poll_interval.min(at.saturating_duration_since(Instant::now()))
            });
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(self.cancelled(handle, last, polls)),
                () = tokio::time::sleep(nap) => {}
            }

            if let (Some(at), Some(snapshot)) = (deadline, &last)
                && Instant::now() >= at
            {
                return self.time_out(handle, snapshot.clone(), started, polls).await;
            }
        }
    }

    /// One poll cycle: a status query with in-cycle retries.
    async fn poll_cycle(&self, handle: &JobHandle) -> Result<JobSnapshot, WaitError> {
        self.query_with_retry(handle).await.map_err(|failure| match failure {
            RetryFailure::Exhausted { attempts, last } => {
                WaitError::TransientQuery { handle: handle.clone(), attempts, source: last }
            }
            RetryFailure::NotRetryable(source) => WaitError::Query { handle: handle.clone(), source },
        })
    }

    async fn query_with_retry(&self, handle: &JobHandle) -> Result<JobSnapshot, RetryFailure> {
        retry_with_backoff(
            &self.retry,
            |attempt, delay, error| {
                self.progress.on_event(WaitEvent::QueryRetry {
                    handle: handle.clone(),
                    attempt,
                    delay,
                    error: error.to_string(),
                });
            },
            |_| self.source.query(handle),
        )
        .await
    }

    /// Deadline on the tokio clock, measured from the job's creation time.
    ///
    /// Budgets too large for the clock are capped at [`UNBOUNDED_WAIT`].
    fn deadline_for(&self, snapshot: &JobSnapshot) -> Instant {
        let age = (Utc::now() - snapshot.created_at).to_std().unwrap_or(Duration::ZERO);
        let remaining = self.policy.max_wait.saturating_sub(age).min(UNBOUNDED_WAIT);
        debug!(age = ?age, remaining = ?remaining, "Computed wait deadline");
        Instant::now() + remaining
    }

    async fn time_out(
        &self,
        handle: &JobHandle,
        snapshot: JobSnapshot,
        started: Instant,
        polls: u32,
    ) -> Result<WaitOutcome, WaitError> {
        let Some(fallback) = &self.policy.fallback_handle else {
            return Ok(self.finish(WaitOutcome {
                handle: handle.clone(),
                snapshot,
                path: WaitPath::TimedOutNoFallback,
                polls,
                waited: started.elapsed(),
            }));
        };

        self.progress.on_event(WaitEvent::FallingBack {
            abandoned: handle.clone(),
            fallback: fallback.clone(),
        });
        let fallback_snapshot = self
            .query_with_retry(fallback)
            .await
            .map_err(|source| WaitError::FallbackQuery { fallback: fallback.clone(), source })?;
        if !fallback_snapshot.is_terminal() {
            warn!(
                fallback = %fallback,
                status = %fallback_snapshot.status,
                "Fallback job has not finished"
            );
        }

        Ok(self.finish(WaitOutcome {
            handle: fallback.clone(),
            snapshot: fallback_snapshot,
            path: WaitPath::TimedOutWithFallback {
                abandoned: handle.clone(),
                abandoned_snapshot: snapshot,
            },
            polls,
            waited: started.elapsed(),
        }))
    }

    fn finish(&self, outcome: WaitOutcome) -> WaitOutcome {
        let handle = match outcome.abandoned() {
            Some((abandoned, _)) => abandoned.clone(),
            None => outcome.handle.clone(),
        };
        self.progress.on_event(WaitEvent::Finished {
            handle,
            state: outcome.state(),
            polls: outcome.polls,
        });
        outcome
    }

    fn cancelled(&self, handle: &JobHandle, last: Option<JobSnapshot>, polls: u32) -> WaitError {
        info!(handle = %handle, polls, "Wait cancelled");
        self.progress.on_event(WaitEvent::Finished {
            handle: handle.clone(),
            state: WaitState::Waiting,
            polls,
        });
        WaitError::Cancelled { handle: handle.clone(), last }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tuneflow_abstraction::JobErrorDetail;

    fn snapshot(status: JobStatus) -> JobSnapshot {
        JobSnapshot::new(status, Utc::now())
    }

    fn outcome(snapshot: JobSnapshot, path: WaitPath) -> WaitOutcome {
        WaitOutcome {
            handle: JobHandle::new("jobs/1"),
            snapshot,
            path,
            polls: 1,
            waited: Duration::ZERO,
        }
    }

    #[test]
    fn test_state_follows_path_and_status() {
        let done = outcome(snapshot(JobStatus::Succeeded), WaitPath::Completed);
        assert_eq!(done.state(), WaitState::Succeeded);
        assert!(done.state().is_terminal());

        let failed = outcome(snapshot(JobStatus::Failed), WaitPath::Completed);
        assert_eq!(failed.state(), WaitState::Failed);

        let timed_out = outcome(snapshot(JobStatus::Running), WaitPath::TimedOutNoFallback);
        assert_eq!(timed_out.state(), WaitState::TimedOut);
        assert!(timed_out.timed_out());
        assert!(!WaitState::Waiting.is_terminal());
    }

    #[test]
    fn test_into_result_maps_failures() {
        let detail = JobErrorDetail { code: Some(13), message: "internal".to_string() };
        let failed = outcome(snapshot(JobStatus::Failed).with_error(detail.clone()), WaitPath::Completed);
        assert_eq!(
            failed.into_result(),
            Err(WaitError::JobFailed { handle: JobHandle::new("jobs/1"), detail: Some(detail) })
        );

        let timed_out = outcome(snapshot(JobStatus::Running), WaitPath::TimedOutNoFallback);
        let err = timed_out.into_result().unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_into_result_accepts_succeeded_fallback() {
        let abandoned_snapshot = snapshot(JobStatus::Running);
        let fallback = outcome(
            snapshot(JobStatus::Succeeded),
            WaitPath::TimedOutWithFallback {
                abandoned: JobHandle::new("jobs/slow"),
                abandoned_snapshot: abandoned_snapshot.clone(),
            },
        );
        let (abandoned, last) = fallback.abandoned().unwrap();
        assert_eq!(abandoned.as_str(), "jobs/slow");
        assert_eq!(last, &abandoned_snapshot);
        assert_eq!(fallback.into_result().unwrap().status, JobStatus::Succeeded);

        let not_ready = outcome(
            snapshot(JobStatus::Pending),
            WaitPath::TimedOutWithFallback {
                abandoned: JobHandle::new("jobs/slow"),
                abandoned_snapshot,
            },
        );
        assert!(matches!(
            not_ready.into_result(),
            Err(WaitError::FallbackNotReady { status: JobStatus::Pending, .. })
        ));
    }
}
