use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use tuneflow_abstraction::{JobHandle, JobStatus};

use crate::waiter::WaitState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WaitEvent {
    Started { handle: JobHandle },
    Polled { handle: JobHandle, poll: u32, status: JobStatus, elapsed: Duration },
    QueryRetry { handle: JobHandle, attempt: u32, delay: Duration, error: String },
    CycleFailed { handle: JobHandle, consecutive_failures: u32, error: String },
    StatusRegressed { handle: JobHandle, from: JobStatus, to: JobStatus },
    FallingBack { abandoned: JobHandle, fallback: JobHandle },
    Finished { handle: JobHandle, state: WaitState, polls: u32 },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: WaitEvent);
}

/// Drops every event.
#[derive(Debug, Default)]
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn on_event(&self, _event: WaitEvent) {}
}

/// Logs every event through `tracing`.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: WaitEvent) {
        match event {
            WaitEvent::Started { handle } => info!(handle = %handle, "Waiting for job"),
            WaitEvent::Polled { handle, poll, status, elapsed } => {
                info!(handle = %handle, poll, status = %status, elapsed = ?elapsed, "Job status");
            }
            WaitEvent::QueryRetry { handle, attempt, delay, error } => {
                debug!(handle = %handle, attempt, delay = ?delay, error = %error, "Retrying status query");
            }
            WaitEvent::CycleFailed { handle, consecutive_failures, error } => {
                warn!(handle = %handle, consecutive_failures, error = %error, "Poll cycle failed");
            }
            WaitEvent::StatusRegressed { handle, from, to } => {
                warn!(handle = %handle, from = %from, to = %to, "Job status moved backwards");
            }
            WaitEvent::FallingBack { abandoned, fallback } => {
                warn!(
                    abandoned = %abandoned,
                    fallback = %fallback,
                    "Wait budget exhausted, using fallback job"
                );
            }
            WaitEvent::Finished { handle, state, polls } => {
                info!(handle = %handle, state = ?state, polls, "Finished waiting for job");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn every_event() -> Vec<WaitEvent> {
        let handle = JobHandle::new("tunedModels/x");
        vec![
            WaitEvent::Started { handle: handle.clone() },
            WaitEvent::Polled {
                handle: handle.clone(),
                poll: 1,
                status: JobStatus::Running,
                elapsed: Duration::from_secs(1),
            },
            WaitEvent::QueryRetry {
                handle: handle.clone(),
                attempt: 1,
                delay: Duration::from_secs(1),
                error: "quota".to_string(),
            },
            WaitEvent::CycleFailed { handle: handle.clone(), consecutive_failures: 2, error: "quota".to_string() },
            WaitEvent::StatusRegressed { handle: handle.clone(), from: JobStatus::Running, to: JobStatus::Pending },
            WaitEvent::FallingBack { abandoned: handle.clone(), fallback: JobHandle::new("tunedModels/y") },
            WaitEvent::Finished { handle, state: WaitState::TimedOut, polls: 3 },
        ]
    }

    #[test]
    fn test_events_serialize_with_type_tag() {
        let tags: Vec<String> = every_event()
            .iter()
            .map(|event| serde_json::to_value(event).unwrap()["type"].as_str().unwrap().to_string())
            .collect();

        assert_eq!(
            tags,
            [
                "started",
                "polled",
                "query_retry",
                "cycle_failed",
                "status_regressed",
                "falling_back",
                "finished"
            ]
        );

        let finished = serde_json::to_value(every_event().pop().unwrap()).unwrap();
        assert_eq!(finished["state"], "timed_out");
        assert_eq!(finished["handle"], "tunedModels/x");
    }

    #[test]
    fn test_sinks_accept_every_event() {
        for event in every_event() {
            TracingProgressSink.on_event(event.clone());
            NoopProgressSink.on_event(event);
        }
    }
}
