//! Service abstraction layer for tuneflow.
//!
//! This module defines the vendor-agnostic types and traits for talking to a
//! hosted tuning/prediction service: remote job handles and snapshots, the
//! status-query capability, the job catalogue and the classifier.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Represents an error returned by an external service call.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceError {
    /// The service answered with a non-success status code.
    #[error("Service returned status {code}: {message}")]
    Status {
        /// Status code as reported by the service (HTTP-style).
        code: u16,
        /// Error message from the service.
        message: String,
    },

    /// The request never produced a response (connection reset, DNS, timeout).
    #[error("Transport Error: {0}")]
    Transport(String),

    /// The response could not be decoded.
    #[error("Decode Error: {0}")]
    Decode(String),

    /// Other unexpected errors.
    #[error("Other Service Error: {0}")]
    Other(String),
}

impl ServiceError {
    /// Convenience constructor for status errors.
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::Status { code, message: message.into() }
    }

    /// Returns the status code, if this error carries one.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Opaque identifier for a remotely executing job.
///
/// The job itself is owned by the external service; a handle only refers to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(pub String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for JobHandle {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobHandle {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle status of a remote job.
///
/// Transitions are monotonic: `Pending` → `Running` → `Succeeded` | `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted by the service but not yet started.
    Pending,
    /// Executing remotely.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
}

impl JobStatus {
    /// Returns true for statuses after which no further transitions occur.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Position in the lifecycle; terminal statuses share the highest rank.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Succeeded | Self::Failed => 2,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Error detail attached to a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobErrorDetail {
    /// Service-specific error code, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    /// Human readable error message.
    pub message: String,
}

impl std::fmt::Display for JobErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Immutable result of a single status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Status at the time of the query.
    pub status: JobStatus,
    /// When the service created the job.
    pub created_at: DateTime<Utc>,
    /// Error detail, usually only present for `Failed` jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobErrorDetail>,
}

impl JobSnapshot {
    #[must_use]
    pub fn new(status: JobStatus, created_at: DateTime<Utc>) -> Self {
        Self { status, created_at, error: None }
    }

    #[must_use]
    pub fn with_error(mut self, error: JobErrorDetail) -> Self {
        self.error = Some(error);
        self
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    #[must_use]
    pub fn has_succeeded(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}

/// One entry of a service's job catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobListing {
    pub handle: JobHandle,
    #[serde(default)]
    pub display_name: Option<String>,
    pub snapshot: JobSnapshot,
}

/// Read-only status query capability for remote jobs.
///
/// Implementations must be idempotent and side-effect free: the same handle
/// may be queried concurrently by independent callers.
#[async_trait]
pub trait JobStatusSource: Send + Sync {
    /// Fetches the current snapshot of the job.
    ///
    /// # Errors
    /// Returns a `ServiceError` if the service could not be reached or
    /// rejected the query.
    async fn query(&self, handle: &JobHandle) -> Result<JobSnapshot, ServiceError>;
}

/// Listing capability for the jobs known to a service.
#[async_trait]
pub trait JobCatalog: Send + Sync {
    /// Lists all jobs visible to the caller, in any order.
    ///
    /// # Errors
    /// Returns a `ServiceError` if the listing request fails.
    async fn list_jobs(&self) -> Result<Vec<JobListing>, ServiceError>;
}

/// Why the model stopped producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    /// Natural stop point.
    Stop,
    /// Output was cut at the token limit.
    MaxTokens,
    /// Blocked by a safety filter.
    Safety,
    /// Blocked for reciting training data.
    Recitation,
    /// Any other reason reported by the service.
    Other,
}

/// A classification request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionRequest {
    /// Model (base or tuned) to run.
    pub model_id: String,
    /// Optional system instruction sent with the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    /// Text to classify.
    pub text: String,
}

/// Raw model output for a classification request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    /// Generated text of the first candidate.
    pub text: String,
    /// Finish reason of the first candidate.
    pub finish_reason: FinishReason,
}

/// A text classifier backed by a hosted model.
///
/// All classifiers must be `Send + Sync` to allow concurrent use across tasks.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classifies the request text.
    ///
    /// # Errors
    /// Returns a `ServiceError` if the prediction call fails.
    async fn classify(&self, request: &PredictionRequest) -> Result<Prediction, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_rank_is_monotonic() {
        assert!(JobStatus::Pending.rank() < JobStatus::Running.rank());
        assert!(JobStatus::Running.rank() < JobStatus::Succeeded.rank());
        assert_eq!(JobStatus::Succeeded.rank(), JobStatus::Failed.rank());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&JobStatus::Succeeded).unwrap();
        assert_eq!(json, r#""SUCCEEDED""#);

        let status: JobStatus = serde_json::from_str(r#""RUNNING""#).unwrap();
        assert_eq!(status, JobStatus::Running);
    }

    #[test]
    fn test_snapshot_deserialization() {
        let json = r#"{
            "status": "FAILED",
            "created_at": "2024-12-10T12:00:00Z",
            "error": {"code": 3, "message": "invalid dataset"}
        }"#;

        let snapshot: JobSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert!(snapshot.is_terminal());
        assert!(!snapshot.has_succeeded());
        assert_eq!(snapshot.error.unwrap().to_string(), "invalid dataset (code 3)");
    }

    #[test]
    fn test_handle_is_transparent() {
        let handle = JobHandle::new("tunedModels/abc");
        assert_eq!(serde_json::to_string(&handle).unwrap(), r#""tunedModels/abc""#);
        assert_eq!(handle.to_string(), "tunedModels/abc");
    }

    #[test]
    fn test_service_error_status_code() {
        assert_eq!(ServiceError::status(429, "slow down").status_code(), Some(429));
        assert_eq!(ServiceError::Transport("reset".to_string()).status_code(), None);
        assert_eq!(
            ServiceError::status(503, "unavailable").to_string(),
            "Service returned status 503: unavailable"
        );
    }
}
