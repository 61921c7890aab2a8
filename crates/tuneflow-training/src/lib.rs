//! Tuneflow Training
//!
//! Vendor-agnostic primitives for driving remote tuning jobs:
//! - Waiting on a job with a bounded budget and fallback (`AsyncJobWaiter`)
//! - Retrying transient service errors (`RetryPolicy`)
//! - Finding an existing job to reuse (`select_reusable_job`)
//! - Configuration and logging setup

pub mod config;
pub mod error;
pub mod logging;
pub mod policy;
pub mod progress;
pub mod registry;
pub mod retry;
pub mod waiter;

pub use config::{PredictionSettings, RetrySettings, TuningConfig, TuningSettings, WaitSettings};
pub use error::{TrainingError, TrainingResult, WaitError};
pub use logging::{init_logging, LogFormat};
pub use policy::WaitPolicy;
pub use progress::{NoopProgressSink, ProgressSink, TracingProgressSink, WaitEvent};
pub use registry::{locate_reusable_job, select_reusable_job, ReusableJob};
pub use retry::{retry_with_backoff, RetryFailure, RetryPolicy};
pub use waiter::{AsyncJobWaiter, WaitOutcome, WaitPath, WaitState, UNBOUNDED_WAIT};
