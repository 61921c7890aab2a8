//! TOML configuration for waiting, retrying and predicting.
//!
//! Every value has a default, so an empty file is a valid configuration.
//! Environment variables override file values:
//!
//! | Variable | Setting |
//! |---|---|
//! | `TUNEFLOW_POLL_INTERVAL_SECS` | `wait.poll_interval_secs` |
//! | `TUNEFLOW_MAX_WAIT_SECS` | `wait.max_wait_secs` |
//! | `TUNEFLOW_FALLBACK_JOB` | `wait.fallback_job` (blank clears it) |
//! | `TUNEFLOW_MAX_CONSECUTIVE_FAILURES` | `wait.max_consecutive_failures` |
//! | `TUNEFLOW_MAX_ATTEMPTS` | `retry.max_attempts` |
//! | `TUNEFLOW_MODEL_ID` | `prediction.model_id` |
//! | `TUNEFLOW_SYSTEM_INSTRUCTION` | `prediction.system_instruction` |
//! | `TUNEFLOW_ERROR_LABEL` | `prediction.error_label` |
//! | `TUNEFLOW_REQUEST_DELAY_MS` | `prediction.request_delay_ms` |
//! | `TUNEFLOW_JOB_PREFIX` | `tuning.job_name_prefix` |
//!
//! Backoff timings and retryable status codes are file-only.

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tuneflow_abstraction::JobHandle;

use crate::error::{TrainingError, TrainingResult};
use crate::policy::WaitPolicy;
use crate::retry::RetryPolicy;

/// Instruction sent with every classification request unless overridden.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a classification service. You will be passed input that represents \
a newsgroup post and you must respond with the newsgroup from which the post originates.";

/// Label recorded when the model stops for any reason other than a natural stop.
pub const DEFAULT_ERROR_LABEL: &str = "(error)";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    pub wait: WaitSettings,
    pub retry: RetrySettings,
    pub prediction: PredictionSettings,
    pub tuning: TuningSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WaitSettings {
    pub poll_interval_secs: u64,
    pub max_wait_secs: u64,
    /// Previously completed job used when the wait budget runs out.
    pub fallback_job: Option<String>,
    pub max_consecutive_failures: u32,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            max_wait_secs: 600,
            fallback_job: None,
            max_consecutive_failures: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: u32,
    pub retryable_status_codes: Vec<u16>,
    pub retry_transport_errors: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2,
            retryable_status_codes: vec![429, 503],
            retry_transport_errors: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PredictionSettings {
    pub model_id: String,
    pub system_instruction: Option<String>,
    pub error_label: String,
    /// Pause between two evaluation requests, to stay under rate limits.
    pub request_delay_ms: u64,
}

impl Default for PredictionSettings {
    fn default() -> Self {
        Self {
            model_id: "gemini-1.5-flash-001".to_string(),
            system_instruction: Some(DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            error_label: DEFAULT_ERROR_LABEL.to_string(),
            request_delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TuningSettings {
    /// Jobs whose handle starts with this prefix are candidates for reuse.
    pub job_name_prefix: String,
}

impl Default for TuningSettings {
    fn default() -> Self {
        Self { job_name_prefix: "tunedModels/newsgroup-classification-model".to_string() }
    }
}

impl TuningConfig {
    /// Loads and validates a TOML configuration file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> TrainingResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> TrainingResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the optional file, then applies `TUNEFLOW_*` process environment overrides.
    pub fn load_with_env(path: Option<&Path>) -> TrainingResult<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(std::env::vars())?;
        Ok(config)
    }

    /// Applies `TUNEFLOW_*` overrides from the given variables and revalidates.
    pub fn apply_env_overrides<I>(&mut self, vars: I) -> TrainingResult<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "TUNEFLOW_POLL_INTERVAL_SECS" => self.wait.poll_interval_secs = parse_env(&key, &value)?,
                "TUNEFLOW_MAX_WAIT_SECS" => self.wait.max_wait_secs = parse_env(&key, &value)?,
                "TUNEFLOW_FALLBACK_JOB" => {
                    self.wait.fallback_job = Some(value).filter(|v| !v.trim().is_empty());
                }
                "TUNEFLOW_MAX_CONSECUTIVE_FAILURES" => {
                    self.wait.max_consecutive_failures = parse_env(&key, &value)?;
                }
                "TUNEFLOW_MAX_ATTEMPTS" => self.retry.max_attempts = parse_env(&key, &value)?,
                "TUNEFLOW_MODEL_ID" => self.prediction.model_id = value,
                "TUNEFLOW_SYSTEM_INSTRUCTION" => self.prediction.system_instruction = Some(value),
                "TUNEFLOW_ERROR_LABEL" => self.prediction.error_label = value,
                "TUNEFLOW_REQUEST_DELAY_MS" => self.prediction.request_delay_ms = parse_env(&key, &value)?,
                "TUNEFLOW_JOB_PREFIX" => self.tuning.job_name_prefix = value,
                _ => {}
            }
        }
        self.validate()
    }

    pub fn validate(&self) -> TrainingResult<()> {
        self.wait_policy()
            .validate()
            .map_err(|e| TrainingError::InvalidConfig(e.to_string()))?;
        self.retry_policy().validate().map_err(TrainingError::InvalidConfig)?;
        if self.prediction.model_id.trim().is_empty() {
            return Err(TrainingError::InvalidConfig("prediction.model_id is required".to_string()));
        }
        if self.prediction.error_label.is_empty() {
            return Err(TrainingError::InvalidConfig("prediction.error_label must not be empty".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            poll_interval: Duration::from_secs(self.wait.poll_interval_secs),
            max_wait: Duration::from_secs(self.wait.max_wait_secs),
            fallback_handle: self.wait.fallback_job.clone().map(JobHandle::from),
            max_consecutive_failures: self.wait.max_consecutive_failures,
        }
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            backoff_multiplier: self.retry.backoff_multiplier,
            retryable_status_codes: self.retry.retryable_status_codes.iter().copied().collect::<BTreeSet<_>>(),
            retry_transport_errors: self.retry.retry_transport_errors,
        }
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> TrainingResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| TrainingError::InvalidConfig(format!("{key} has invalid value: {value}")))
}
