use tracing_subscriber::EnvFilter;

use crate::error::{TrainingError, TrainingResult};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(TrainingError::InvalidConfig(format!("unknown log format: {other}"))),
        }
    }
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `default_directive` (e.g. `"info"` or
/// `"tuneflow_training=debug"`).
///
/// # Errors
/// Fails if the directive is invalid or a global subscriber is already set.
pub fn init_logging(format: LogFormat, default_directive: &str) -> TrainingResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive)
            .map_err(|e| TrainingError::Logging(format!("invalid filter {default_directive}: {e}")))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let result = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| TrainingError::Logging(e.to_string()))
}
