use std::time::Duration;

use tracing::{debug, warn};
use tuneflow_abstraction::{Classifier, FinishReason, PredictionRequest};
use tuneflow_training::{retry_with_backoff, RetryFailure, RetryPolicy, TuningConfig};

/// Settings for a series of classification requests.
#[derive(Debug, Clone)]
pub struct PredictOptions {
    pub model_id: String,
    pub system_instruction: Option<String>,
    /// Label recorded when the model did not stop naturally.
    pub error_label: String,
    pub retry: RetryPolicy,
    /// Pause between two requests of an evaluation run.
    pub request_delay: Duration,
}

impl PredictOptions {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            system_instruction: None,
            error_label: tuneflow_training::config::DEFAULT_ERROR_LABEL.to_string(),
            retry: RetryPolicy::default(),
            request_delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn from_config(config: &TuningConfig) -> Self {
        Self {
            model_id: config.prediction.model_id.clone(),
            system_instruction: config.prediction.system_instruction.clone(),
            error_label: config.prediction.error_label.clone(),
            retry: config.retry_policy(),
            request_delay: Duration::from_millis(config.prediction.request_delay_ms),
        }
    }

    #[must_use]
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    #[must_use]
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Classifies `text`, retrying transient service errors.
///
/// Any finish reason other than a natural stop (safety filter, recitation,
/// token limit) yields `options.error_label`; otherwise the trimmed output.
///
/// # Errors
/// Returns the `RetryFailure` of the last attempt.
pub async fn predict_label(
    classifier: &dyn Classifier,
    options: &PredictOptions,
    text: &str,
) -> Result<String, RetryFailure> {
    let request = PredictionRequest {
        model_id: options.model_id.clone(),
        system_instruction: options.system_instruction.clone(),
        text: text.to_string(),
    };

    let prediction = retry_with_backoff(
        &options.retry,
        |attempt, delay, error| {
            warn!(model_id = %options.model_id, attempt, delay = ?delay, error = %error, "Prediction failed, retrying");
        },
        |_| classifier.classify(&request),
    )
    .await?;

    if prediction.finish_reason == FinishReason::Stop {
        Ok(prediction.text.trim().to_string())
    } else {
        debug!(
            model_id = %options.model_id,
            finish_reason = ?prediction.finish_reason,
            "Prediction did not finish normally"
        );
        Ok(options.error_label.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tuneflow_abstraction::{Prediction, ServiceError};

    struct StubClassifier {
        responses: Mutex<Vec<Result<Prediction, ServiceError>>>,
        requests: Mutex<Vec<PredictionRequest>>,
    }

    impl StubClassifier {
        fn new(mut responses: Vec<Result<Prediction, ServiceError>>) -> Self {
            responses.reverse();
            Self { responses: Mutex::new(responses), requests: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl Classifier for StubClassifier {
        async fn classify(&self, request: &PredictionRequest) -> Result<Prediction, ServiceError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses.lock().unwrap().pop().unwrap()
        }
    }

    fn stop(text: &str) -> Result<Prediction, ServiceError> {
        Ok(Prediction { text: text.to_string(), finish_reason: FinishReason::Stop })
    }

    #[tokio::test(start_paused = true)]
    async fn test_trims_output_and_sends_instruction() {
        let classifier = StubClassifier::new(vec![stop("  sci.space\n")]);
        let options = PredictOptions::new("tunedModels/x").with_system_instruction("classify");

        let label = predict_label(&classifier, &options, "Orbital mechanics").await.unwrap();

        assert_eq!(label, "sci.space");
        let requests = classifier.requests.lock().unwrap();
        assert_eq!(requests[0].model_id, "tunedModels/x");
        assert_eq!(requests[0].system_instruction.as_deref(), Some("classify"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_output_maps_to_error_label() {
        let classifier = StubClassifier::new(vec![Ok(Prediction {
            text: String::new(),
            finish_reason: FinishReason::Safety,
        })]);

        let label = predict_label(&classifier, &PredictOptions::new("m"), "text").await.unwrap();
        assert_eq!(label, "(error)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_rate_limits() {
        let classifier = StubClassifier::new(vec![
            Err(ServiceError::status(429, "quota")),
            Err(ServiceError::status(503, "overloaded")),
            stop("rec.autos"),
        ]);

        let label = predict_label(&classifier, &PredictOptions::new("m"), "text").await.unwrap();
        assert_eq!(label, "rec.autos");
        assert_eq!(classifier.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_request_is_not_retried() {
        let classifier = StubClassifier::new(vec![Err(ServiceError::status(400, "bad"))]);

        let err = predict_label(&classifier, &PredictOptions::new("m"), "text").await.unwrap_err();
        assert!(matches!(err, RetryFailure::NotRetryable(_)));
    }

    #[test]
    fn test_options_from_config() {
        let mut config = TuningConfig::default();
        config.prediction.model_id = "tunedModels/abc".to_string();
        config.prediction.request_delay_ms = 1_000;

        let options = PredictOptions::from_config(&config);
        assert_eq!(options.model_id, "tunedModels/abc");
        assert_eq!(options.request_delay, Duration::from_secs(1));
        assert!(options.system_instruction.unwrap().contains("newsgroup"));
    }
}
