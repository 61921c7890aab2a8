use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use tuneflow_abstraction::Classifier;

use crate::error::{EvalError, EvalResult};
use crate::predict::{predict_label, PredictOptions};

/// A text with its expected class name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledExample {
    pub text: String,
    pub label: String,
}

impl LabeledExample {
    pub fn new(text: impl Into<String>, label: impl Into<String>) -> Self {
        Self { text: text.into(), label: label.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PredictionRecord {
    pub expected: String,
    pub predicted: String,
}

impl PredictionRecord {
    #[must_use]
    pub fn is_correct(&self) -> bool {
        self.expected == self.predicted
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub model_id: String,
    pub records: Vec<PredictionRecord>,
}

impl EvalReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn correct(&self) -> usize {
        self.records.iter().filter(|r| r.is_correct()).count()
    }

    /// Exact-match accuracy in `[0, 1]`.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        self.correct() as f64 / self.total() as f64
    }

    /// Number of predictions that came back as the error label.
    #[must_use]
    pub fn errors(&self, error_label: &str) -> usize {
        self.records.iter().filter(|r| r.predicted == error_label).count()
    }
}

/// Classifies every example in order and scores exact matches.
///
/// # Errors
/// `EmptyDataset` for no examples; `Prediction` if a request fails for good.
pub async fn evaluate(
    classifier: &dyn Classifier,
    options: &PredictOptions,
    examples: &[LabeledExample],
) -> EvalResult<EvalReport> {
    if examples.is_empty() {
        return Err(EvalError::EmptyDataset);
    }

    let mut records = Vec::with_capacity(examples.len());
    for (index, example) in examples.iter().enumerate() {
        if index > 0 && !options.request_delay.is_zero() {
            tokio::time::sleep(options.request_delay).await;
        }
        let predicted = predict_label(classifier, options, &example.text)
            .await
            .map_err(|source| EvalError::Prediction { index, source })?;
        debug!(index, expected = %example.label, predicted = %predicted, "Classified example");
        records.push(PredictionRecord { expected: example.label.clone(), predicted });
    }

    let report = EvalReport { model_id: options.model_id.clone(), records };
    info!(
        model_id = %report.model_id,
        total = report.total(),
        correct = report.correct(),
        accuracy = report.accuracy(),
        "Evaluation finished"
    );
    Ok(report)
}
