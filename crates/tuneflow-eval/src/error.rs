use thiserror::Error;
use tuneflow_training::RetryFailure;

pub type EvalResult<T> = std::result::Result<T, EvalError>;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("evaluation set is empty")]
    EmptyDataset,

    #[error("prediction for example {index} failed: {source}")]
    Prediction { index: usize, source: RetryFailure },
}
