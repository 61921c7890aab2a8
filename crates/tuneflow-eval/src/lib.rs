//! Tuneflow Eval
//!
//! Classification with retries and exact-match accuracy evaluation for base
//! and tuned models.

pub mod error;
pub mod evaluate;
pub mod predict;

pub use error::{EvalError, EvalResult};
pub use evaluate::{evaluate, EvalReport, LabeledExample, PredictionRecord};
pub use predict::{predict_label, PredictOptions};
