//! Classifier evaluation.

pub mod confusion;

pub use confusion::{ClassificationMetrics, ConfusionMatrix, ConfusionMatrixEvaluator};
