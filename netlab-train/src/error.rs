//! Error types for the netlab-train crate.

use crate::training::status::TrainingStatus;
use thiserror::Error;

/// Failures signalled by a trainable model capability.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Model not ready: {0}")]
    NotReady(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl ModelError {
    pub fn shape_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Top-level error type for the training engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid state: a run is already active (status: {status})")]
    InvalidState { status: TrainingStatus },

    #[error("Model not ready: {0}")]
    ModelNotReady(String),

    #[error("Training failed: {0}")]
    Training(#[source] ModelError),

    #[error("Prediction failed: {0}")]
    Prediction(#[source] ModelError),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl EngineError {
    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Map a failed `predict` call. Readiness failures keep their own variant.
    pub fn prediction(err: ModelError) -> Self {
        match err {
            ModelError::NotReady(msg) => Self::ModelNotReady(msg),
            other => Self::Prediction(other),
        }
    }

    /// Whether the error aborted a training run (as opposed to being rejected up front).
    pub fn is_training_failure(&self) -> bool {
        matches!(self, Self::Training(_))
    }
}

impl From<ModelError> for EngineError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::NotReady(msg) => Self::ModelNotReady(msg),
            other => Self::Training(other),
        }
    }
}
