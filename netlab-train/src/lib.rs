//! # netlab-train: training orchestration and evaluation
//!
//! Drives a trainable model through a run and decides, epoch by epoch, whether
//! to keep going, stop early, or lower the learning rate.
//!
//! ## Layout
//!
//! 1. **Training**: the run state machine, early stopping, plateau LR scheduling,
//!    convergence detection, and session records
//! 2. **Evaluation**: confusion matrices and per-class metrics
//! 3. **Events**: status/progress/metric/batch streams plus a structured event sink
//!
//! The model itself is abstract: anything implementing [`TrainableModel`] can be
//! trained. [`ScriptedModel`] replays fixed epoch logs for demos and tests.

// Foundation
pub mod config;
pub mod error;
pub mod events;
pub mod tensor;

// Model abstraction
pub mod model;

// Orchestration
pub mod evaluation;
pub mod training;

// Re-exports
pub use config::{EngineConfig, TrainingConfig, load_config};
pub use error::{EngineError, ModelError};
pub use evaluation::{ClassificationMetrics, ConfusionMatrix, ConfusionMatrixEvaluator};
pub use events::{EventStreams, RecordingSink, TracingSink, TrainingEvent, TrainingEventSink};
pub use model::{FitHooks, ModelControl, ScriptedModel, TrainableModel, WeightSnapshot};
pub use tensor::Tensor;
pub use training::{
    ConvergenceDetector, EarlyStoppingPolicy, MetricSample, PlateauLrScheduler, StopHandle,
    TrainingController, TrainingHistory, TrainingStatus,
};
