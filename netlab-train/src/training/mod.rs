//! Training orchestration: run state machine, epoch policies, progress and history.

pub mod callbacks;
pub mod controller;
pub mod convergence;
pub mod metrics;
pub mod progress;
pub mod session;
pub mod status;

pub use callbacks::{EarlyStoppingPolicy, PlateauLrScheduler};
pub use controller::{StopHandle, TrainingController};
pub use convergence::ConvergenceDetector;
pub use metrics::{BatchMetrics, MetricSample, TrainingHistory};
pub use progress::ProgressSample;
pub use session::{SessionStore, TrainingSession};
pub use status::TrainingStatus;
