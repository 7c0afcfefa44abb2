//! Trainable model capability consumed by the engine.
//!
//! The engine drives a model it does not own. It only reads and writes the
//! model's weights, its optimizer learning rate and its stop flag; the actual
//! forward/backward passes happen behind [`TrainableModel::fit`].

pub mod scripted;

use crate::config::TrainingConfig;
use crate::error::ModelError;
use crate::tensor::Tensor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use scripted::ScriptedModel;

/// Opaque copy of a model's weights.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WeightSnapshot {
    tensors: Vec<Tensor>,
}

impl WeightSnapshot {
    pub fn new(tensors: Vec<Tensor>) -> Self {
        Self { tensors }
    }

    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }
}

/// Values reported by the model at the end of an epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochLogs {
    pub loss: f64,
    #[serde(default, rename = "acc")]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub val_loss: Option<f64>,
    #[serde(default, rename = "val_acc")]
    pub val_accuracy: Option<f64>,
}

impl EpochLogs {
    pub fn new(loss: f64, accuracy: f64) -> Self {
        Self {
            loss,
            accuracy: Some(accuracy),
            val_loss: None,
            val_accuracy: None,
        }
    }

    pub fn with_validation(mut self, val_loss: f64, val_accuracy: f64) -> Self {
        self.val_loss = Some(val_loss);
        self.val_accuracy = Some(val_accuracy);
        self
    }
}

/// Values reported by the model at the end of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchLogs {
    pub loss: f64,
    #[serde(default, rename = "acc")]
    pub accuracy: Option<f64>,
}

/// Synchronous control surface the engine uses on a model, also inside hooks.
pub trait ModelControl: Send {
    /// Snapshot the current weights.
    fn weights(&self) -> WeightSnapshot;

    /// Replace the current weights.
    fn set_weights(&mut self, weights: &WeightSnapshot) -> Result<(), ModelError>;

    /// Optimizer learning rate, if the optimizer exposes one.
    fn learning_rate(&self) -> Option<f64> {
        None
    }

    /// Write the optimizer learning rate. Returns `false` when it is not mutable.
    fn set_learning_rate(&mut self, _learning_rate: f64) -> bool {
        false
    }

    /// Ask the fit loop not to start another epoch.
    fn request_stop(&mut self);
}

/// Lifecycle callbacks invoked by [`TrainableModel::fit`].
pub trait FitHooks: Send {
    fn on_train_begin(&mut self);

    fn on_epoch_begin(&mut self, epoch: usize);

    /// `model` is the model being fitted, reborrowed so hooks can act on it.
    fn on_epoch_end(&mut self, epoch: usize, logs: &EpochLogs, model: &mut dyn ModelControl);

    fn on_batch_end(&mut self, batch: usize, logs: &BatchLogs);
}

/// A compiled model that can be fitted and queried.
#[async_trait]
pub trait TrainableModel: ModelControl + Sync {
    /// Run the gradient-descent loop, calling `hooks` as it goes.
    ///
    /// Must check its stop flag between epochs; batches of the current epoch
    /// are never interrupted.
    async fn fit(
        &mut self,
        x: &Tensor,
        y: &Tensor,
        config: &TrainingConfig,
        hooks: &mut dyn FitHooks,
    ) -> Result<(), ModelError>;

    async fn predict(&self, x: &Tensor) -> Result<Tensor, ModelError>;
}
