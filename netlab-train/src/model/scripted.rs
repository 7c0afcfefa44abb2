//! Deterministic model that replays scripted epoch logs.
//!
//! Used by the integration tests and the CLI demo to drive the controller
//! through realistic hook sequences without a tensor backend.

use super::{BatchLogs, EpochLogs, FitHooks, ModelControl, TrainableModel, WeightSnapshot};
use crate::config::TrainingConfig;
use crate::error::ModelError;
use crate::tensor::Tensor;
use async_trait::async_trait;

/// Scripted stand-in for a compiled model.
///
/// After epoch `e` the weights become a single `[1, 1]` tensor holding `e`, so
/// restored snapshots reveal which epoch they came from.
#[derive(Debug, Clone)]
pub struct ScriptedModel {
    script: Vec<EpochLogs>,
    weights: WeightSnapshot,
    learning_rate: Option<f64>,
    learning_rate_mutable: bool,
    learning_rate_writes: Vec<f64>,
    weight_restores: Vec<WeightSnapshot>,
    stop_requested: bool,
    epochs_run: usize,
    failure: Option<(usize, ModelError)>,
    predictions: Option<Tensor>,
}

impl ScriptedModel {
    /// Replay `script` one entry per epoch; the last entry repeats once exhausted.
    pub fn new(script: Vec<EpochLogs>) -> Self {
        Self {
            script,
            weights: WeightSnapshot::default(),
            learning_rate: Some(0.01),
            learning_rate_mutable: true,
            learning_rate_writes: Vec::new(),
            weight_restores: Vec::new(),
            stop_requested: false,
            epochs_run: 0,
            failure: None,
            predictions: None,
        }
    }

    /// Script from training losses; accuracy mirrors the loss as `1 - loss`.
    pub fn from_losses(losses: &[f64]) -> Self {
        Self::new(
            losses
                .iter()
                .map(|&loss| EpochLogs::new(loss, (1.0 - loss).clamp(0.0, 1.0)))
                .collect(),
        )
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = Some(learning_rate);
        self.learning_rate_mutable = true;
        self
    }

    /// Optimizer without a learning-rate property.
    pub fn without_learning_rate(mut self) -> Self {
        self.learning_rate = None;
        self.learning_rate_mutable = false;
        self
    }

    /// Optimizer whose learning rate can be read but not written.
    pub fn with_fixed_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = Some(learning_rate);
        self.learning_rate_mutable = false;
        self
    }

    /// Fail with `error` when `epoch` begins.
    pub fn failing_at(mut self, epoch: usize, error: ModelError) -> Self {
        self.failure = Some((epoch, error));
        self
    }

    /// Output returned by `predict`.
    pub fn with_predictions(mut self, predictions: Tensor) -> Self {
        self.predictions = Some(predictions);
        self
    }

    pub fn epochs_run(&self) -> usize {
        self.epochs_run
    }

    pub fn learning_rate_writes(&self) -> &[f64] {
        &self.learning_rate_writes
    }

    pub fn weight_restores(&self) -> &[WeightSnapshot] {
        &self.weight_restores
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Epoch encoded in the current weights, if any epoch has run.
    pub fn weights_epoch(&self) -> Option<usize> {
        self.weights
            .tensors()
            .first()
            .and_then(|t| t.data().first())
            .map(|&v| v as usize)
    }

    fn logs_for(&self, epoch: usize) -> Option<&EpochLogs> {
        self.script.get(epoch).or_else(|| self.script.last())
    }
}

impl ModelControl for ScriptedModel {
    fn weights(&self) -> WeightSnapshot {
        self.weights.clone()
    }

    fn set_weights(&mut self, weights: &WeightSnapshot) -> Result<(), ModelError> {
        self.weight_restores.push(weights.clone());
        self.weights = weights.clone();
        Ok(())
    }

    fn learning_rate(&self) -> Option<f64> {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f64) -> bool {
        if !self.learning_rate_mutable {
            return false;
        }
        self.learning_rate = Some(learning_rate);
        self.learning_rate_writes.push(learning_rate);
        true
    }

    fn request_stop(&mut self) {
        self.stop_requested = true;
    }
}

#[async_trait]
impl TrainableModel for ScriptedModel {
    async fn fit(
        &mut self,
        x: &Tensor,
        y: &Tensor,
        config: &TrainingConfig,
        hooks: &mut dyn FitHooks,
    ) -> Result<(), ModelError> {
        if x.leading_dim() != y.leading_dim() {
            return Err(ModelError::shape_mismatch(
                format!("{} target rows", x.leading_dim()),
                format!("{} target rows", y.leading_dim()),
            ));
        }
        if self.script.is_empty() {
            return Err(ModelError::NotReady("no scripted epochs".into()));
        }

        self.stop_requested = false;
        let total_batches = config.total_batches(x.leading_dim());
        hooks.on_train_begin();

        for epoch in 0..config.epochs {
            if self.stop_requested {
                break;
            }
            hooks.on_epoch_begin(epoch);

            if let Some((at, error)) = &self.failure {
                if *at == epoch {
                    return Err(error.clone());
                }
            }

            let logs = self
                .logs_for(epoch)
                .cloned()
                .ok_or_else(|| ModelError::NotReady("no scripted epochs".into()))?;
            let batch_logs = BatchLogs {
                loss: logs.loss,
                accuracy: logs.accuracy,
            };
            for batch in 0..total_batches {
                hooks.on_batch_end(batch, &batch_logs);
            }

            self.weights = WeightSnapshot::new(vec![Tensor::column(&[epoch as f32])]);
            self.epochs_run += 1;
            hooks.on_epoch_end(epoch, &logs, self);

            tokio::task::yield_now().await;
        }
        Ok(())
    }

    async fn predict(&self, x: &Tensor) -> Result<Tensor, ModelError> {
        let predictions = self
            .predictions
            .as_ref()
            .ok_or_else(|| ModelError::NotReady("no scripted predictions".into()))?;
        if predictions.leading_dim() != x.leading_dim() {
            return Err(ModelError::shape_mismatch(
                format!("{} input rows", predictions.leading_dim()),
                format!("{} input rows", x.leading_dim()),
            ));
        }
        Ok(predictions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingHooks {
        train_begins: usize,
        epochs: Vec<usize>,
        batches: usize,
    }

    impl FitHooks for CountingHooks {
        fn on_train_begin(&mut self) {
            self.train_begins += 1;
        }

        fn on_epoch_begin(&mut self, _epoch: usize) {}

        fn on_epoch_end(&mut self, epoch: usize, _logs: &EpochLogs, model: &mut dyn ModelControl) {
            self.epochs.push(epoch);
            if epoch == 1 {
                model.request_stop();
            }
        }

        fn on_batch_end(&mut self, _batch: usize, _logs: &BatchLogs) {
            self.batches += 1;
        }
    }

    #[tokio::test]
    async fn test_fit_honors_stop_at_epoch_boundary() {
        let mut model = ScriptedModel::from_losses(&[0.9, 0.8, 0.7, 0.6]);
        let x = Tensor::column(&[0.0; 10]);
        let y = Tensor::column(&[1.0; 10]);
        let config = TrainingConfig {
            epochs: 4,
            batch_size: 4,
            ..Default::default()
        };
        let mut hooks = CountingHooks::default();
        model.fit(&x, &y, &config, &mut hooks).await.unwrap();

        assert_eq!(hooks.train_begins, 1);
        assert_eq!(hooks.epochs, vec![0, 1]);
        assert_eq!(hooks.batches, 2 * 3);
        assert_eq!(model.epochs_run(), 2);
        assert_eq!(model.weights_epoch(), Some(1));
    }

    #[tokio::test]
    async fn test_fit_rejects_mismatched_rows() {
        let mut model = ScriptedModel::from_losses(&[0.5]);
        let x = Tensor::column(&[0.0; 4]);
        let y = Tensor::column(&[0.0; 3]);
        let err = model
            .fit(&x, &y, &TrainingConfig::default(), &mut CountingHooks::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_fixed_learning_rate_refuses_writes() {
        let mut model = ScriptedModel::from_losses(&[0.5]).with_fixed_learning_rate(0.1);
        assert!(!model.set_learning_rate(0.05));
        assert_eq!(model.learning_rate(), Some(0.1));
        assert!(model.learning_rate_writes().is_empty());
    }
}
