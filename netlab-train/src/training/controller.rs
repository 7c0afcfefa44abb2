//! Training controller: the run state machine.
//!
//! The controller owns the run status, the metric history and the per-run
//! policy state. It is driven purely by lifecycle events (train-begin,
//! epoch-begin, epoch-end, batch-end) coming back from the model's fit loop,
//! so tests can feed it synthetic event sequences directly.

use crate::config::{EngineConfig, TrainingCallback, TrainingConfig};
use crate::error::{EngineError, ModelError};
use crate::events::{EventStreams, TracingSink, TrainingEvent, TrainingEventSink};
use crate::model::{BatchLogs, EpochLogs, FitHooks, ModelControl, TrainableModel};
use crate::tensor::Tensor;
use crate::training::callbacks::{
    EarlyStoppingPolicy, EarlyStoppingState, EarlyStoppingVerdict, PlateauLrScheduler,
    PlateauVerdict, ReduceLrState,
};
use crate::training::convergence::ConvergenceDetector;
use crate::training::metrics::{BatchMetrics, MetricSample, TrainingHistory};
use crate::training::progress::ProgressSample;
use crate::training::status::TrainingStatus;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{trace, warn};

/// Learning rate reported when the optimizer exposes none.
pub const DEFAULT_LEARNING_RATE: f64 = 0.001;

/// Cloneable handle for requesting that the active run stop.
///
/// The request is advisory: it takes effect at the next epoch boundary.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    fn take(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }

    fn clear(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}

/// Bookkeeping for the run in flight.
#[derive(Debug)]
struct ActiveRun {
    id: String,
    config: TrainingConfig,
    started_at: Instant,
    total_batches: usize,
}

/// Drives one fit cycle at a time and publishes its progress.
pub struct TrainingController {
    streams: EventStreams,
    sink: Arc<dyn TrainingEventSink>,
    history: Vec<MetricSample>,
    early_stopping: EarlyStoppingPolicy,
    plateau: PlateauLrScheduler,
    convergence: ConvergenceDetector,
    stop: StopHandle,
    run: Option<ActiveRun>,
}

impl std::fmt::Debug for TrainingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingController")
            .field("status", &self.status())
            .field("history", &self.history.len())
            .field("run", &self.run.as_ref().map(|r| r.id.as_str()))
            .finish()
    }
}

impl Default for TrainingController {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl TrainingController {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            streams: EventStreams::new(&config.events),
            sink: Arc::new(TracingSink),
            history: Vec::new(),
            early_stopping: EarlyStoppingPolicy::new(config.early_stopping.clone()),
            plateau: PlateauLrScheduler::new(config.plateau.clone()),
            convergence: ConvergenceDetector::default(),
            stop: StopHandle::default(),
            run: None,
        }
    }

    /// Replace the structured event sink.
    pub fn with_sink(mut self, sink: Arc<dyn TrainingEventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_convergence(mut self, detector: ConvergenceDetector) -> Self {
        self.convergence = detector;
        self
    }

    pub fn status(&self) -> TrainingStatus {
        self.streams.status()
    }

    pub fn current_progress(&self) -> Option<ProgressSample> {
        self.streams.progress()
    }

    /// Samples recorded so far in the current (or last) run.
    pub fn history(&self) -> &[MetricSample] {
        &self.history
    }

    pub fn latest_metric(&self) -> Option<&MetricSample> {
        self.streams.latest_metric()
    }

    pub fn early_stopping_state(&self) -> Option<&EarlyStoppingState> {
        self.early_stopping.state()
    }

    pub fn plateau_state(&self) -> Option<&ReduceLrState> {
        self.plateau.state()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<TrainingStatus> {
        self.streams.subscribe_status()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<Option<ProgressSample>> {
        self.streams.subscribe_progress()
    }

    pub fn subscribe_metrics(&self) -> broadcast::Receiver<Option<MetricSample>> {
        self.streams.subscribe_metrics()
    }

    pub fn subscribe_batches(&self) -> broadcast::Receiver<BatchMetrics> {
        self.streams.subscribe_batches()
    }

    /// Fit `model` on `x`/`y` and summarize the run.
    ///
    /// Rejects the call with [`EngineError::InvalidState`] while another run is
    /// active. Any failure from the model moves the controller to `error` and
    /// is returned with its cause; no partial history is produced.
    pub async fn run<M>(
        &mut self,
        model: &mut M,
        x: &Tensor,
        y: &Tensor,
        config: TrainingConfig,
    ) -> Result<TrainingHistory, EngineError>
    where
        M: TrainableModel + ?Sized,
    {
        self.begin_run(config.clone(), x.leading_dim())?;

        if x.leading_dim() != y.leading_dim() {
            let err = ModelError::shape_mismatch(
                format!("{} target rows", x.leading_dim()),
                format!("{} target rows", y.leading_dim()),
            );
            self.fail_run(&err);
            return Err(err.into());
        }

        match model.fit(x, y, &config, self).await {
            Ok(()) => Ok(self.finish_run()),
            Err(err) => {
                self.fail_run(&err);
                Err(err.into())
            }
        }
    }

    /// Admit a new run: `idle|completed|error -> preparing`.
    ///
    /// Leaves all state untouched when the run is rejected.
    pub fn begin_run(
        &mut self,
        config: TrainingConfig,
        sample_count: usize,
    ) -> Result<(), EngineError> {
        let status = self.status();
        if !status.accepts_new_run() {
            return Err(EngineError::InvalidState { status });
        }
        config.validate()?;

        self.history.clear();
        self.early_stopping.reset();
        self.plateau.reset();
        self.stop.clear();

        let total_batches = config.total_batches(sample_count);
        let run = ActiveRun {
            id: uuid::Uuid::new_v4().to_string(),
            config,
            started_at: Instant::now(),
            total_batches,
        };
        self.sink.record(&TrainingEvent::RunStarted {
            run_id: run.id.clone(),
            epochs: run.config.epochs,
            total_batches,
        });
        self.run = Some(run);
        self.transition(TrainingStatus::Preparing);
        Ok(())
    }

    /// Close the active run successfully and summarize it.
    pub fn finish_run(&mut self) -> TrainingHistory {
        let (run_id, total_time) = match &self.run {
            Some(run) => (run.id.clone(), run.started_at.elapsed()),
            None => (String::new(), std::time::Duration::ZERO),
        };
        self.transition(TrainingStatus::Completed);

        let summary =
            TrainingHistory::summarize(self.history.clone(), total_time, &self.convergence);
        self.sink.record(&TrainingEvent::RunCompleted {
            run_id,
            epochs_run: summary.epochs_run(),
            best_epoch: summary.best_epoch,
            best_accuracy: summary.best_accuracy,
            converged: summary.converged,
            total_ms: summary.total_time.as_millis() as u64,
        });
        summary
    }

    /// Close the active run as failed.
    pub fn fail_run(&mut self, error: &ModelError) {
        let run_id = self.run.as_ref().map(|r| r.id.clone()).unwrap_or_default();
        self.transition(TrainingStatus::Error);
        self.sink.record(&TrainingEvent::RunFailed {
            run_id,
            error: error.to_string(),
        });
    }

    /// Clear history, policy state and progress, and return to `idle`.
    ///
    /// Subscriptions stay attached; subscribers receive the cleared values.
    pub fn reset(&mut self) {
        self.history.clear();
        self.early_stopping.reset();
        self.plateau.reset();
        self.stop.clear();
        self.run = None;
        self.transition(TrainingStatus::Idle);
        self.streams.publish_progress(None);
        self.streams.publish_metric(None);
    }

    fn transition(&self, to: TrainingStatus) {
        let from = self.streams.set_status(to);
        if from != to {
            self.sink.record(&TrainingEvent::StatusChanged { from, to });
        }
    }

    fn apply_early_stopping(&mut self, sample: &MetricSample, model: &mut dyn ModelControl) {
        match self.early_stopping.observe(sample) {
            EarlyStoppingVerdict::NewBest => {
                if self.early_stopping.wants_weights() {
                    self.early_stopping.record_best_weights(model.weights());
                }
            }
            EarlyStoppingVerdict::Continue { .. } => {}
            EarlyStoppingVerdict::Stop {
                best_epoch,
                best_value,
            } => {
                let weights_restored = match self.early_stopping.best_weights() {
                    Some(weights) => match model.set_weights(weights) {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(error = %e, best_epoch, "Failed to restore best weights");
                            false
                        }
                    },
                    None => false,
                };
                model.request_stop();
                self.sink.record(&TrainingEvent::EarlyStopTriggered {
                    epoch: sample.epoch,
                    best_epoch,
                    best_value,
                    weights_restored,
                });
            }
        }
    }

    fn apply_plateau(&mut self, sample: &MetricSample, model: &mut dyn ModelControl) {
        match self.plateau.observe(sample, model.learning_rate()) {
            PlateauVerdict::Hold => {}
            PlateauVerdict::Reduce { from, to } => {
                if model.set_learning_rate(to) {
                    self.sink.record(&TrainingEvent::LearningRateReduced {
                        epoch: sample.epoch,
                        from,
                        to,
                    });
                } else {
                    self.plateau.disable();
                    self.sink.record(&TrainingEvent::LearningRateUnavailable {
                        epoch: sample.epoch,
                    });
                }
            }
            PlateauVerdict::Unavailable => {
                self.sink.record(&TrainingEvent::LearningRateUnavailable {
                    epoch: sample.epoch,
                });
            }
        }
    }
}

impl FitHooks for TrainingController {
    fn on_train_begin(&mut self) {
        self.transition(TrainingStatus::Training);
    }

    fn on_epoch_begin(&mut self, epoch: usize) {
        let Some(run) = &self.run else {
            warn!(epoch, "Epoch began without an active run");
            return;
        };
        let progress = ProgressSample::epoch_begin(
            epoch,
            run.config.epochs,
            run.total_batches,
            run.started_at.elapsed(),
        );
        self.streams.publish_progress(Some(progress));
    }

    fn on_epoch_end(&mut self, epoch: usize, logs: &EpochLogs, model: &mut dyn ModelControl) {
        let Some(run) = &self.run else {
            warn!(epoch, "Epoch ended without an active run");
            return;
        };
        let elapsed = run.started_at.elapsed();
        let total_epochs = run.config.epochs;
        let total_batches = run.total_batches;
        let validated = run.config.has_validation();
        let early_stopping = run.config.is_enabled(TrainingCallback::EarlyStopping);
        let reduce_lr = run.config.is_enabled(TrainingCallback::ReduceLrOnPlateau);

        let sample = MetricSample {
            epoch,
            loss: logs.loss,
            accuracy: logs.accuracy.unwrap_or(0.0),
            val_loss: logs.val_loss.filter(|_| validated),
            val_accuracy: logs.val_accuracy.filter(|_| validated),
            learning_rate: model.learning_rate().unwrap_or(DEFAULT_LEARNING_RATE),
            elapsed,
            recorded_at: Utc::now(),
        };
        self.history.push(sample.clone());
        self.streams.publish_metric(Some(sample.clone()));

        let progress =
            ProgressSample::epoch_end(epoch, total_epochs, total_batches, elapsed);
        self.sink.record(&TrainingEvent::EpochCompleted {
            epoch,
            loss: sample.loss,
            accuracy: sample.accuracy,
            val_loss: sample.val_loss,
            eta_ms: progress.eta.as_millis() as u64,
        });
        self.streams.publish_progress(Some(progress));

        if self.stop.take() {
            model.request_stop();
            self.sink.record(&TrainingEvent::StopRequested { epoch });
        }
        if early_stopping {
            self.apply_early_stopping(&sample, model);
        }
        if reduce_lr {
            self.apply_plateau(&sample, model);
        }
    }

    fn on_batch_end(&mut self, batch: usize, logs: &BatchLogs) {
        let size = self
            .run
            .as_ref()
            .map(|r| r.config.batch_size)
            .unwrap_or_default();
        let metrics = BatchMetrics {
            batch_index: batch,
            loss: logs.loss,
            accuracy: logs.accuracy.unwrap_or(0.0),
            size,
            time: Utc::now(),
        };
        trace!(batch, loss = logs.loss, "Batch completed");
        self.streams.publish_batch(metrics);
        self.streams.modify_progress(|p| p.current_batch = batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;
    use crate::model::ScriptedModel;
    use std::time::Duration;

    fn controller_with_sink() -> (TrainingController, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let controller = TrainingController::default().with_sink(sink.clone());
        (controller, sink)
    }

    fn config(epochs: usize) -> TrainingConfig {
        TrainingConfig {
            epochs,
            batch_size: 10,
            validation_split: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_begin_run_moves_to_preparing() {
        let (mut controller, sink) = controller_with_sink();
        controller.begin_run(config(3), 25).unwrap();
        assert_eq!(controller.status(), TrainingStatus::Preparing);
        assert_eq!(sink.names(), vec!["run_started", "status_changed"]);

        controller.on_train_begin();
        assert_eq!(controller.status(), TrainingStatus::Training);
    }

    #[test]
    fn test_begin_run_rejects_invalid_config() {
        let (mut controller, _) = controller_with_sink();
        let err = controller.begin_run(config(0), 10).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
        assert_eq!(controller.status(), TrainingStatus::Idle);
    }

    #[test]
    fn test_rejects_overlapping_run_without_mutation() {
        let (mut controller, _) = controller_with_sink();
        let mut model = ScriptedModel::from_losses(&[0.9]);
        controller.begin_run(config(3), 20).unwrap();
        controller.on_train_begin();
        controller.on_epoch_begin(0);
        controller.on_epoch_end(0, &EpochLogs::new(0.9, 0.1), &mut model);

        let err = controller.begin_run(config(3), 20).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidState {
                status: TrainingStatus::Training
            }
        ));
        assert_eq!(controller.status(), TrainingStatus::Training);
        assert_eq!(controller.history().len(), 1);
    }

    #[tokio::test]
    async fn test_run_rejected_while_training() {
        let (mut controller, _) = controller_with_sink();
        controller.begin_run(config(2), 10).unwrap();
        controller.on_train_begin();

        let mut model = ScriptedModel::from_losses(&[0.5]);
        let x = Tensor::column(&[0.0; 10]);
        let err = controller
            .run(&mut model, &x, &x, config(2))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));
        assert_eq!(model.epochs_run(), 0);
        assert_eq!(controller.status(), TrainingStatus::Training);
    }

    #[test]
    fn test_validation_fields_dropped_without_split() {
        let (mut controller, _) = controller_with_sink();
        let mut model = ScriptedModel::from_losses(&[0.9]);
        controller.begin_run(config(1), 10).unwrap();
        controller.on_epoch_end(
            0,
            &EpochLogs::new(0.9, 0.2).with_validation(0.95, 0.15),
            &mut model,
        );
        let sample = &controller.history()[0];
        assert_eq!(sample.val_loss, None);
        assert_eq!(sample.val_accuracy, None);
        assert_eq!(sample.learning_rate, 0.01);
    }

    #[test]
    fn test_default_learning_rate_reported() {
        let (mut controller, _) = controller_with_sink();
        let mut model = ScriptedModel::from_losses(&[0.9]).without_learning_rate();
        controller.begin_run(config(1), 10).unwrap();
        controller.on_epoch_end(0, &EpochLogs::new(0.9, 0.2), &mut model);
        assert_eq!(controller.history()[0].learning_rate, DEFAULT_LEARNING_RATE);
    }

    #[test]
    fn test_epoch_end_applies_only_enabled_callbacks() {
        let (mut controller, _) = controller_with_sink();
        let mut model = ScriptedModel::from_losses(&[0.9, 0.8]);
        let run_config = config(2).with_callbacks([TrainingCallback::EarlyStopping]);
        controller.begin_run(run_config, 10).unwrap();

        controller.on_epoch_end(0, &EpochLogs::new(0.9, 0.1), &mut model);
        controller.on_epoch_end(1, &EpochLogs::new(0.8, 0.2), &mut model);
        assert_eq!(controller.early_stopping_state().unwrap().best_epoch, 1);
        assert!(controller.plateau_state().is_none());
        assert_eq!(controller.current_progress().unwrap().total_batches, 1);
    }

    #[test]
    fn test_batch_end_updates_progress_in_place() {
        let (mut controller, _) = controller_with_sink();
        let mut batches = controller.subscribe_batches();
        controller.begin_run(config(2), 35).unwrap();
        controller.on_epoch_begin(0);
        controller.on_batch_end(
            2,
            &BatchLogs {
                loss: 0.4,
                accuracy: Some(0.7),
            },
        );

        let progress = controller.current_progress().unwrap();
        assert_eq!(progress.current_batch, 2);
        assert_eq!(progress.total_batches, 4);
        assert_eq!(progress.eta, Duration::ZERO);

        let batch = batches.try_recv().unwrap();
        assert_eq!(batch.batch_index, 2);
        assert_eq!(batch.size, 10);
        assert!(controller.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eta_uses_running_average() {
        let (mut controller, _) = controller_with_sink();
        let mut model = ScriptedModel::from_losses(&[0.9]);
        controller.begin_run(config(4), 10).unwrap();
        controller.on_train_begin();

        controller.on_epoch_begin(0);
        tokio::time::advance(Duration::from_secs(10)).await;
        controller.on_epoch_end(0, &EpochLogs::new(0.9, 0.1), &mut model);
        assert_eq!(
            controller.current_progress().unwrap().eta,
            Duration::from_secs(30)
        );

        controller.on_epoch_begin(1);
        tokio::time::advance(Duration::from_secs(30)).await;
        controller.on_epoch_end(1, &EpochLogs::new(0.8, 0.2), &mut model);
        let progress = controller.current_progress().unwrap();
        assert_eq!(progress.current_epoch, 2);
        assert_eq!(progress.elapsed_time, Duration::from_secs(40));
        assert_eq!(progress.eta, Duration::from_secs(40));
    }

    #[test]
    fn test_external_stop_request_is_advisory() {
        let (mut controller, sink) = controller_with_sink();
        let mut model = ScriptedModel::from_losses(&[0.9]);
        controller.begin_run(config(5), 10).unwrap();
        let handle = controller.stop_handle();
        handle.request_stop();
        assert!(!model.stop_requested());

        controller.on_epoch_end(0, &EpochLogs::new(0.9, 0.1), &mut model);
        assert!(model.stop_requested());
        assert!(!handle.is_requested());
        assert!(sink.names().contains(&"stop_requested"));
    }

    #[test]
    fn test_reset_is_idempotent() {
        let (mut controller, _) = controller_with_sink();
        let mut model = ScriptedModel::from_losses(&[0.9]);
        let mut metrics = controller.subscribe_metrics();
        controller.begin_run(config(2), 10).unwrap();
        controller.on_epoch_end(0, &EpochLogs::new(0.9, 0.1), &mut model);
        assert!(controller.early_stopping_state().is_some());
        assert!(controller.plateau_state().is_some());

        controller.reset();
        controller.reset();
        assert_eq!(controller.status(), TrainingStatus::Idle);
        assert!(controller.history().is_empty());
        assert!(controller.early_stopping_state().is_none());
        assert!(controller.plateau_state().is_none());
        assert!(controller.current_progress().is_none());
        assert!(controller.latest_metric().is_none());

        // the subscription survives both resets
        assert!(metrics.try_recv().unwrap().is_some());
        assert!(metrics.try_recv().unwrap().is_none());
        assert!(metrics.try_recv().unwrap().is_none());
    }
}
