//! Event streams and the structured observability sink.
//!
//! Consumers (dashboards, charts, the CLI) subscribe to the streams; the sink
//! receives a structured record of every decision the engine takes.

use crate::config::EventConfig;
use crate::training::metrics::{BatchMetrics, MetricSample};
use crate::training::progress::ProgressSample;
use crate::training::status::TrainingStatus;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Structured record of an engine decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrainingEvent {
    RunStarted {
        run_id: String,
        epochs: usize,
        total_batches: usize,
    },
    StatusChanged {
        from: TrainingStatus,
        to: TrainingStatus,
    },
    EpochCompleted {
        epoch: usize,
        loss: f64,
        accuracy: f64,
        val_loss: Option<f64>,
        eta_ms: u64,
    },
    EarlyStopTriggered {
        epoch: usize,
        best_epoch: usize,
        best_value: f64,
        weights_restored: bool,
    },
    LearningRateReduced {
        epoch: usize,
        from: f64,
        to: f64,
    },
    LearningRateUnavailable {
        epoch: usize,
    },
    StopRequested {
        epoch: usize,
    },
    RunCompleted {
        run_id: String,
        epochs_run: usize,
        best_epoch: usize,
        best_accuracy: f64,
        converged: bool,
        total_ms: u64,
    },
    RunFailed {
        run_id: String,
        error: String,
    },
    EvaluationCompleted {
        samples: usize,
        num_classes: usize,
        accuracy: f64,
    },
}

impl TrainingEvent {
    /// Return the event name, matching the serialized tag.
    pub fn event_name(&self) -> &'static str {
        match self {
            TrainingEvent::RunStarted { .. } => "run_started",
            TrainingEvent::StatusChanged { .. } => "status_changed",
            TrainingEvent::EpochCompleted { .. } => "epoch_completed",
            TrainingEvent::EarlyStopTriggered { .. } => "early_stop_triggered",
            TrainingEvent::LearningRateReduced { .. } => "learning_rate_reduced",
            TrainingEvent::LearningRateUnavailable { .. } => "learning_rate_unavailable",
            TrainingEvent::StopRequested { .. } => "stop_requested",
            TrainingEvent::RunCompleted { .. } => "run_completed",
            TrainingEvent::RunFailed { .. } => "run_failed",
            TrainingEvent::EvaluationCompleted { .. } => "evaluation_completed",
        }
    }
}

/// Receiver of structured engine events.
pub trait TrainingEventSink: Send + Sync {
    fn record(&self, event: &TrainingEvent);
}

/// Default sink: forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TrainingEventSink for TracingSink {
    fn record(&self, event: &TrainingEvent) {
        match event {
            TrainingEvent::RunStarted {
                run_id,
                epochs,
                total_batches,
            } => info!(run_id = %run_id, epochs, total_batches, "Training run started"),
            TrainingEvent::StatusChanged { from, to } => {
                debug!(from = %from, to = %to, "Training status changed")
            }
            TrainingEvent::EpochCompleted {
                epoch,
                loss,
                accuracy,
                val_loss,
                eta_ms,
            } => info!(
                epoch = epoch + 1,
                loss,
                accuracy,
                val_loss = ?val_loss,
                eta_ms,
                "Epoch completed"
            ),
            TrainingEvent::EarlyStopTriggered {
                epoch,
                best_epoch,
                best_value,
                weights_restored,
            } => info!(
                epoch,
                best_epoch,
                best_value,
                weights_restored,
                "Early stopping triggered"
            ),
            TrainingEvent::LearningRateReduced { epoch, from, to } => {
                info!(epoch, from, to, "Reducing learning rate on plateau")
            }
            TrainingEvent::LearningRateUnavailable { epoch } => {
                debug!(epoch, "Optimizer exposes no mutable learning rate")
            }
            TrainingEvent::StopRequested { epoch } => {
                info!(epoch, "Stop requested, finishing current epoch")
            }
            TrainingEvent::RunCompleted {
                run_id,
                epochs_run,
                best_epoch,
                best_accuracy,
                converged,
                total_ms,
            } => info!(
                run_id = %run_id,
                epochs_run,
                best_epoch,
                best_accuracy,
                converged,
                total_ms,
                "Training run completed"
            ),
            TrainingEvent::RunFailed { run_id, error } => {
                warn!(run_id = %run_id, error = %error, "Training run failed")
            }
            TrainingEvent::EvaluationCompleted {
                samples,
                num_classes,
                accuracy,
            } => info!(samples, num_classes, accuracy, "Confusion matrix computed"),
        }
    }
}

/// Sink that keeps every event in memory, for tests and replay.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TrainingEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TrainingEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(TrainingEvent::event_name).collect()
    }
}

impl TrainingEventSink for RecordingSink {
    fn record(&self, event: &TrainingEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Publishing side of the engine's event streams.
///
/// Subscriptions survive controller resets; only the carried values are cleared.
#[derive(Debug)]
pub struct EventStreams {
    status: watch::Sender<TrainingStatus>,
    progress: watch::Sender<Option<ProgressSample>>,
    metrics: broadcast::Sender<Option<MetricSample>>,
    batches: broadcast::Sender<BatchMetrics>,
    latest_metric: Option<MetricSample>,
}

impl EventStreams {
    pub fn new(config: &EventConfig) -> Self {
        let (status, _) = watch::channel(TrainingStatus::Idle);
        let (progress, _) = watch::channel(None);
        let (metrics, _) = broadcast::channel(config.metric_channel_capacity.max(1));
        let (batches, _) = broadcast::channel(config.batch_channel_capacity.max(1));
        Self {
            status,
            progress,
            metrics,
            batches,
            latest_metric: None,
        }
    }

    pub fn status(&self) -> TrainingStatus {
        *self.status.borrow()
    }

    /// Set the status, returning the previous one.
    pub fn set_status(&self, status: TrainingStatus) -> TrainingStatus {
        self.status.send_replace(status)
    }

    pub fn progress(&self) -> Option<ProgressSample> {
        self.progress.borrow().clone()
    }

    pub fn publish_progress(&self, progress: Option<ProgressSample>) {
        self.progress.send_replace(progress);
    }

    /// Update the current progress in place and republish it.
    pub fn modify_progress(&self, f: impl FnOnce(&mut ProgressSample)) {
        self.progress.send_if_modified(|current| match current {
            Some(progress) => {
                f(progress);
                true
            }
            None => false,
        });
    }

    pub fn latest_metric(&self) -> Option<&MetricSample> {
        self.latest_metric.as_ref()
    }

    /// Emit an epoch sample, or `None` to signal a reset.
    pub fn publish_metric(&mut self, sample: Option<MetricSample>) -> usize {
        self.latest_metric = sample.clone();
        self.metrics.send(sample).unwrap_or(0)
    }

    pub fn publish_batch(&self, batch: BatchMetrics) -> usize {
        self.batches.send(batch).unwrap_or(0)
    }

    pub fn subscribe_status(&self) -> watch::Receiver<TrainingStatus> {
        self.status.subscribe()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<Option<ProgressSample>> {
        self.progress.subscribe()
    }

    pub fn subscribe_metrics(&self) -> broadcast::Receiver<Option<MetricSample>> {
        self.metrics.subscribe()
    }

    pub fn subscribe_batches(&self) -> broadcast::Receiver<BatchMetrics> {
        self.batches.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tag_matches_name() {
        let event = TrainingEvent::LearningRateReduced {
            epoch: 6,
            from: 0.01,
            to: 0.005,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.event_name());
    }

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        sink.record(&TrainingEvent::StopRequested { epoch: 1 });
        sink.record(&TrainingEvent::LearningRateUnavailable { epoch: 2 });
        assert_eq!(sink.names(), vec!["stop_requested", "learning_rate_unavailable"]);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let mut streams = EventStreams::new(&EventConfig::default());
        assert_eq!(streams.publish_metric(None), 0);
        assert_eq!(streams.set_status(TrainingStatus::Preparing), TrainingStatus::Idle);
        assert_eq!(streams.status(), TrainingStatus::Preparing);
    }

    #[test]
    fn test_modify_progress_requires_current_value() {
        let streams = EventStreams::new(&EventConfig::default());
        let rx = streams.subscribe_progress();
        streams.modify_progress(|p| p.current_batch = 3);
        assert!(!rx.has_changed().unwrap());
        assert!(streams.progress().is_none());
    }
}
