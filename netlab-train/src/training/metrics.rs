//! Per-epoch and per-batch metric records, and the run summary.

use crate::training::convergence::ConvergenceDetector;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Metrics recorded at the end of one epoch. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub epoch: usize,
    pub loss: f64,
    /// Training accuracy in `[0, 1]`.
    pub accuracy: f64,
    pub val_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
    pub learning_rate: f64,
    /// Monotonic time since the run started.
    pub elapsed: Duration,
    pub recorded_at: DateTime<Utc>,
}

impl MetricSample {
    /// Validation loss when present, else training loss.
    pub fn monitored_loss(&self) -> f64 {
        self.val_loss.unwrap_or(self.loss)
    }

    /// Validation accuracy when present, else training accuracy.
    pub fn monitored_accuracy(&self) -> f64 {
        self.val_accuracy.unwrap_or(self.accuracy)
    }
}

/// Metrics of a single batch. Emitted, never retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMetrics {
    pub batch_index: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub size: usize,
    pub time: DateTime<Utc>,
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub history: Vec<MetricSample>,
    pub best_epoch: usize,
    pub best_loss: f64,
    pub best_accuracy: f64,
    pub total_time: Duration,
    pub converged: bool,
}

impl TrainingHistory {
    /// Summarize `history`; the best epoch is the one with the highest accuracy.
    pub fn summarize(
        history: Vec<MetricSample>,
        total_time: Duration,
        detector: &ConvergenceDetector,
    ) -> Self {
        let (best_epoch, best_loss, best_accuracy) = best_by_accuracy(&history)
            .map(|m| (m.epoch, m.loss, m.accuracy))
            .unwrap_or((0, 0.0, 0.0));
        let converged = detector.is_converged(&history);
        Self {
            history,
            best_epoch,
            best_loss,
            best_accuracy,
            total_time,
            converged,
        }
    }

    pub fn epochs_run(&self) -> usize {
        self.history.len()
    }

    pub fn final_sample(&self) -> Option<&MetricSample> {
        self.history.last()
    }
}

/// Sample with the highest accuracy; the earliest one wins ties.
pub fn best_by_accuracy(history: &[MetricSample]) -> Option<&MetricSample> {
    history.iter().reduce(|best, current| {
        if current.accuracy > best.accuracy {
            current
        } else {
            best
        }
    })
}

#[cfg(test)]
pub(crate) fn sample(epoch: usize, loss: f64, accuracy: f64) -> MetricSample {
    MetricSample {
        epoch,
        loss,
        accuracy,
        val_loss: None,
        val_accuracy: None,
        learning_rate: 0.001,
        elapsed: Duration::from_secs(epoch as u64),
        recorded_at: Utc::now(),
    }
}
