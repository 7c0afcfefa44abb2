//! Progress accounting and ETA estimation.

use crate::training::status::TrainingStatus;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Current progress of a run. Only the latest value is retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSample {
    pub current_epoch: usize,
    pub total_epochs: usize,
    pub current_batch: usize,
    pub total_batches: usize,
    pub elapsed_time: Duration,
    pub eta: Duration,
    pub status: TrainingStatus,
}

impl ProgressSample {
    /// Progress at the start of `epoch`: no batches done, no estimate yet.
    pub fn epoch_begin(
        epoch: usize,
        total_epochs: usize,
        total_batches: usize,
        elapsed_time: Duration,
    ) -> Self {
        Self {
            current_epoch: epoch,
            total_epochs,
            current_batch: 0,
            total_batches,
            elapsed_time,
            eta: Duration::ZERO,
            status: TrainingStatus::Training,
        }
    }

    /// Progress once `epoch` has finished.
    pub fn epoch_end(
        epoch: usize,
        total_epochs: usize,
        total_batches: usize,
        elapsed_time: Duration,
    ) -> Self {
        Self {
            current_epoch: epoch + 1,
            total_epochs,
            current_batch: total_batches,
            total_batches,
            elapsed_time,
            eta: estimate_eta(elapsed_time, epoch, total_epochs),
            status: TrainingStatus::Training,
        }
    }

    /// Completed fraction of the run in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total_epochs == 0 {
            return 0.0;
        }
        let per_epoch = if self.total_batches == 0 {
            0.0
        } else {
            self.current_batch as f64 / self.total_batches as f64
        };
        let done = if self.current_batch >= self.total_batches {
            self.current_epoch as f64
        } else {
            self.current_epoch as f64 + per_epoch
        };
        (done / self.total_epochs as f64).clamp(0.0, 1.0)
    }
}

/// Remaining time after `epoch` (0-based) finishes.
///
/// Plain running average over every completed epoch, so it is slow to react
/// when epoch duration changes mid-run.
///
/// Saturates at [`Duration::MAX`].
pub fn estimate_eta(elapsed: Duration, epoch: usize, total_epochs: usize) -> Duration {
    let completed = epoch.saturating_add(1);
    let remaining = total_epochs.saturating_sub(completed);
    if remaining == 0 {
        return Duration::ZERO;
    }
    let per_epoch = elapsed.as_secs_f64() / completed as f64;
    Duration::try_from_secs_f64(per_epoch * remaining as f64).unwrap_or(Duration::MAX)
}
