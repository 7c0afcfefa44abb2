//! Loss-trajectory flattening check.
//!
//! A coarse heuristic, not a statistical test: the run counts as converged when
//! the mean absolute epoch-to-epoch loss change over the trailing window falls
//! below a threshold.

use crate::training::metrics::MetricSample;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceDetector {
    /// Number of trailing samples inspected.
    pub window: usize,
    /// Mean absolute loss change below which the run has converged.
    pub threshold: f64,
}

impl Default for ConvergenceDetector {
    fn default() -> Self {
        Self {
            window: 5,
            threshold: 0.001,
        }
    }
}

impl ConvergenceDetector {
    pub fn is_converged(&self, history: &[MetricSample]) -> bool {
        let losses: Vec<f64> = history.iter().map(|m| m.loss).collect();
        self.is_converged_losses(&losses)
    }

    /// Same check over raw loss values.
    pub fn is_converged_losses(&self, losses: &[f64]) -> bool {
        if self.window < 2 || losses.len() < self.window {
            return false;
        }
        let recent = &losses[losses.len() - self.window..];
        let total: f64 = recent.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
        let mean = total / (self.window - 1) as f64;
        mean < self.threshold
    }
}
