//! Epoch-boundary policies: early stopping and plateau learning-rate reduction.
//!
//! Both policies are pure decision makers. They never touch the model; they
//! return a verdict and the controller applies it (restore weights, write the
//! learning rate, halt).

use crate::config::{EarlyStoppingConfig, Monitor, ReduceLrConfig};
use crate::model::WeightSnapshot;
use crate::training::metrics::MetricSample;

/// Value of `monitor` in `sample`; validation monitors fall back to training values.
pub fn monitored_value(monitor: Monitor, sample: &MetricSample) -> f64 {
    match monitor {
        Monitor::Loss => sample.loss,
        Monitor::ValLoss => sample.monitored_loss(),
        Monitor::Accuracy => sample.accuracy,
        Monitor::ValAccuracy => sample.monitored_accuracy(),
    }
}

/// Early stopping decision for one epoch.
#[derive(Debug, Clone, PartialEq)]
pub enum EarlyStoppingVerdict {
    /// No improvement yet, patience not exhausted.
    Continue { wait_count: usize },
    /// New best value; the caller should snapshot the weights.
    NewBest,
    /// Patience exhausted.
    Stop { best_epoch: usize, best_value: f64 },
}

impl EarlyStoppingVerdict {
    pub fn should_stop(&self) -> bool {
        matches!(self, Self::Stop { .. })
    }
}

/// Per-run early stopping state.
#[derive(Debug, Clone, PartialEq)]
pub struct EarlyStoppingState {
    pub best_value: f64,
    pub best_epoch: usize,
    pub wait_count: usize,
    pub best_weights: Option<WeightSnapshot>,
}

/// Early stopping policy.
#[derive(Debug, Clone)]
pub struct EarlyStoppingPolicy {
    config: EarlyStoppingConfig,
    state: Option<EarlyStoppingState>,
}

impl EarlyStoppingPolicy {
    pub fn new(config: EarlyStoppingConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }

    pub fn config(&self) -> &EarlyStoppingConfig {
        &self.config
    }

    pub fn state(&self) -> Option<&EarlyStoppingState> {
        self.state.as_ref()
    }

    pub fn reset(&mut self) {
        self.state = None;
    }

    pub fn observe(&mut self, sample: &MetricSample) -> EarlyStoppingVerdict {
        self.observe_value(sample.epoch, monitored_value(self.config.monitor, sample))
    }

    pub fn observe_value(&mut self, epoch: usize, value: f64) -> EarlyStoppingVerdict {
        let Some(state) = self.state.as_mut() else {
            self.state = Some(EarlyStoppingState {
                best_value: value,
                best_epoch: epoch,
                wait_count: 0,
                best_weights: None,
            });
            return EarlyStoppingVerdict::NewBest;
        };

        if self
            .config
            .mode
            .improved(value, state.best_value, self.config.min_delta)
        {
            state.best_value = value;
            state.best_epoch = epoch;
            state.wait_count = 0;
            return EarlyStoppingVerdict::NewBest;
        }

        state.wait_count += 1;
        if state.wait_count >= self.config.patience {
            EarlyStoppingVerdict::Stop {
                best_epoch: state.best_epoch,
                best_value: state.best_value,
            }
        } else {
            EarlyStoppingVerdict::Continue {
                wait_count: state.wait_count,
            }
        }
    }

    /// Whether weights should be snapshotted on each new best.
    pub fn wants_weights(&self) -> bool {
        self.config.restore_best_weights
    }

    /// Attach the weights of the current best epoch.
    pub fn record_best_weights(&mut self, weights: WeightSnapshot) {
        if let Some(state) = self.state.as_mut() {
            if self.config.restore_best_weights {
                state.best_weights = Some(weights);
            }
        }
    }

    pub fn best_weights(&self) -> Option<&WeightSnapshot> {
        self.state.as_ref().and_then(|s| s.best_weights.as_ref())
    }
}

/// Learning-rate decision for one epoch.
#[derive(Debug, Clone, PartialEq)]
pub enum PlateauVerdict {
    Hold,
    /// Write `to` into the optimizer.
    Reduce { from: f64, to: f64 },
    /// The optimizer exposes no learning rate; the scheduler is off for this run.
    Unavailable,
}

/// Per-run plateau scheduler state.
#[derive(Debug, Clone, PartialEq)]
pub struct ReduceLrState {
    pub best_value: f64,
    pub wait_count: usize,
    pub current_learning_rate: f64,
}

/// Reduce-on-plateau learning-rate scheduler.
#[derive(Debug, Clone)]
pub struct PlateauLrScheduler {
    config: ReduceLrConfig,
    state: Option<ReduceLrState>,
    disabled: bool,
}

impl PlateauLrScheduler {
    pub fn new(config: ReduceLrConfig) -> Self {
        Self {
            config,
            state: None,
            disabled: false,
        }
    }

    pub fn config(&self) -> &ReduceLrConfig {
        &self.config
    }

    pub fn state(&self) -> Option<&ReduceLrState> {
        self.state.as_ref()
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn reset(&mut self) {
        self.state = None;
        self.disabled = false;
    }

    /// Turn the scheduler off for the rest of the run.
    pub fn disable(&mut self) {
        self.disabled = true;
    }

    pub fn observe(&mut self, sample: &MetricSample, learning_rate: Option<f64>) -> PlateauVerdict {
        self.observe_value(monitored_value(self.config.monitor, sample), learning_rate)
    }

    pub fn observe_value(&mut self, value: f64, learning_rate: Option<f64>) -> PlateauVerdict {
        if self.disabled {
            return PlateauVerdict::Hold;
        }

        let Some(state) = self.state.as_mut() else {
            return match learning_rate {
                Some(lr) if lr > 0.0 => {
                    self.state = Some(ReduceLrState {
                        best_value: value,
                        wait_count: 0,
                        current_learning_rate: lr,
                    });
                    PlateauVerdict::Hold
                }
                _ => {
                    self.disabled = true;
                    PlateauVerdict::Unavailable
                }
            };
        };

        if self.config.mode.improved(value, state.best_value, 0.0) {
            state.best_value = value;
            state.wait_count = 0;
            return PlateauVerdict::Hold;
        }

        state.wait_count += 1;
        if state.wait_count < self.config.patience {
            return PlateauVerdict::Hold;
        }

        let current = state.current_learning_rate;
        let reduced = (current * self.config.factor).max(self.config.min_learning_rate);
        if reduced < current {
            state.current_learning_rate = reduced;
            state.wait_count = 0;
            PlateauVerdict::Reduce {
                from: current,
                to: reduced,
            }
        } else {
            PlateauVerdict::Hold
        }
    }
}
