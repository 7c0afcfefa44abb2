//! Configuration for the training engine.
//!
//! Uses `figment` for layered configuration: defaults -> user file -> workspace file
//! -> environment -> explicit overrides. Files live at `~/.config/netlab/config.toml`
//! and `.netlab/config.toml` in the workspace directory.

use crate::error::EngineError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Defaults for a training run.
    #[serde(default)]
    pub training: TrainingConfig,
    /// Early stopping policy parameters.
    #[serde(default)]
    pub early_stopping: EarlyStoppingConfig,
    /// Plateau learning-rate scheduler parameters.
    #[serde(default)]
    pub plateau: ReduceLrConfig,
    /// Event stream sizing.
    #[serde(default)]
    pub events: EventConfig,
}

impl EngineConfig {
    pub fn to_toml_string(&self) -> Result<String, EngineError> {
        toml::to_string_pretty(self).map_err(|e| EngineError::invalid_config(e.to_string()))
    }
}

/// Callbacks a run may enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingCallback {
    EarlyStopping,
    ReduceLrOnPlateau,
    ModelCheckpoint,
    TensorBoard,
}

/// Parameters of one training run. Immutable once the run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Fraction of samples held out for validation, in `[0, 1)`.
    #[serde(default = "default_validation_split")]
    pub validation_split: f64,
    #[serde(default = "default_true")]
    pub shuffle: bool,
    #[serde(default = "default_callbacks")]
    pub callbacks: BTreeSet<TrainingCallback>,
    #[serde(default)]
    pub verbosity: u8,
    /// Per-class loss weights keyed by class index.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "class_weight_keys"
    )]
    pub class_weight: Option<BTreeMap<usize, f64>>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            validation_split: default_validation_split(),
            shuffle: true,
            callbacks: default_callbacks(),
            verbosity: 0,
            class_weight: None,
        }
    }
}

impl TrainingConfig {
    pub fn is_enabled(&self, callback: TrainingCallback) -> bool {
        self.callbacks.contains(&callback)
    }

    pub fn with_callbacks(mut self, callbacks: impl IntoIterator<Item = TrainingCallback>) -> Self {
        self.callbacks = callbacks.into_iter().collect();
        self
    }

    pub fn has_validation(&self) -> bool {
        self.validation_split > 0.0
    }

    /// Number of batches per epoch for `samples` training samples.
    pub fn total_batches(&self, samples: usize) -> usize {
        samples.div_ceil(self.batch_size.max(1))
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.epochs == 0 {
            return Err(EngineError::invalid_config("epochs must be greater than 0"));
        }
        if self.batch_size == 0 {
            return Err(EngineError::invalid_config(
                "batch_size must be greater than 0",
            ));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(EngineError::invalid_config(format!(
                "validation_split must be in [0, 1), got {}",
                self.validation_split
            )));
        }
        if let Some(weights) = &self.class_weight {
            if let Some((class, w)) = weights.iter().find(|(_, w)| !(**w > 0.0 && w.is_finite())) {
                return Err(EngineError::invalid_config(format!(
                    "class_weight for class {class} must be positive, got {w}"
                )));
            }
        }
        Ok(())
    }
}

/// TOML tables only have string keys, so class indices travel as strings.
mod class_weight_keys {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        weights: &Option<BTreeMap<usize, f64>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        weights
            .as_ref()
            .map(|w| {
                w.iter()
                    .map(|(class, weight)| (class.to_string(), *weight))
                    .collect::<BTreeMap<String, f64>>()
            })
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<BTreeMap<usize, f64>>, D::Error> {
        let Some(raw) = Option::<BTreeMap<String, f64>>::deserialize(deserializer)? else {
            return Ok(None);
        };
        raw.into_iter()
            .map(|(class, weight)| {
                class.parse::<usize>().map(|c| (c, weight)).map_err(|_| {
                    serde::de::Error::custom(format!("class index `{class}` is not an integer"))
                })
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Some)
    }
}

fn default_epochs() -> usize {
    50
}

fn default_batch_size() -> usize {
    32
}

fn default_validation_split() -> f64 {
    0.2
}

fn default_callbacks() -> BTreeSet<TrainingCallback> {
    [
        TrainingCallback::EarlyStopping,
        TrainingCallback::ReduceLrOnPlateau,
    ]
    .into_iter()
    .collect()
}

/// Metric a policy watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Monitor {
    Loss,
    ValLoss,
    Accuracy,
    ValAccuracy,
}

/// Direction in which the monitored metric improves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Min,
    Max,
}

impl Mode {
    /// Whether `current` beats `best` by more than `delta`.
    pub fn improved(self, current: f64, best: f64, delta: f64) -> bool {
        match self {
            Self::Min => current < best - delta,
            Self::Max => current > best + delta,
        }
    }
}

/// Early stopping parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyStoppingConfig {
    #[serde(default = "default_monitor")]
    pub monitor: Monitor,
    /// Epochs without improvement before stopping.
    #[serde(default = "default_early_stopping_patience")]
    pub patience: usize,
    /// Minimum change that counts as an improvement.
    #[serde(default = "default_min_delta")]
    pub min_delta: f64,
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default = "default_true")]
    pub restore_best_weights: bool,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            monitor: default_monitor(),
            patience: default_early_stopping_patience(),
            min_delta: default_min_delta(),
            mode: default_mode(),
            restore_best_weights: true,
        }
    }
}

/// Plateau learning-rate reduction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReduceLrConfig {
    #[serde(default = "default_monitor")]
    pub monitor: Monitor,
    /// Multiplier applied to the learning rate on a plateau.
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_plateau_patience")]
    pub patience: usize,
    #[serde(default = "default_min_learning_rate")]
    pub min_learning_rate: f64,
    #[serde(default = "default_mode")]
    pub mode: Mode,
}

impl Default for ReduceLrConfig {
    fn default() -> Self {
        Self {
            monitor: default_monitor(),
            factor: default_factor(),
            patience: default_plateau_patience(),
            min_learning_rate: default_min_learning_rate(),
            mode: default_mode(),
        }
    }
}

fn default_monitor() -> Monitor {
    Monitor::ValLoss
}

fn default_mode() -> Mode {
    Mode::Min
}

fn default_early_stopping_patience() -> usize {
    10
}

fn default_min_delta() -> f64 {
    0.001
}

fn default_factor() -> f64 {
    0.5
}

fn default_plateau_patience() -> usize {
    5
}

fn default_min_learning_rate() -> f64 {
    1e-7
}

/// Event stream sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventConfig {
    /// Buffered epoch metric samples per subscriber.
    #[serde(default = "default_channel_capacity")]
    pub metric_channel_capacity: usize,
    /// Buffered batch samples per subscriber; slow subscribers lag and skip.
    #[serde(default = "default_channel_capacity")]
    pub batch_channel_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            metric_channel_capacity: default_channel_capacity(),
            batch_channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_channel_capacity() -> usize {
    256
}

fn default_true() -> bool {
    true
}

/// User-level config file, if the platform has a config directory.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "netlab", "netlab")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `NETLAB_`)
/// 3. Workspace-local config (`.netlab/config.toml`)
/// 4. User config (`~/.config/netlab/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&EngineConfig>,
) -> Result<EngineConfig, EngineError> {
    let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".netlab").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // NETLAB_TRAINING__EPOCHS, NETLAB_PLATEAU__FACTOR, etc.
    figment = figment.merge(Env::prefixed("NETLAB_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: EngineConfig = figment.extract().map_err(Box::new)?;
    config.training.validate()?;
    Ok(config)
}
