//! Training session records and a JSON-file session log.

use crate::config::TrainingConfig;
use crate::error::EngineError;
use crate::training::metrics::TrainingHistory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Summary of one completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSession {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Epochs requested by the configuration.
    pub epochs: usize,
    /// Epochs actually run; fewer when training stopped early.
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub best_accuracy: f64,
    pub best_loss: f64,
    pub final_loss: f64,
    pub converged: bool,
    pub total_time_ms: u64,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TrainingSession {
    pub fn from_history(config: &TrainingConfig, history: &TrainingHistory) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: None,
            epochs: config.epochs,
            epochs_run: history.epochs_run(),
            best_epoch: history.best_epoch,
            best_accuracy: history.best_accuracy,
            best_loss: history.best_loss,
            final_loss: history
                .final_sample()
                .map(|m| m.loss)
                .unwrap_or(history.best_loss),
            converged: history.converged,
            total_time_ms: history.total_time.as_millis() as u64,
            recorded_at: Utc::now(),
            tags: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn stopped_early(&self) -> bool {
        self.epochs_run < self.epochs
    }
}

/// Ordered log of training sessions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStore {
    pub sessions: Vec<TrainingSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Vec::new(),
        }
    }

    pub fn add(&mut self, session: TrainingSession) {
        self.sessions.push(session);
    }

    pub fn find(&self, id: &str) -> Option<&TrainingSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn latest(&self) -> Option<&TrainingSession> {
        self.sessions.iter().max_by_key(|s| s.recorded_at)
    }

    /// Session with the highest best accuracy; the earliest wins ties.
    pub fn best(&self) -> Option<&TrainingSession> {
        self.sessions.iter().reduce(|best, current| {
            if current.best_accuracy > best.best_accuracy {
                current
            } else {
                best
            }
        })
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
