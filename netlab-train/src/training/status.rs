//! Run state of the training controller.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Training status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStatus {
    #[default]
    Idle,
    Preparing,
    Training,
    Validating,
    Paused,
    Completed,
    Error,
}

impl TrainingStatus {
    /// Whether a new run may start from this status.
    pub fn accepts_new_run(self) -> bool {
        matches!(self, Self::Idle | Self::Completed | Self::Error)
    }

    /// Whether a run is in flight.
    pub fn is_active(self) -> bool {
        !self.accepts_new_run()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Training => "training",
            Self::Validating => "validating",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for TrainingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
