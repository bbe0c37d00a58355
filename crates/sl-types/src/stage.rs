//! Lifecycle stages for sweeps, trials, and objective runners.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregate stage of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStage {
    #[default]
    NotStarted,
    Running,
    Succeeded,
    Stopped,
    Failed,
}

impl SweepStage {
    /// No transition leaves a terminal stage.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Stopped | Self::Failed)
    }
}

impl fmt::Display for SweepStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Stage of a single trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStage {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Pruned,
}

impl TrialStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Pruned)
    }
}

impl fmt::Display for TrialStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Pruned => "pruned",
        };
        f.write_str(name)
    }
}

/// Observable stage of an objective runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStage {
    #[default]
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Stopped,
}

/// State an external request asks a sweep to be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredState {
    #[default]
    Running,
    Stopped,
}
