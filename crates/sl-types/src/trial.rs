//! Per-trial record kept by a sweep and persisted with its configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::distribution::Params;
use crate::errors::{SlResult, SweepError};
use crate::stage::TrialStage;

/// A single trial: one execution of the target script with one parameter
/// assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial_id: usize,
    pub stage: TrialStage,
    /// Empty until the algorithm assigns parameters.
    #[serde(default)]
    pub params: Params,
    pub best_model_score: Option<f64>,
    pub best_model_path: Option<String>,
    /// Name of the metric the score was taken from.
    pub monitor: Option<String>,
    #[serde(default)]
    pub pruned: bool,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TrialRecord {
    pub fn new(trial_id: usize) -> Self {
        Self {
            trial_id,
            stage: TrialStage::Pending,
            params: Params::new(),
            best_model_score: None,
            best_model_path: None,
            monitor: None,
            pruned: false,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn has_params(&self) -> bool {
        !self.params.is_empty()
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) -> SlResult<()> {
        self.transition(TrialStage::Running)?;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn mark_succeeded(
        &mut self,
        score: f64,
        path: Option<String>,
        monitor: Option<String>,
        now: DateTime<Utc>,
    ) -> SlResult<()> {
        self.transition(TrialStage::Succeeded)?;
        self.best_model_score = Some(score);
        self.best_model_path = path;
        self.monitor = monitor;
        self.finished_at = Some(now);
        Ok(())
    }

    pub fn mark_failed(&mut self, error: String, now: DateTime<Utc>) -> SlResult<()> {
        self.transition(TrialStage::Failed)?;
        self.error = Some(error);
        self.finished_at = Some(now);
        Ok(())
    }

    pub fn mark_pruned(&mut self, now: DateTime<Utc>) -> SlResult<()> {
        self.transition(TrialStage::Pruned)?;
        self.pruned = true;
        self.finished_at = Some(now);
        Ok(())
    }

    fn transition(&mut self, to: TrialStage) -> SlResult<()> {
        let allowed = match (self.stage, to) {
            (TrialStage::Pending, TrialStage::Running) => true,
            (TrialStage::Running, TrialStage::Succeeded)
            | (TrialStage::Running, TrialStage::Failed)
            | (TrialStage::Running, TrialStage::Pruned) => true,
            // A runner can fail before the record was ever marked running.
            (TrialStage::Pending, TrialStage::Failed) => true,
            _ => false,
        };
        if !allowed {
            return Err(SweepError::InvalidTransition {
                trial_id: self.trial_id,
                from: self.stage,
                to,
            }
            .into());
        }
        self.stage = to;
        Ok(())
    }
}
