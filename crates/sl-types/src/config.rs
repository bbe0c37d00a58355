//! Persisted sweep configuration.
//!
//! A [`SweepConfig`] is both the submission format and the record the registry
//! writes back on every externally observable state change, so a sweep can be
//! rebuilt from it after a restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::distribution::Distribution;
use crate::errors::{SlResult, SweepError};
use crate::stage::{DesiredState, SweepStage, TrialStage};
use crate::trial::TrialRecord;

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Maximize,
    Minimize,
}

impl Direction {
    /// True when `candidate` improves on `incumbent`.
    pub fn is_better(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Maximize => candidate > incumbent,
            Self::Minimize => candidate < incumbent,
        }
    }
}

/// Which search strategy drives parameter proposals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlgorithmKind {
    /// Exhaustive grid; continuous axes are split into `steps` points.
    Grid { steps: usize },
    Random,
    Bayesian { exploration_weight: f64 },
}

impl Default for AlgorithmKind {
    fn default() -> Self {
        Self::Bayesian {
            exploration_weight: 0.3,
        }
    }
}

/// Early-stopping policy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PrunerKind {
    #[default]
    Disabled,
    Median { warmup_steps: u64, min_trials: usize },
}

/// Where trial lifecycle notifications go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoggerKind {
    #[default]
    Tracing,
    Silent,
}

/// A storage mount a sweep's script expects to find.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    /// e.g. `s3://datasets/mnist/`
    pub source: String,
    pub mount_path: String,
}

impl MountSpec {
    pub fn new(source: impl Into<String>, mount_path: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            mount_path: mount_path.into(),
        }
    }

    /// Registered mount name: the source without its URL scheme.
    pub fn name(&self) -> &str {
        match self.source.split_once("://") {
            Some((_, rest)) => rest,
            None => &self.source,
        }
    }
}

/// A mount registered with the store, which sweeps may then reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    pub name: String,
    pub source: String,
    pub mount_path: String,
}

/// Configuration and persisted state of one sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Left empty in a submission to have one generated.
    #[serde(default)]
    pub sweep_id: String,
    pub script_path: String,
    #[serde(default)]
    pub script_args: Vec<String>,
    /// Program used to launch the script (e.g. `python3`). `None` executes the
    /// script directly.
    #[serde(default)]
    pub interpreter: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub n_trials: usize,
    /// Upper bound on trials running at the same time.
    pub simultaneous_trials: usize,
    /// Objective runner tag resolved through the objective registry.
    #[serde(default = "default_framework")]
    pub framework: String,
    #[serde(default)]
    pub logger: LoggerKind,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub algorithm: AlgorithmKind,
    #[serde(default)]
    pub pruner: PrunerKind,
    #[serde(default)]
    pub seed: Option<u64>,
    pub distributions: BTreeMap<String, Distribution>,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub mounts: Vec<MountSpec>,
    #[serde(default)]
    pub trials: BTreeMap<usize, TrialRecord>,
    #[serde(default)]
    pub trials_done: usize,
    #[serde(default)]
    pub stage: SweepStage,
    #[serde(default)]
    pub desired_state: DesiredState,
    /// Dashboard url published by the logger.
    #[serde(default)]
    pub url: Option<String>,
    /// Trials running longer than this are failed.
    #[serde(default)]
    pub trial_timeout_secs: Option<u64>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_framework() -> String {
    "base".to_string()
}

impl SweepConfig {
    pub fn new(sweep_id: impl Into<String>, script_path: impl Into<String>, n_trials: usize) -> Self {
        Self {
            sweep_id: sweep_id.into(),
            script_path: script_path.into(),
            script_args: Vec::new(),
            interpreter: None,
            env: BTreeMap::new(),
            n_trials,
            simultaneous_trials: 1,
            framework: default_framework(),
            logger: LoggerKind::default(),
            direction: Direction::default(),
            algorithm: AlgorithmKind::default(),
            pruner: PrunerKind::default(),
            seed: None,
            distributions: BTreeMap::new(),
            requirements: Vec::new(),
            mounts: Vec::new(),
            trials: BTreeMap::new(),
            trials_done: 0,
            stage: SweepStage::NotStarted,
            desired_state: DesiredState::Running,
            url: None,
            trial_timeout_secs: None,
            created_at: Utc::now(),
        }
    }

    /// Short random identifier, the first block of a v4 UUID.
    pub fn generate_id() -> String {
        let id = Uuid::new_v4().to_string();
        id.split('-').next().unwrap_or(&id).to_string()
    }

    pub fn with_distribution(mut self, name: impl Into<String>, distribution: Distribution) -> Self {
        self.distributions.insert(name.into(), distribution);
        self
    }

    pub fn with_simultaneous_trials(mut self, n: usize) -> Self {
        self.simultaneous_trials = n;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_algorithm(mut self, algorithm: AlgorithmKind) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_pruner(mut self, pruner: PrunerKind) -> Self {
        self.pruner = pruner;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_framework(mut self, framework: impl Into<String>) -> Self {
        self.framework = framework.into();
        self
    }

    pub fn with_logger(mut self, logger: LoggerKind) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    pub fn with_script_args(mut self, args: Vec<String>) -> Self {
        self.script_args = args;
        self
    }

    pub fn with_mount(mut self, mount: MountSpec) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn with_trial_timeout(mut self, secs: u64) -> Self {
        self.trial_timeout_secs = Some(secs);
        self
    }

    /// Structural checks run before a sweep is admitted or rebuilt.
    pub fn validate(&self) -> SlResult<()> {
        let invalid = |message: String| SweepError::InvalidConfig { message };

        if self.sweep_id.is_empty()
            || !self
                .sweep_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid(format!(
                "sweep id '{}' must be non-empty and use only letters, digits, '-' or '_'",
                self.sweep_id
            ))
            .into());
        }
        if self.script_path.trim().is_empty() {
            return Err(invalid("script_path is empty".to_string()).into());
        }
        if self.n_trials == 0 {
            return Err(invalid("n_trials must be at least 1".to_string()).into());
        }
        if self.simultaneous_trials == 0 {
            return Err(invalid("simultaneous_trials must be at least 1".to_string()).into());
        }
        if self.trials_done > self.n_trials {
            return Err(invalid(format!(
                "trials_done {} exceeds n_trials {}",
                self.trials_done, self.n_trials
            ))
            .into());
        }
        if let Some(id) = self.trials.keys().find(|id| **id >= self.n_trials) {
            return Err(invalid(format!("trial {id} is outside 0..{}", self.n_trials)).into());
        }
        if self.distributions.is_empty() {
            return Err(invalid("at least one distribution is required".to_string()).into());
        }
        for (name, distribution) in &self.distributions {
            distribution
                .validate(name)
                .map_err(|e| invalid(e.to_string()))?;
        }
        for mount in &self.mounts {
            if mount.name().is_empty() || mount.mount_path.is_empty() {
                return Err(invalid(format!("mount '{}' is incomplete", mount.source)).into());
            }
        }
        if let AlgorithmKind::Bayesian { exploration_weight } = self.algorithm {
            if !(0.0..=1.0).contains(&exploration_weight) {
                return Err(invalid(format!(
                    "exploration_weight {exploration_weight} must be within [0, 1]"
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Best succeeded trial according to the sweep direction. Non-finite
    /// scores never win.
    pub fn best_trial(&self) -> Option<&TrialRecord> {
        self.trials
            .values()
            .filter(|t| t.stage == TrialStage::Succeeded)
            .filter_map(|t| t.best_model_score.map(|score| (t, score)))
            .filter(|(_, score)| score.is_finite())
            .fold(None, |best: Option<(&TrialRecord, f64)>, (trial, score)| match best {
                Some((_, incumbent)) if !self.direction.is_better(score, incumbent) => best,
                _ => Some((trial, score)),
            })
            .map(|(trial, _)| trial)
    }

    /// Number of trials currently in the running stage.
    pub fn running_trials(&self) -> usize {
        self.trials
            .values()
            .filter(|t| t.stage == TrialStage::Running)
            .count()
    }
}
