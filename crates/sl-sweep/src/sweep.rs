//! The sweep state machine.
//!
//! A [`Sweep`] owns one sweep's configuration, its search algorithm, and one
//! objective runner per active trial. The host drives it by calling
//! [`Sweep::tick`]; every tick walks the trials in index order, starts new
//! ones while there is capacity, polls the running ones, and folds results
//! back into the trial records.

use chrono::{DateTime, Utc};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use sl_optimizer::{build_algorithm, Algorithm};
use sl_types::{RunnerStage, SlResult, SweepConfig, SweepStage, TrialRecord, TrialStage};

use crate::logger::{build_logger, SweepLogger};
use crate::objective::{ObjectiveContext, ObjectiveFactory, ObjectiveRegistry, ObjectiveRunner};

/// One live hyperparameter sweep.
pub struct Sweep {
    config: SweepConfig,
    algorithm: Box<dyn Algorithm>,
    logger: Box<dyn SweepLogger>,
    factory: ObjectiveFactory,
    /// At most one runner per trial index, only for non-terminal trials.
    runners: BTreeMap<usize, Box<dyn ObjectiveRunner>>,
    /// Trials whose start was already announced to the algorithm and logger.
    activated: BTreeSet<usize>,
    restart_count: u32,
    has_updated: bool,
}

impl Sweep {
    /// Validate the configuration, seed the algorithm with the search space
    /// and all succeeded trials, and connect the logger.
    pub fn new(
        config: SweepConfig,
        mut algorithm: Box<dyn Algorithm>,
        factory: ObjectiveFactory,
        mut logger: Box<dyn SweepLogger>,
    ) -> SlResult<Self> {
        config.validate()?;
        algorithm.register_distributions(&config.distributions)?;

        let history: Vec<TrialRecord> = config.trials.values().cloned().collect();
        algorithm.register_trials(&history)?;
        logger.connect(&config.sweep_id);

        // A config that already left NOT_STARTED is being resumed.
        let restart_count = u32::from(config.stage != SweepStage::NotStarted);

        info!(
            sweep_id = %config.sweep_id,
            algorithm = algorithm.name(),
            n_trials = config.n_trials,
            simultaneous_trials = config.simultaneous_trials,
            observed = algorithm.observed_trials(),
            "sweep instantiated"
        );

        Ok(Self {
            config,
            algorithm,
            logger,
            factory,
            runners: BTreeMap::new(),
            activated: BTreeSet::new(),
            restart_count,
            has_updated: false,
        })
    }

    /// Build a sweep with the algorithm, logger and runner its configuration
    /// names.
    pub fn from_config(config: SweepConfig, registry: &ObjectiveRegistry) -> SlResult<Self> {
        let factory = registry.resolve(&config.framework)?;
        let algorithm = build_algorithm(
            &config.algorithm,
            &config.pruner,
            config.direction,
            config.seed,
        );
        let logger = build_logger(config.logger);
        Self::new(config, algorithm, factory, logger)
    }

    pub fn sweep_id(&self) -> &str {
        &self.config.sweep_id
    }

    pub fn stage(&self) -> SweepStage {
        self.config.stage
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn trials(&self) -> &BTreeMap<usize, TrialRecord> {
        &self.config.trials
    }

    pub fn trials_done(&self) -> usize {
        self.config.trials_done
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    /// Number of trials that currently hold a runner.
    pub fn active_runners(&self) -> usize {
        self.runners.len()
    }

    pub fn algorithm(&self) -> &dyn Algorithm {
        self.algorithm.as_ref()
    }

    /// Score of the best succeeded trial for the sweep's direction.
    pub fn best_model_score(&self) -> Option<f64> {
        self.config.best_trial().and_then(|t| t.best_model_score)
    }

    pub fn best_model_path(&self) -> Option<&str> {
        self.config
            .best_trial()
            .and_then(|t| t.best_model_path.as_deref())
    }

    pub fn configure_layout(&self) -> Option<String> {
        self.logger.configure_layout()
    }

    /// Snapshot of the configuration including all trial state.
    pub fn collect_config(&self) -> SweepConfig {
        self.config.clone()
    }

    /// True when something worth persisting changed since the last call.
    pub fn take_updated(&mut self) -> bool {
        std::mem::take(&mut self.has_updated)
    }

    /// Nothing left to drive: succeeded, stopped, or failed with every
    /// running sibling drained.
    pub fn is_settled(&self) -> bool {
        match self.config.stage {
            SweepStage::Succeeded | SweepStage::Stopped => true,
            SweepStage::Failed => self.runners.is_empty(),
            SweepStage::NotStarted | SweepStage::Running => false,
        }
    }

    pub fn tick(&mut self) -> SlResult<()> {
        self.tick_at(Utc::now())
    }

    /// One pass of the control loop, with `now` as the wall clock.
    ///
    /// Safe to call repeatedly; a succeeded or stopped sweep is left alone.
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> SlResult<()> {
        if matches!(self.config.stage, SweepStage::Succeeded | SweepStage::Stopped) {
            return Ok(());
        }
        if self.complete_if_done() {
            return Ok(());
        }

        for trial_id in 0..self.config.n_trials {
            self.tick_trial(trial_id, now)?;
        }

        self.complete_if_done();
        Ok(())
    }

    /// Stop every runner and move a non-terminal sweep to STOPPED.
    pub fn stop(&mut self) {
        for (trial_id, mut runner) in std::mem::take(&mut self.runners) {
            debug!(sweep_id = %self.config.sweep_id, trial_id, "stopping trial runner");
            runner.stop();
        }
        if !self.config.stage.is_terminal() {
            self.config.stage = SweepStage::Stopped;
            self.has_updated = true;
            info!(sweep_id = %self.config.sweep_id, "sweep stopped");
        }
    }

    /// Stop every runner and mark a non-terminal sweep FAILED. Used when the
    /// sweep cannot make progress at all.
    pub fn fail(&mut self) {
        for (_, mut runner) in std::mem::take(&mut self.runners) {
            runner.stop();
        }
        if !self.config.stage.is_terminal() {
            self.config.stage = SweepStage::Failed;
            self.has_updated = true;
        }
    }

    fn complete_if_done(&mut self) -> bool {
        if self.config.trials_done != self.config.n_trials {
            return false;
        }
        if self.config.stage != SweepStage::Succeeded {
            self.config.stage = SweepStage::Succeeded;
            self.has_updated = true;
            info!(
                sweep_id = %self.config.sweep_id,
                trials_done = self.config.trials_done,
                best_score = ?self.best_model_score(),
                "sweep succeeded"
            );
        }
        true
    }

    fn tick_trial(&mut self, trial_id: usize, now: DateTime<Utc>) -> SlResult<()> {
        let Self {
            config,
            algorithm,
            logger,
            factory,
            runners,
            activated,
            restart_count,
            has_updated,
        } = self;

        let trial_stage = config
            .trials
            .entry(trial_id)
            .or_insert_with(|| TrialRecord::new(trial_id))
            .stage;
        if trial_stage.is_terminal() {
            runners.remove(&trial_id);
            return Ok(());
        }

        let runner = match runners.entry(trial_id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                // Resumed RUNNING trials already hold a slot.
                let at_capacity = trial_stage == TrialStage::Pending
                    && config.running_trials() >= config.simultaneous_trials;
                if config.stage == SweepStage::Failed || at_capacity {
                    return Ok(());
                }
                entry.insert(factory(ObjectiveContext::from_config(config, trial_id)))
            }
        };

        let record = config
            .trials
            .entry(trial_id)
            .or_insert_with(|| TrialRecord::new(trial_id));

        // Slow runners can sit in NOT_STARTED for several ticks.
        if runner.stage() == RunnerStage::NotStarted && activated.insert(trial_id) {
            algorithm.trial_start(trial_id);
            if record.has_params() {
                algorithm.restore_params(trial_id, record.params.clone())?;
            }
            logger.on_after_trial_start(&config.sweep_id);
        }

        if !record.has_params() {
            record.params = algorithm.get_params(trial_id)?;
            if config.stage == SweepStage::NotStarted {
                config.stage = SweepStage::Running;
            }
        }
        if record.stage == TrialStage::Pending {
            record.mark_running(now)?;
            *has_updated = true;
            debug!(sweep_id = %config.sweep_id, trial_id, params = ?record.params, "trial running");
        }

        if let Some(url) = logger.get_url(trial_id) {
            if config.url.as_deref() != Some(url.as_str()) {
                config.url = Some(url);
                *has_updated = true;
            }
        }

        runner.run(&record.params, *restart_count);

        if runner.stage() == RunnerStage::Failed {
            let message = runner
                .failure_message()
                .unwrap_or("objective runner failed")
                .to_string();
            warn!(sweep_id = %config.sweep_id, trial_id, error = %message, "trial failed");
            record.mark_failed(message, now)?;
            config.stage = SweepStage::Failed;
            runners.remove(&trial_id);
            *has_updated = true;
            return Ok(());
        }

        if !record.pruned
            && !runner.reports().is_empty()
            && algorithm.should_prune(trial_id, runner.reports())
        {
            record.mark_pruned(now)?;
            runner.stop();
            runners.remove(&trial_id);
            config.trials_done += 1;
            *has_updated = true;
            info!(sweep_id = %config.sweep_id, trial_id, "trial pruned");
            return Ok(());
        }

        if let Some(score) = runner.best_model_score() {
            if !runner.has_stopped() && !runner.pruned() {
                algorithm.trial_end(trial_id, score)?;
                logger.on_after_trial_end(
                    &config.sweep_id,
                    trial_id,
                    runner.monitor(),
                    score,
                    &record.params,
                );
                record.mark_succeeded(
                    score,
                    runner.best_model_path().map(str::to_string),
                    runner.monitor().map(str::to_string),
                    now,
                )?;
                config.trials_done += 1;
                runner.stop();
                runners.remove(&trial_id);
                *has_updated = true;
                return Ok(());
            }
        }

        if let (Some(limit), Some(started_at)) = (config.trial_timeout_secs, record.started_at) {
            let limit_ms = i64::try_from(limit.saturating_mul(1000)).unwrap_or(i64::MAX);
            if (now - started_at).num_milliseconds() > limit_ms {
                runner.stop();
                let message = format!("Trial {trial_id} timed out after {limit}s");
                warn!(sweep_id = %config.sweep_id, trial_id, "{message}");
                record.mark_failed(message, now)?;
                config.stage = SweepStage::Failed;
                runners.remove(&trial_id);
                *has_updated = true;
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for Sweep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweep")
            .field("sweep_id", &self.config.sweep_id)
            .field("stage", &self.config.stage)
            .field("trials_done", &self.config.trials_done)
            .field("algorithm", &self.algorithm.name())
            .field("active_runners", &self.runners.keys().collect::<Vec<_>>())
            .finish()
    }
}
