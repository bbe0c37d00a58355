//! Sweep registry and reconciler.
//!
//! The controller is the single owner of live [`Sweep`]s. External requests
//! only write desired state into the [`ConfigStore`]; every [`SweepController::run`]
//! pass reconciles the stored configurations against the live set, ticks the
//! live sweeps, writes their state back, and retires the settled ones.

use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use sl_store::ConfigStore;
use sl_types::{DesiredState, MountConfig, SlError, SlResult, SweepConfig, SweepError, SweepStage};

use crate::objective::ObjectiveRegistry;
use crate::sweep::Sweep;

/// Maps sweep ids to live sweeps and drives them.
pub struct SweepController<S: ConfigStore> {
    store: S,
    registry: ObjectiveRegistry,
    sweeps: BTreeMap<String, Sweep>,
}

impl<S: ConfigStore> SweepController<S> {
    /// Controller with the default objective registry.
    pub fn new(store: S) -> Self {
        Self::with_registry(store, ObjectiveRegistry::with_defaults())
    }

    pub fn with_registry(store: S, registry: ObjectiveRegistry) -> Self {
        Self {
            store,
            registry,
            sweeps: BTreeMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Admit a sweep.
    ///
    /// Rejections come back as `Ok` messages and leave everything untouched;
    /// `Err` is reserved for store failures.
    pub fn run_sweep(&mut self, mut config: SweepConfig) -> SlResult<String> {
        match config.validate() {
            Ok(()) => {}
            Err(SlError::Sweep(reason)) => {
                warn!(sweep_id = %config.sweep_id, "rejected sweep: {reason}");
                return Ok(reason.to_string());
            }
            Err(e) => return Err(e),
        }

        for mount in &config.mounts {
            if self.store.get_mount(mount.name())?.is_none() {
                let reason = SweepError::MountNotFound {
                    mount: mount.name().to_string(),
                };
                warn!(sweep_id = %config.sweep_id, "rejected sweep: {reason}");
                return Ok(reason.to_string());
            }
        }

        let sweep_id = config.sweep_id.clone();
        let stored_running = self
            .store
            .get_sweep(&sweep_id)?
            .is_some_and(|stored| stored.stage == SweepStage::Running);
        if self.sweeps.contains_key(&sweep_id) || stored_running {
            let reason = SweepError::AlreadyRunning { sweep_id };
            warn!("{reason}");
            return Ok(reason.to_string());
        }

        // Resubmitted records start over.
        config.stage = SweepStage::NotStarted;
        config.trials.clear();
        config.trials_done = 0;
        config.url = None;
        config.desired_state = DesiredState::Running;
        self.store.put_sweep(&config)?;
        info!(sweep_id = %sweep_id, n_trials = config.n_trials, "sweep submitted");
        Ok(format!("Launched a Sweep '{sweep_id}'."))
    }

    /// Ask a sweep to stop. Takes effect on the next [`SweepController::run`].
    pub fn stop_sweep(&mut self, sweep_id: &str) -> SlResult<String> {
        let mut config = self
            .store
            .get_sweep(sweep_id)?
            .ok_or_else(|| SweepError::NotFound {
                sweep_id: sweep_id.to_string(),
            })?;

        if config.stage.is_terminal() && !self.sweeps.contains_key(sweep_id) {
            return Ok(format!("The Sweep '{sweep_id}' is already {}.", config.stage));
        }
        config.desired_state = DesiredState::Stopped;
        self.store.put_sweep(&config)?;
        info!(sweep_id = %sweep_id, "sweep stop requested");
        Ok(format!("Stopping the Sweep '{sweep_id}'."))
    }

    /// Bring the live set in line with the desired state of `configs`.
    pub fn on_reconcile(&mut self, configs: &[SweepConfig]) -> SlResult<()> {
        for config in configs {
            let sweep_id = &config.sweep_id;
            match config.desired_state {
                DesiredState::Running => {
                    if self.sweeps.contains_key(sweep_id) || config.stage.is_terminal() {
                        continue;
                    }
                    match Sweep::from_config(config.clone(), &self.registry) {
                        Ok(sweep) => {
                            self.sweeps.insert(sweep_id.clone(), sweep);
                        }
                        Err(e) => {
                            error!(sweep_id = %sweep_id, error = %e, "cannot instantiate sweep");
                            let mut failed = config.clone();
                            failed.stage = SweepStage::Failed;
                            self.store.put_sweep(&failed)?;
                        }
                    }
                }
                DesiredState::Stopped => {
                    if let Some(mut sweep) = self.sweeps.remove(sweep_id) {
                        sweep.stop();
                        Self::persist(&self.store, &sweep)?;
                    } else if !config.stage.is_terminal() {
                        let mut stopped = config.clone();
                        stopped.stage = SweepStage::Stopped;
                        self.store.put_sweep(&stopped)?;
                        info!(sweep_id = %sweep_id, "sweep stopped before it was instantiated");
                    }
                }
            }
        }
        Ok(())
    }

    /// One pass of the control loop.
    pub fn run(&mut self) -> SlResult<()> {
        let configs = self.store.list_sweeps()?;
        self.on_reconcile(&configs)?;

        let mut settled = Vec::new();
        for (sweep_id, sweep) in self.sweeps.iter_mut() {
            if let Err(e) = sweep.tick() {
                error!(sweep_id = %sweep_id, error = %e, "sweep tick failed");
                sweep.fail();
            }
            if sweep.take_updated() {
                Self::persist(&self.store, sweep)?;
            }
            if sweep.is_settled() {
                settled.push(sweep_id.clone());
            }
        }

        for sweep_id in settled {
            if let Some(sweep) = self.sweeps.remove(&sweep_id) {
                Self::persist(&self.store, &sweep)?;
                info!(
                    sweep_id = %sweep_id,
                    stage = %sweep.stage(),
                    best_score = ?sweep.best_model_score(),
                    "sweep retired"
                );
            }
        }
        debug!(live = self.sweeps.len(), "control loop pass finished");
        Ok(())
    }

    pub fn add_mount(&mut self, mount: MountConfig) -> SlResult<()> {
        self.store.put_mount(&mount)?;
        info!(name = %mount.name, source = %mount.source, "mount registered");
        Ok(())
    }

    pub fn list_sweeps(&self) -> SlResult<Vec<SweepConfig>> {
        self.store.list_sweeps()
    }

    /// Latest known state: the live instance if there is one, the stored
    /// record otherwise.
    pub fn get_sweep(&self, sweep_id: &str) -> SlResult<Option<SweepConfig>> {
        match self.sweeps.get(sweep_id) {
            Some(sweep) => Ok(Some(sweep.collect_config())),
            None => self.store.get_sweep(sweep_id),
        }
    }

    pub fn live_sweep(&self, sweep_id: &str) -> Option<&Sweep> {
        self.sweeps.get(sweep_id)
    }

    pub fn live_sweeps(&self) -> usize {
        self.sweeps.len()
    }

    /// Write a live sweep back, keeping whatever desired state was requested
    /// since it was loaded.
    fn persist(store: &S, sweep: &Sweep) -> SlResult<()> {
        let mut config = sweep.collect_config();
        if let Some(stored) = store.get_sweep(&config.sweep_id)? {
            config.desired_state = stored.desired_state;
        }
        store.put_sweep(&config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::SilentLogger;
    use crate::objective::ObjectiveRunner;
    use crate::test_support::{echo_factory, MockObjective};
    use sl_optimizer::Algorithm;
    use sl_store::MemoryStore;
    use sl_types::{
        AlgorithmError, AlgorithmKind, Distribution, MountSpec, Params, Report, TrialRecord,
        TrialStage,
    };

    /// Accepts the search space but never produces parameters.
    struct BrokenAlgorithm;

    impl Algorithm for BrokenAlgorithm {
        fn register_distributions(
            &mut self,
            _distributions: &BTreeMap<String, Distribution>,
        ) -> SlResult<()> {
            Ok(())
        }

        fn register_trials(&mut self, _history: &[TrialRecord]) -> SlResult<()> {
            Ok(())
        }

        fn get_params(&mut self, trial_id: usize) -> SlResult<Params> {
            Err(AlgorithmError::UnknownTrial { trial_id }.into())
        }

        fn trial_start(&mut self, _trial_id: usize) {}

        fn restore_params(&mut self, _trial_id: usize, _params: Params) -> SlResult<()> {
            Ok(())
        }

        fn trial_end(&mut self, _trial_id: usize, _score: f64) -> SlResult<()> {
            Ok(())
        }

        fn should_prune(&mut self, _trial_id: usize, _reports: &[Report]) -> bool {
            false
        }

        fn observed_trials(&self) -> usize {
            0
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    fn registry() -> ObjectiveRegistry {
        let mut registry = ObjectiveRegistry::new();
        let echo = echo_factory();
        registry.register("echo", move |context| echo(context));
        registry.register("hang", |_| Box::new(MockObjective::hanging()) as Box<dyn ObjectiveRunner>);
        registry.register("crash", |_| {
            Box::new(MockObjective::failing("segfault")) as Box<dyn ObjectiveRunner>
        });
        registry
    }

    fn controller() -> SweepController<MemoryStore> {
        SweepController::with_registry(MemoryStore::new(), registry())
    }

    fn config(id: &str, framework: &str) -> SweepConfig {
        SweepConfig::new(id, "train.py", 3)
            .with_distribution("x", Distribution::uniform(-10.0, 10.0))
            .with_algorithm(AlgorithmKind::Random)
            .with_framework(framework)
            .with_seed(3)
    }

    fn run_until_retired(controller: &mut SweepController<MemoryStore>, sweep_id: &str) {
        controller.run().unwrap();
        for _ in 0..10 {
            if controller.live_sweep(sweep_id).is_none() {
                return;
            }
            controller.run().unwrap();
        }
        panic!("sweep {sweep_id} was never retired");
    }

    #[test]
    fn unknown_mount_is_rejected() {
        let mut controller = controller();
        let config = config("a", "echo").with_mount(MountSpec::new("s3://a/", "/content/a/"));

        let message = controller.run_sweep(config).unwrap();
        assert_eq!(message, "The provided mount 'a/' doesn't exist.");
        assert!(controller.store().get_sweep("a").unwrap().is_none());
        controller.run().unwrap();
        assert!(controller.live_sweep("a").is_none());
    }

    #[test]
    fn registered_mount_is_accepted() {
        let mut controller = controller();
        controller
            .add_mount(MountConfig {
                name: "a/".into(),
                source: "s3://a/".into(),
                mount_path: "/content/a/".into(),
            })
            .unwrap();

        let config = config("a", "echo").with_mount(MountSpec::new("s3://a/", "/content/a/"));
        assert_eq!(controller.run_sweep(config).unwrap(), "Launched a Sweep 'a'.");
    }

    #[test]
    fn invalid_config_is_rejected_without_writes() {
        let mut controller = controller();
        let mut bad = config("a", "echo");
        bad.n_trials = 0;

        let message = controller.run_sweep(bad).unwrap();
        assert!(message.starts_with("Invalid sweep configuration: "), "{message}");
        assert!(controller.list_sweeps().unwrap().is_empty());
    }

    #[test]
    fn running_sweep_cannot_be_replaced() {
        let mut controller = controller();
        assert_eq!(
            controller.run_sweep(config("a", "hang")).unwrap(),
            "Launched a Sweep 'a'."
        );
        controller.run().unwrap();
        assert!(controller.live_sweep("a").is_some());

        let mut second = config("a", "hang");
        second.n_trials = 7;
        let message = controller.run_sweep(second).unwrap();
        assert_eq!(
            message,
            "The current Sweep 'a' is running. It couldn't be updated."
        );
        assert_eq!(controller.store().get_sweep("a").unwrap().unwrap().n_trials, 3);
        assert_eq!(controller.live_sweeps(), 1);
    }

    #[test]
    fn submitted_sweep_runs_to_success() {
        let mut controller = controller();
        controller.run_sweep(config("a", "echo")).unwrap();
        run_until_retired(&mut controller, "a");

        let stored = controller.get_sweep("a").unwrap().unwrap();
        assert_eq!(stored.stage, SweepStage::Succeeded);
        assert_eq!(stored.trials_done, 3);
        assert!(stored
            .trials
            .values()
            .all(|t| t.stage == TrialStage::Succeeded));

        controller.run().unwrap();
        assert!(controller.live_sweep("a").is_none());
    }

    #[test]
    fn stop_tears_down_live_sweep() {
        let mut controller = controller();
        controller.run_sweep(config("a", "hang")).unwrap();
        controller.run().unwrap();
        assert_eq!(
            controller.get_sweep("a").unwrap().unwrap().stage,
            SweepStage::Running
        );

        assert_eq!(controller.stop_sweep("a").unwrap(), "Stopping the Sweep 'a'.");
        controller.run().unwrap();

        assert!(controller.live_sweep("a").is_none());
        let stored = controller.store().get_sweep("a").unwrap().unwrap();
        assert_eq!(stored.stage, SweepStage::Stopped);
        assert_eq!(stored.desired_state, DesiredState::Stopped);

        controller.run().unwrap();
        assert!(controller.live_sweep("a").is_none());
    }

    #[test]
    fn stop_before_first_pass() {
        let mut controller = controller();
        controller.run_sweep(config("a", "hang")).unwrap();
        controller.stop_sweep("a").unwrap();
        controller.run().unwrap();

        assert!(controller.live_sweep("a").is_none());
        assert_eq!(
            controller.store().get_sweep("a").unwrap().unwrap().stage,
            SweepStage::Stopped
        );
    }

    #[test]
    fn stopping_unknown_sweep_is_an_error() {
        let mut controller = controller();
        assert!(matches!(
            controller.stop_sweep("ghost"),
            Err(SlError::Sweep(SweepError::NotFound { .. }))
        ));
    }

    #[test]
    fn failed_sweep_is_retired() {
        let mut controller = controller();
        controller.run_sweep(config("a", "crash")).unwrap();
        run_until_retired(&mut controller, "a");

        let stored = controller.store().get_sweep("a").unwrap().unwrap();
        assert_eq!(stored.stage, SweepStage::Failed);
        assert_eq!(stored.trials[&0].error.as_deref(), Some("segfault"));
        assert_eq!(stored.trials[&1].stage, TrialStage::Pending);
    }

    #[test]
    fn finished_sweep_can_be_resubmitted() {
        let mut controller = controller();
        let mut first = config("a", "echo");
        first.n_trials = 2;
        controller.run_sweep(first).unwrap();
        run_until_retired(&mut controller, "a");
        assert_eq!(
            controller.get_sweep("a").unwrap().unwrap().stage,
            SweepStage::Succeeded
        );

        let mut again = controller.get_sweep("a").unwrap().unwrap();
        again.n_trials = 4;
        assert_eq!(controller.run_sweep(again).unwrap(), "Launched a Sweep 'a'.");
        let submitted = controller.store().get_sweep("a").unwrap().unwrap();
        assert_eq!(submitted.stage, SweepStage::NotStarted);
        assert_eq!(submitted.trials_done, 0);
        assert!(submitted.trials.is_empty());

        run_until_retired(&mut controller, "a");
        let stored = controller.store().get_sweep("a").unwrap().unwrap();
        assert_eq!(stored.stage, SweepStage::Succeeded);
        assert_eq!(stored.trials_done, 4);
        assert_eq!(stored.trials.len(), 4);
    }

    #[test]
    fn algorithm_error_fails_and_retires_sweep() {
        let mut controller = controller();
        let config = config("a", "echo");
        controller.run_sweep(config.clone()).unwrap();

        let factory = controller.registry.resolve("echo").unwrap();
        let sweep = Sweep::new(config, Box::new(BrokenAlgorithm), factory, Box::new(SilentLogger)).unwrap();
        controller.sweeps.insert("a".to_string(), sweep);

        controller.run().unwrap();

        assert!(controller.live_sweep("a").is_none());
        let stored = controller.store().get_sweep("a").unwrap().unwrap();
        assert_eq!(stored.stage, SweepStage::Failed);
        assert_eq!(stored.desired_state, DesiredState::Running);
        assert_eq!(stored.trials_done, 0);

        controller.run().unwrap();
        assert!(controller.live_sweep("a").is_none());
    }

    #[test]
    fn unresolvable_framework_marks_sweep_failed() {
        let mut controller = controller();
        controller.run_sweep(config("a", "keras")).unwrap();
        controller.run().unwrap();

        assert!(controller.live_sweep("a").is_none());
        assert_eq!(
            controller.store().get_sweep("a").unwrap().unwrap().stage,
            SweepStage::Failed
        );
    }

    #[test]
    fn progress_is_persisted_while_running() {
        let mut controller = controller();
        controller.run_sweep(config("a", "hang")).unwrap();
        controller.run().unwrap();

        let stored = controller.store().get_sweep("a").unwrap().unwrap();
        assert_eq!(stored.stage, SweepStage::Running);
        assert_eq!(stored.trials[&0].stage, TrialStage::Running);
        assert!(!stored.trials[&0].params.is_empty());
    }
}
