//! Objective runner abstraction.
//!
//! A runner executes one trial's script somewhere and exposes what it has
//! observed so far. The sweep controller only polls it: `run` is called on
//! every tick and must return promptly.

use std::collections::BTreeMap;
use std::sync::Arc;

use sl_types::{Params, Report, RunnerStage, SlResult, SweepConfig, SweepError};

use crate::script::ScriptObjective;

/// Executes one trial and reports its progress.
pub trait ObjectiveRunner: Send {
    /// Start the trial on the first call; afterwards poll for progress.
    fn run(&mut self, params: &Params, restart_count: u32);

    fn stage(&self) -> RunnerStage;

    /// Intermediate metric values reported so far.
    fn reports(&self) -> &[Report];

    fn best_model_score(&self) -> Option<f64>;

    fn best_model_path(&self) -> Option<&str>;

    /// Name of the metric behind `best_model_score`.
    fn monitor(&self) -> Option<&str>;

    /// True once `stop` was requested.
    fn has_stopped(&self) -> bool;

    /// True when the runner stopped itself because of pruning.
    fn pruned(&self) -> bool {
        false
    }

    fn failure_message(&self) -> Option<&str>;

    /// Ask the runner to terminate. Cooperative; never blocks on the trial.
    fn stop(&mut self);
}

/// Everything a runner needs to know about the trial it executes.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveContext {
    pub sweep_id: String,
    pub trial_id: usize,
    pub script_path: String,
    pub script_args: Vec<String>,
    pub interpreter: Option<String>,
    pub env: BTreeMap<String, String>,
}

impl ObjectiveContext {
    pub fn from_config(config: &SweepConfig, trial_id: usize) -> Self {
        Self {
            sweep_id: config.sweep_id.clone(),
            trial_id,
            script_path: config.script_path.clone(),
            script_args: config.script_args.clone(),
            interpreter: config.interpreter.clone(),
            env: config.env.clone(),
        }
    }
}

/// Creates a runner for one trial.
pub type ObjectiveFactory = Arc<dyn Fn(ObjectiveContext) -> Box<dyn ObjectiveRunner> + Send + Sync>;

/// Maps framework tags to runner factories.
#[derive(Clone, Default)]
pub struct ObjectiveRegistry {
    factories: BTreeMap<String, ObjectiveFactory>,
}

impl ObjectiveRegistry {
    /// Empty registry; see [`ObjectiveRegistry::with_defaults`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the local script runner under `"base"`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("base", |context| {
            Box::new(ScriptObjective::new(context)) as Box<dyn ObjectiveRunner>
        });
        registry
    }

    pub fn register<F>(&mut self, framework: impl Into<String>, factory: F)
    where
        F: Fn(ObjectiveContext) -> Box<dyn ObjectiveRunner> + Send + Sync + 'static,
    {
        self.factories.insert(framework.into(), Arc::new(factory));
    }

    pub fn resolve(&self, framework: &str) -> SlResult<ObjectiveFactory> {
        self.factories.get(framework).cloned().ok_or_else(|| {
            SweepError::UnknownFramework {
                framework: framework.to_string(),
            }
            .into()
        })
    }

    pub fn frameworks(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ObjectiveRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectiveRegistry")
            .field("frameworks", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockObjective;
    use sl_types::{Distribution, SlError};

    #[test]
    fn defaults_include_script_runner() {
        let registry = ObjectiveRegistry::with_defaults();
        assert_eq!(registry.frameworks().collect::<Vec<_>>(), vec!["base"]);
        assert!(registry.resolve("base").is_ok());
    }

    #[test]
    fn unknown_framework_is_an_error() {
        let registry = ObjectiveRegistry::with_defaults();
        assert!(matches!(
            registry.resolve("keras"),
            Err(SlError::Sweep(SweepError::UnknownFramework { .. }))
        ));
    }

    #[test]
    fn registered_factory_receives_trial_context() {
        let mut registry = ObjectiveRegistry::new();
        registry.register("mock", |context| {
            assert_eq!(context.sweep_id, "s");
            Box::new(MockObjective::succeeding(context.trial_id as f64)) as Box<dyn ObjectiveRunner>
        });

        let config = SweepConfig::new("s", "train.py", 4)
            .with_distribution("x", Distribution::uniform(0.0, 1.0));
        let factory = registry.resolve("mock").unwrap();
        let runner = factory(ObjectiveContext::from_config(&config, 2));
        assert_eq!(runner.stage(), RunnerStage::NotStarted);
    }
}
