//! Scripted objective runners for controller tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use sl_types::{Params, Report, RunnerStage};

use crate::objective::{ObjectiveContext, ObjectiveFactory, ObjectiveRunner};

/// One thing a mock runner does on a `run` call after it started.
#[derive(Debug, Clone)]
pub enum Step {
    Report(u64, f64),
    Finish(f64),
    Fail(String),
    Wait,
}

/// Launches seen by runners built with [`MockObjective::recording`].
pub type LaunchLog = Arc<Mutex<Vec<(usize, Params, u32)>>>;

pub struct MockObjective {
    stage: RunnerStage,
    steps: VecDeque<Step>,
    reports: Vec<Report>,
    score: Option<f64>,
    path: Option<String>,
    monitor: Option<String>,
    failure: Option<String>,
    stopped: bool,
    launches: Option<(usize, LaunchLog)>,
    launch_delay: u32,
}

impl MockObjective {
    pub fn scripted(steps: Vec<Step>) -> Self {
        Self {
            stage: RunnerStage::NotStarted,
            steps: steps.into(),
            reports: Vec::new(),
            score: None,
            path: None,
            monitor: None,
            failure: None,
            stopped: false,
            launches: None,
            launch_delay: 0,
        }
    }

    /// Finishes with `score` on its first run.
    pub fn succeeding(score: f64) -> Self {
        Self::scripted(vec![Step::Finish(score)])
    }

    pub fn failing(message: &str) -> Self {
        Self::scripted(vec![Step::Fail(message.to_string())])
    }

    /// Runs forever.
    pub fn hanging() -> Self {
        Self::scripted(Vec::new())
    }

    pub fn with_artifacts(mut self, path: &str, monitor: &str) -> Self {
        self.path = Some(path.to_string());
        self.monitor = Some(monitor.to_string());
        self
    }

    /// Stays NOT_STARTED for the first `runs` calls to `run`.
    pub fn with_launch_delay(mut self, runs: u32) -> Self {
        self.launch_delay = runs;
        self
    }

    pub fn recording(mut self, trial_id: usize, log: LaunchLog) -> Self {
        self.launches = Some((trial_id, log));
        self
    }
}

impl ObjectiveRunner for MockObjective {
    fn run(&mut self, params: &Params, restart_count: u32) {
        if self.stage == RunnerStage::NotStarted {
            if self.launch_delay > 0 {
                self.launch_delay -= 1;
                return;
            }
            self.stage = RunnerStage::Running;
            if let Some((trial_id, log)) = &self.launches {
                log.lock()
                    .unwrap()
                    .push((*trial_id, params.clone(), restart_count));
            }
        }
        if self.stage != RunnerStage::Running {
            return;
        }
        match self.steps.pop_front() {
            Some(Step::Report(step, value)) => self.reports.push(Report::new(step, value)),
            Some(Step::Finish(score)) => {
                self.score = Some(score);
                self.stage = RunnerStage::Succeeded;
            }
            Some(Step::Fail(message)) => {
                self.failure = Some(message);
                self.stage = RunnerStage::Failed;
            }
            Some(Step::Wait) | None => {}
        }
    }

    fn stage(&self) -> RunnerStage {
        self.stage
    }

    fn reports(&self) -> &[Report] {
        &self.reports
    }

    fn best_model_score(&self) -> Option<f64> {
        self.score
    }

    fn best_model_path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    fn monitor(&self) -> Option<&str> {
        self.monitor.as_deref()
    }

    fn has_stopped(&self) -> bool {
        self.stopped
    }

    fn failure_message(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    fn stop(&mut self) {
        self.stopped = true;
        if self.stage == RunnerStage::Running {
            self.stage = RunnerStage::Stopped;
        }
    }
}

/// Factory building a fresh mock per trial.
pub fn mock_factory<F>(make: F) -> ObjectiveFactory
where
    F: Fn(&ObjectiveContext) -> MockObjective + Send + Sync + 'static,
{
    Arc::new(move |context: ObjectiveContext| {
        Box::new(make(&context)) as Box<dyn ObjectiveRunner>
    })
}

/// Every trial succeeds on its first run, scoring its `x` parameter's value.
///
/// Only usable with numeric `x`; the score is read from the params passed to
/// `run`, so this also checks that params reach the runner.
pub fn echo_factory() -> ObjectiveFactory {
    Arc::new(|_context: ObjectiveContext| Box::new(EchoObjective::default()) as Box<dyn ObjectiveRunner>)
}

#[derive(Default)]
struct EchoObjective {
    stage: RunnerStage,
    score: Option<f64>,
    stopped: bool,
}

impl ObjectiveRunner for EchoObjective {
    fn run(&mut self, params: &Params, _restart_count: u32) {
        if self.stage == RunnerStage::NotStarted {
            self.score = params.get("x").and_then(|x| x.as_f64());
            self.stage = if self.score.is_some() {
                RunnerStage::Succeeded
            } else {
                RunnerStage::Failed
            };
        }
    }

    fn stage(&self) -> RunnerStage {
        self.stage
    }

    fn reports(&self) -> &[Report] {
        &[]
    }

    fn best_model_score(&self) -> Option<f64> {
        self.score
    }

    fn best_model_path(&self) -> Option<&str> {
        None
    }

    fn monitor(&self) -> Option<&str> {
        None
    }

    fn has_stopped(&self) -> bool {
        self.stopped
    }

    fn failure_message(&self) -> Option<&str> {
        None
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}
