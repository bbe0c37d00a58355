//! The algorithm interface the sweep controller talks to.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use tracing::debug;

use sl_types::{
    AlgorithmError, AlgorithmKind, Direction, Distribution, Params, PrunerKind, Report, SlResult,
    TrialRecord,
};

use crate::prune::{MedianPruner, NopPruner, Pruner};
use crate::search::{BayesianSearch, GridSearch, RandomSearch, SearchSpace, SearchStrategy};
use crate::trial::TrialLedger;

/// Proposes parameters for trials and decides on early stopping.
///
/// Contract violations (parameters before distributions, unknown trial ids,
/// ending a trial twice) return [`AlgorithmError`]s; callers treat them as
/// fatal.
pub trait Algorithm: Send {
    /// Record the search space. Must be called exactly once, before any
    /// parameter request.
    fn register_distributions(&mut self, distributions: &BTreeMap<String, Distribution>)
        -> SlResult<()>;

    /// Replay previously succeeded trials into the model.
    fn register_trials(&mut self, history: &[TrialRecord]) -> SlResult<()>;

    /// Parameters for `trial_id`; stable across calls for the same trial.
    fn get_params(&mut self, trial_id: usize) -> SlResult<Params>;

    fn trial_start(&mut self, trial_id: usize);

    /// Re-adopt parameters a trial was given before a restart, so
    /// `get_params` and `trial_end` keep working for it.
    fn restore_params(&mut self, trial_id: usize, params: Params) -> SlResult<()>;

    /// Report the final score of a trial. Exactly once per trial.
    fn trial_end(&mut self, trial_id: usize, score: f64) -> SlResult<()>;

    fn should_prune(&mut self, trial_id: usize, reports: &[Report]) -> bool;

    /// Number of completed trials the model has learned from.
    fn observed_trials(&self) -> usize;

    fn name(&self) -> &str;
}

/// An [`Algorithm`] built from a search strategy, a pruner, and the shared
/// trial ledger.
pub struct SearchAlgorithm<S: SearchStrategy> {
    strategy: S,
    pruner: Box<dyn Pruner>,
    direction: Direction,
    space: Option<SearchSpace>,
    ledger: TrialLedger,
    rng: ChaCha8Rng,
}

impl<S: SearchStrategy> SearchAlgorithm<S> {
    pub fn new(strategy: S, direction: Direction, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            strategy,
            pruner: Box::new(NopPruner),
            direction,
            space: None,
            ledger: TrialLedger::new(),
            rng,
        }
    }

    pub fn with_pruner(mut self, pruner: Box<dyn Pruner>) -> Self {
        self.pruner = pruner;
        self
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

impl<S: SearchStrategy> Algorithm for SearchAlgorithm<S> {
    fn register_distributions(
        &mut self,
        distributions: &BTreeMap<String, Distribution>,
    ) -> SlResult<()> {
        if self.space.is_some() {
            return Err(AlgorithmError::DistributionsAlreadyRegistered.into());
        }
        self.space = Some(SearchSpace::from_distributions(distributions)?);
        Ok(())
    }

    fn register_trials(&mut self, history: &[TrialRecord]) -> SlResult<()> {
        for observation in self.ledger.replay(history) {
            self.strategy.report(&observation.params, observation.objective);
        }
        if !history.is_empty() {
            debug!(
                algorithm = self.strategy.name(),
                observed = self.ledger.observations().len(),
                "replayed trial history"
            );
        }
        Ok(())
    }

    fn get_params(&mut self, trial_id: usize) -> SlResult<Params> {
        let space = self
            .space
            .as_ref()
            .ok_or(AlgorithmError::DistributionsNotRegistered)?;
        if let Some(params) = self.ledger.cached(trial_id)? {
            return Ok(params.clone());
        }
        let params = self.strategy.suggest(trial_id, space, &mut self.rng);
        self.ledger.cache(trial_id, params.clone())?;
        Ok(params)
    }

    fn trial_start(&mut self, trial_id: usize) {
        self.ledger.start(trial_id);
    }

    fn restore_params(&mut self, trial_id: usize, params: Params) -> SlResult<()> {
        self.ledger.start(trial_id);
        if self.ledger.cached(trial_id)?.is_none() {
            self.ledger.cache(trial_id, params)?;
        }
        Ok(())
    }

    fn trial_end(&mut self, trial_id: usize, score: f64) -> SlResult<()> {
        let observation = self.ledger.end(trial_id, score)?;
        self.strategy.report(&observation.params, observation.objective);
        Ok(())
    }

    fn should_prune(&mut self, trial_id: usize, reports: &[Report]) -> bool {
        self.pruner.should_prune(trial_id, reports, self.direction)
    }

    fn observed_trials(&self) -> usize {
        self.ledger.observations().len()
    }

    fn name(&self) -> &str {
        self.strategy.name()
    }
}

/// Build the configured algorithm.
pub fn build_algorithm(
    kind: &AlgorithmKind,
    pruner: &PrunerKind,
    direction: Direction,
    seed: Option<u64>,
) -> Box<dyn Algorithm> {
    let pruner: Box<dyn Pruner> = match pruner {
        PrunerKind::Disabled => Box::new(NopPruner),
        PrunerKind::Median {
            warmup_steps,
            min_trials,
        } => Box::new(MedianPruner::new(*warmup_steps, *min_trials)),
    };

    match kind {
        AlgorithmKind::Grid { steps } => Box::new(
            SearchAlgorithm::new(GridSearch::new(*steps), direction, seed).with_pruner(pruner),
        ),
        AlgorithmKind::Random => Box::new(
            SearchAlgorithm::new(RandomSearch::new(), direction, seed).with_pruner(pruner),
        ),
        AlgorithmKind::Bayesian { exploration_weight } => Box::new(
            SearchAlgorithm::new(
                BayesianSearch::new(direction, *exploration_weight),
                direction,
                seed,
            )
            .with_pruner(pruner),
        ),
    }
}
