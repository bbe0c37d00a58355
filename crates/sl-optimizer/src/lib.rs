//! # sl-optimizer
//!
//! Parameter search for Sweepline.
//!
//! Provides search space definitions, parameter sweep strategies (grid, random,
//! Bayesian), early-stopping pruners, and the [`Algorithm`] interface the sweep
//! controller depends on.

mod algorithm;
mod prune;
mod search;
mod trial;

pub use algorithm::{build_algorithm, Algorithm, SearchAlgorithm};
pub use prune::{MedianPruner, NopPruner, Pruner};
pub use search::{
    BayesianSearch, GridSearch, ParameterDef, RandomSearch, SearchSpace, SearchStrategy,
};
pub use trial::{Observation, TrialLedger};
