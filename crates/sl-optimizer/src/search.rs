//! Search space definitions and parameter sweep strategies.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use sl_types::{AlgorithmError, Direction, Distribution, ParameterValue, Params};

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    pub name: String,
    pub distribution: Distribution,
}

/// The full search space, ordered by parameter name so seeded sampling is
/// reproducible.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    /// Build a space from named distributions, validating each one.
    pub fn from_distributions(
        distributions: &BTreeMap<String, Distribution>,
    ) -> Result<Self, AlgorithmError> {
        let mut parameters = Vec::with_capacity(distributions.len());
        for (name, distribution) in distributions {
            distribution.validate(name)?;
            parameters.push(ParameterDef {
                name: name.clone(),
                distribution: distribution.clone(),
            });
        }
        Ok(Self { parameters })
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Draw one independent sample for every parameter.
    pub fn sample(&self, rng: &mut ChaCha8Rng) -> Params {
        self.parameters
            .iter()
            .map(|param| (param.name.clone(), sample_value(&param.distribution, rng)))
            .collect()
    }

    /// Total number of grid points with `steps` points per continuous axis.
    pub fn grid_size(&self, steps: usize) -> Option<usize> {
        let mut total: usize = 1;
        for param in &self.parameters {
            total = total.checked_mul(grid_axis(&param.distribution, steps).len())?;
        }
        Some(total)
    }
}

pub(crate) fn sample_value(distribution: &Distribution, rng: &mut ChaCha8Rng) -> ParameterValue {
    match distribution {
        Distribution::Uniform { low, high } => ParameterValue::Float(rng.gen_range(*low..=*high)),
        Distribution::IntUniform { low, high } => ParameterValue::Int(rng.gen_range(*low..=*high)),
        Distribution::LogUniform { low, high } => {
            let log_val: f64 = rng.gen_range(low.ln()..=high.ln());
            ParameterValue::Float(log_val.exp().clamp(*low, *high))
        }
        Distribution::Categorical { choices } => {
            let idx = rng.gen_range(0..choices.len());
            ParameterValue::Json(choices[idx].clone())
        }
    }
}

/// Discrete points along one axis of the grid.
fn grid_axis(distribution: &Distribution, steps: usize) -> Vec<ParameterValue> {
    let steps = steps.max(2);
    match distribution {
        Distribution::Uniform { low, high } => (0..steps)
            .map(|i| {
                let t = i as f64 / (steps - 1) as f64;
                ParameterValue::Float(low + t * (high - low))
            })
            .collect(),
        Distribution::LogUniform { low, high } => {
            let log_low = low.ln();
            let log_high = high.ln();
            (0..steps)
                .map(|i| {
                    let t = i as f64 / (steps - 1) as f64;
                    ParameterValue::Float((log_low + t * (log_high - log_low)).exp())
                })
                .collect()
        }
        Distribution::IntUniform { low, high } => {
            let width = high.abs_diff(*low);
            if width < steps as u64 {
                return (*low..=*high).map(ParameterValue::Int).collect();
            }
            // Wide integer ranges are thinned to `steps` evenly spaced points.
            let mut values: Vec<i64> = (0..steps)
                .map(|i| {
                    let t = i as f64 / (steps - 1) as f64;
                    (*low as f64 + t * (*high as f64 - *low as f64)).round() as i64
                })
                .collect();
            values.dedup();
            values.into_iter().map(ParameterValue::Int).collect()
        }
        Distribution::Categorical { choices } => choices
            .iter()
            .map(|v| ParameterValue::Json(v.clone()))
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Common trait for all search strategies.
pub trait SearchStrategy: Send {
    /// Propose parameters for `trial_id`.
    fn suggest(&mut self, trial_id: usize, space: &SearchSpace, rng: &mut ChaCha8Rng) -> Params;

    /// Report completed trial results so adaptive strategies can learn.
    fn report(&mut self, _params: &Params, _objective: f64) {}

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

// ---- Grid search ----

/// Exhaustive grid search. Trial `i` receives grid point `i mod len`, so a
/// resumed sweep hands out the same points as before.
#[derive(Debug, Clone)]
pub struct GridSearch {
    /// Number of steps for continuous dimensions.
    steps: usize,
    combos: Option<Vec<Params>>,
}

impl GridSearch {
    pub fn new(steps: usize) -> Self {
        Self {
            steps,
            combos: None,
        }
    }

    fn build_grid(space: &SearchSpace, steps: usize) -> Vec<Params> {
        // Cartesian product
        let mut result: Vec<Params> = vec![Params::new()];
        for param in &space.parameters {
            let axis = grid_axis(&param.distribution, steps);
            let mut next = Vec::with_capacity(result.len() * axis.len());
            for existing in &result {
                for value in &axis {
                    let mut combo = existing.clone();
                    combo.insert(param.name.clone(), value.clone());
                    next.push(combo);
                }
            }
            result = next;
        }
        result
    }
}

impl SearchStrategy for GridSearch {
    fn suggest(&mut self, trial_id: usize, space: &SearchSpace, _rng: &mut ChaCha8Rng) -> Params {
        let steps = self.steps;
        let combos = self
            .combos
            .get_or_insert_with(|| Self::build_grid(space, steps));
        combos[trial_id % combos.len()].clone()
    }

    fn name(&self) -> &str {
        "grid"
    }
}

// ---- Random search ----

/// Independent random sampling across the search space.
#[derive(Debug, Clone, Default)]
pub struct RandomSearch;

impl RandomSearch {
    pub fn new() -> Self {
        Self
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, _trial_id: usize, space: &SearchSpace, rng: &mut ChaCha8Rng) -> Params {
        space.sample(rng)
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Bayesian search (surrogate heuristic) ----

/// Bayesian optimization using a simple surrogate model.
///
/// Tracks observed (params, objective) pairs and biases sampling toward the
/// best one seen so far. With probability `exploration_weight`, or before any
/// observation exists, it samples the whole space instead.
#[derive(Debug, Clone)]
pub struct BayesianSearch {
    direction: Direction,
    observations: Vec<(Params, f64)>,
    exploration_weight: f64,
}

impl BayesianSearch {
    pub fn new(direction: Direction, exploration_weight: f64) -> Self {
        Self {
            direction,
            observations: Vec::new(),
            exploration_weight: exploration_weight.clamp(0.0, 1.0),
        }
    }

    pub fn observations(&self) -> &[(Params, f64)] {
        &self.observations
    }

    fn best(&self) -> Option<&Params> {
        let mut best: Option<&(Params, f64)> = None;
        for observation in self.observations.iter().filter(|(_, score)| score.is_finite()) {
            match best {
                Some(current) if !self.direction.is_better(observation.1, current.1) => {}
                _ => best = Some(observation),
            }
        }
        best.map(|(params, _)| params)
    }

    /// Exploitation: perturb the best-known point.
    fn exploit(&self, base: &Params, space: &SearchSpace, rng: &mut ChaCha8Rng) -> Params {
        let mut perturbed = Params::new();

        for param in &space.parameters {
            let value = match (&param.distribution, base.get(&param.name)) {
                (Distribution::Uniform { low, high }, Some(ParameterValue::Float(v))) => {
                    let noise = rng.gen_range(-0.1..0.1) * (high - low);
                    ParameterValue::Float((v + noise).clamp(*low, *high))
                }
                (Distribution::IntUniform { low, high }, Some(ParameterValue::Int(v))) => {
                    let delta: i64 = rng.gen_range(-2..=2);
                    ParameterValue::Int(v.saturating_add(delta).clamp(*low, *high))
                }
                (Distribution::LogUniform { low, high }, Some(ParameterValue::Float(v)))
                    if *v > 0.0 =>
                {
                    let log_range = high.ln() - low.ln();
                    let noise = rng.gen_range(-0.1..0.1) * log_range;
                    ParameterValue::Float((v.ln() + noise).exp().clamp(*low, *high))
                }
                // Whole numbers come back from JSON as ints on float axes.
                (Distribution::Uniform { low, high }, Some(ParameterValue::Int(v))) => {
                    let noise = rng.gen_range(-0.1..0.1) * (high - low);
                    ParameterValue::Float((*v as f64 + noise).clamp(*low, *high))
                }
                // Categorical, or no usable base value: resample.
                (distribution, _) => sample_value(distribution, rng),
            };
            perturbed.insert(param.name.clone(), value);
        }

        perturbed
    }
}

impl SearchStrategy for BayesianSearch {
    fn suggest(&mut self, _trial_id: usize, space: &SearchSpace, rng: &mut ChaCha8Rng) -> Params {
        let explore = self.observations.is_empty() || rng.gen::<f64>() < self.exploration_weight;
        match self.best() {
            Some(best) if !explore => self.exploit(best, space, rng),
            _ => space.sample(rng),
        }
    }

    fn report(&mut self, params: &Params, objective: f64) {
        self.observations.push((params.clone(), objective));
    }

    fn name(&self) -> &str {
        "bayesian"
    }
}
