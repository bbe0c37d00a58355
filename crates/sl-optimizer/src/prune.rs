//! Early-stopping policies.

use std::collections::BTreeMap;

use sl_types::{Direction, Report};

/// Decides whether a running trial should be stopped early.
pub trait Pruner: Send {
    fn should_prune(&mut self, trial_id: usize, reports: &[Report], direction: Direction) -> bool;

    fn name(&self) -> &str;
}

/// Never prunes.
#[derive(Debug, Clone, Default)]
pub struct NopPruner;

impl Pruner for NopPruner {
    fn should_prune(&mut self, _trial_id: usize, _reports: &[Report], _direction: Direction) -> bool {
        false
    }

    fn name(&self) -> &str {
        "nop"
    }
}

/// Median stopping rule.
///
/// Every call records the trial's reports. A trial is pruned when its latest
/// value is worse than the median of the other trials' values at the same
/// step, once at least `min_trials` of them reached that step and the step is
/// past `warmup_steps`.
#[derive(Debug, Clone)]
pub struct MedianPruner {
    warmup_steps: u64,
    min_trials: usize,
    history: BTreeMap<usize, BTreeMap<u64, f64>>,
}

impl MedianPruner {
    pub fn new(warmup_steps: u64, min_trials: usize) -> Self {
        Self {
            warmup_steps,
            min_trials: min_trials.max(1),
            history: BTreeMap::new(),
        }
    }

    fn median(values: &mut [f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.total_cmp(b));
        let mid = values.len() / 2;
        if values.len() % 2 == 0 {
            Some((values[mid - 1] + values[mid]) / 2.0)
        } else {
            Some(values[mid])
        }
    }
}

impl Pruner for MedianPruner {
    fn should_prune(&mut self, trial_id: usize, reports: &[Report], direction: Direction) -> bool {
        let steps = self.history.entry(trial_id).or_default();
        for report in reports {
            steps.insert(report.step, report.value);
        }

        let Some(latest) = reports.iter().max_by_key(|r| r.step) else {
            return false;
        };
        if latest.step < self.warmup_steps || latest.value.is_nan() {
            return false;
        }

        let mut peers: Vec<f64> = self
            .history
            .iter()
            .filter(|(id, _)| **id != trial_id)
            .filter_map(|(_, steps)| steps.get(&latest.step).copied())
            .filter(|v| !v.is_nan())
            .collect();
        if peers.len() < self.min_trials {
            return false;
        }

        match Self::median(&mut peers) {
            Some(median) => direction.is_better(median, latest.value),
            None => false,
        }
    }

    fn name(&self) -> &str {
        "median"
    }
}
