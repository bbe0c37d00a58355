//! Ask/tell bookkeeping shared by every search algorithm.

use std::collections::BTreeMap;

use sl_types::{AlgorithmError, Params, TrialRecord, TrialStage};

/// Where a trial is in the algorithm's own ask/tell protocol.
#[derive(Debug, Clone, PartialEq)]
enum LedgerEntry {
    /// `trial_start` seen; parameters are cached once sampled.
    Active(Option<Params>),
    /// `trial_end` seen.
    Ended(Params),
}

/// A completed (params, objective) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub trial_id: usize,
    pub params: Params,
    pub objective: f64,
}

/// Tracks which trials the algorithm knows about and what it handed out.
#[derive(Debug, Clone, Default)]
pub struct TrialLedger {
    entries: BTreeMap<usize, LedgerEntry>,
    observations: Vec<Observation>,
}

impl TrialLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent; an ended trial stays ended.
    pub fn start(&mut self, trial_id: usize) {
        self.entries
            .entry(trial_id)
            .or_insert(LedgerEntry::Active(None));
    }

    /// Parameters already handed out for `trial_id`, if any.
    pub fn cached(&self, trial_id: usize) -> Result<Option<&Params>, AlgorithmError> {
        match self.entries.get(&trial_id) {
            None => Err(AlgorithmError::UnknownTrial { trial_id }),
            Some(LedgerEntry::Active(params)) => Ok(params.as_ref()),
            Some(LedgerEntry::Ended(params)) => Ok(Some(params)),
        }
    }

    pub fn cache(&mut self, trial_id: usize, params: Params) -> Result<(), AlgorithmError> {
        match self.entries.get_mut(&trial_id) {
            Some(LedgerEntry::Active(slot)) => {
                *slot = Some(params);
                Ok(())
            }
            Some(LedgerEntry::Ended(_)) => Err(AlgorithmError::TrialAlreadyEnded { trial_id }),
            None => Err(AlgorithmError::UnknownTrial { trial_id }),
        }
    }

    /// Close a trial with its final score and return the observation.
    pub fn end(&mut self, trial_id: usize, score: f64) -> Result<&Observation, AlgorithmError> {
        let params = match self.entries.get(&trial_id) {
            Some(LedgerEntry::Active(Some(params))) => params.clone(),
            Some(LedgerEntry::Active(None)) | None => {
                return Err(AlgorithmError::UnknownTrial { trial_id })
            }
            Some(LedgerEntry::Ended(_)) => {
                return Err(AlgorithmError::TrialAlreadyEnded { trial_id })
            }
        };
        Ok(self.record(trial_id, params, score))
    }

    /// Replay succeeded trials from persisted history. Returns what was added.
    pub fn replay(&mut self, history: &[TrialRecord]) -> Vec<Observation> {
        let mut added = Vec::new();
        for trial in history {
            if trial.stage != TrialStage::Succeeded || !trial.has_params() {
                continue;
            }
            let Some(score) = trial.best_model_score else {
                continue;
            };
            if matches!(self.entries.get(&trial.trial_id), Some(LedgerEntry::Ended(_))) {
                continue;
            }
            added.push(self.record(trial.trial_id, trial.params.clone(), score).clone());
        }
        added
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    fn record(&mut self, trial_id: usize, params: Params, score: f64) -> &Observation {
        self.entries.insert(trial_id, LedgerEntry::Ended(params.clone()));
        self.observations.push(Observation {
            trial_id,
            params,
            objective: score,
        });
        &self.observations[self.observations.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sl_types::ParameterValue;

    fn params(x: f64) -> Params {
        let mut p = Params::new();
        p.insert("x".into(), ParameterValue::Float(x));
        p
    }

    #[test]
    fn unknown_trials_are_rejected() {
        let mut ledger = TrialLedger::new();
        assert!(matches!(
            ledger.cached(3),
            Err(AlgorithmError::UnknownTrial { trial_id: 3 })
        ));
        assert!(ledger.end(3, 1.0).is_err());
    }

    #[test]
    fn trial_ends_exactly_once() {
        let mut ledger = TrialLedger::new();
        ledger.start(0);
        assert_eq!(ledger.cached(0).unwrap(), None);
        // No params yet: nothing to end.
        assert!(ledger.end(0, 1.0).is_err());

        ledger.cache(0, params(1.0)).unwrap();
        assert_eq!(ledger.end(0, 2.5).unwrap().objective, 2.5);
        assert!(matches!(
            ledger.end(0, 2.5),
            Err(AlgorithmError::TrialAlreadyEnded { trial_id: 0 })
        ));

        // Still readable after the end, and restarting doesn't reopen it.
        ledger.start(0);
        assert_eq!(ledger.cached(0).unwrap(), Some(&params(1.0)));
        assert_eq!(ledger.observations().len(), 1);
    }

    #[test]
    fn replay_keeps_only_succeeded_trials() {
        let mut done = TrialRecord::new(0);
        done.params = params(3.0);
        done.mark_running(Utc::now()).unwrap();
        done.mark_succeeded(7.0, None, None, Utc::now()).unwrap();

        let mut failed = TrialRecord::new(1);
        failed.params = params(1.0);
        failed.mark_running(Utc::now()).unwrap();
        failed.mark_failed("boom".into(), Utc::now()).unwrap();

        let mut ledger = TrialLedger::new();
        let added = ledger.replay(&[done.clone(), failed, TrialRecord::new(2)]);
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].objective, 7.0);

        // Replaying the same record again is a no-op.
        assert!(ledger.replay(&[done]).is_empty());
        assert_eq!(ledger.observations().len(), 1);
    }
}
