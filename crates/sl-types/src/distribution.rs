//! Parameter distributions, sampled values, and intermediate reports.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::AlgorithmError;

/// Describes how a single parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Distribution {
    /// Continuous uniform range [low, high].
    Uniform { low: f64, high: f64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntUniform { low: i64, high: i64 },
    /// Categorical choices.
    Categorical { choices: Vec<serde_json::Value> },
}

impl Distribution {
    pub fn uniform(low: f64, high: f64) -> Self {
        Self::Uniform { low, high }
    }

    pub fn log_uniform(low: f64, high: f64) -> Self {
        Self::LogUniform { low, high }
    }

    pub fn int_uniform(low: i64, high: i64) -> Self {
        Self::IntUniform { low, high }
    }

    pub fn categorical(choices: Vec<serde_json::Value>) -> Self {
        Self::Categorical { choices }
    }

    /// Reject descriptors that cannot be sampled.
    pub fn validate(&self, name: &str) -> Result<(), AlgorithmError> {
        let invalid = |message: String| AlgorithmError::InvalidDistribution {
            name: name.to_string(),
            message,
        };

        match self {
            Self::Uniform { low, high } => {
                if !low.is_finite() || !high.is_finite() {
                    return Err(invalid(format!("bounds must be finite, got [{low}, {high}]")));
                }
                if low >= high {
                    return Err(invalid(format!("low {low} must be below high {high}")));
                }
            }
            Self::LogUniform { low, high } => {
                if !low.is_finite() || !high.is_finite() {
                    return Err(invalid(format!("bounds must be finite, got [{low}, {high}]")));
                }
                if *low <= 0.0 {
                    return Err(invalid(format!("log-uniform low must be positive, got {low}")));
                }
                if low >= high {
                    return Err(invalid(format!("low {low} must be below high {high}")));
                }
            }
            Self::IntUniform { low, high } => {
                if low > high {
                    return Err(invalid(format!("low {low} must not exceed high {high}")));
                }
            }
            Self::Categorical { choices } => {
                if choices.is_empty() {
                    return Err(invalid("categorical needs at least one choice".to_string()));
                }
            }
        }
        Ok(())
    }
}

/// A concrete parameter value produced by a search strategy.
///
/// `Int` is listed first so whole numbers read back from JSON stay integers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Json(v) => v.as_f64(),
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(serde_json::Value::String(s)) => f.write_str(s),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// Parameter assignment for one trial, ordered by name.
pub type Params = BTreeMap<String, ParameterValue>;

/// One intermediate metric value reported by a running trial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub step: u64,
    pub value: f64,
}

impl Report {
    pub fn new(step: u64, value: f64) -> Self {
        Self { step, value }
    }
}
