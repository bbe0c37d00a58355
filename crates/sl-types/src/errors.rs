use thiserror::Error;

use crate::stage::TrialStage;

/// Main error type for Sweepline
#[derive(Error, Debug)]
pub enum SlError {
    #[error("Algorithm error: {0}")]
    Algorithm(#[from] AlgorithmError),

    #[error("Sweep error: {0}")]
    Sweep(#[from] SweepError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Search algorithm contract violations.
///
/// These indicate a bug in the caller, never an expected runtime condition.
#[derive(Error, Debug)]
pub enum AlgorithmError {
    #[error("Invalid distribution for parameter {name}: {message}")]
    InvalidDistribution { name: String, message: String },

    #[error("Distributions must be registered before requesting parameters")]
    DistributionsNotRegistered,

    #[error("Distributions were already registered")]
    DistributionsAlreadyRegistered,

    #[error("Unknown trial: {trial_id}")]
    UnknownTrial { trial_id: usize },

    #[error("Trial {trial_id} already ended")]
    TrialAlreadyEnded { trial_id: usize },
}

/// Sweep lifecycle and admission errors
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("The sweep '{sweep_id}' doesn't exist.")]
    NotFound { sweep_id: String },

    #[error("The current Sweep '{sweep_id}' is running. It couldn't be updated.")]
    AlreadyRunning { sweep_id: String },

    #[error("The provided mount '{mount}' doesn't exist.")]
    MountNotFound { mount: String },

    #[error("Invalid sweep configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Unknown objective framework: {framework}")]
    UnknownFramework { framework: String },

    #[error("Trial {trial_id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        trial_id: usize,
        from: TrialStage,
        to: TrialStage,
    },
}

/// Config store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found: {key}")]
    NotFound { key: String },

    #[error("Corrupt record {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("Store backend failure: {message}")]
    Backend { message: String },
}

/// Result type alias for Sweepline operations
pub type SlResult<T> = Result<T, SlError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::SlError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::SlError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::SlError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_messages() {
        let error = SweepError::MountNotFound {
            mount: "a/".to_string(),
        };
        assert_eq!(error.to_string(), "The provided mount 'a/' doesn't exist.");

        let error = SweepError::AlreadyRunning {
            sweep_id: "a".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "The current Sweep 'a' is running. It couldn't be updated."
        );
    }

    #[test]
    fn test_error_conversion() {
        let algorithm_error = AlgorithmError::UnknownTrial { trial_id: 4 };
        let sl_error: SlError = algorithm_error.into();

        match sl_error {
            SlError::Algorithm(AlgorithmError::UnknownTrial { trial_id }) => {
                assert_eq!(trial_id, 4)
            }
            _ => panic!("Expected Algorithm error"),
        }
    }

    #[test]
    fn test_transition_error_names_stages() {
        let error = SweepError::InvalidTransition {
            trial_id: 2,
            from: TrialStage::Succeeded,
            to: TrialStage::Running,
        };
        let message = error.to_string();
        assert!(message.contains("Succeeded"));
        assert!(message.contains("Running"));
    }

    #[test]
    fn test_macros() {
        let _validation_err = validation_error!("Invalid value: {}", 42);
        let _internal_err = internal_error!("Something went wrong");
        let config_err = config_error!("Missing required field: {}", "script_path");
        assert!(config_err.to_string().contains("script_path"));
    }
}
