//! Cycle-level error types.

use thiserror::Error;

use crate::cycle::CycleState;

/// Cycle-level errors
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Illegal cycle state: expected {expected}, was {actual}")]
    IllegalState {
        expected: CycleState,
        actual: CycleState,
    },
    #[error("Cycle {0} has already been released")]
    AlreadyReleased(String),
    #[error("State of previous cycle must be EXECUTED, was {0}")]
    InvalidPreviousCycle(CycleState),
    #[error("No computation cache for calculation configuration '{0}'")]
    UnknownCalcConfig(String),
    #[error("Execution interrupted before completion")]
    Interrupted,
    #[error("Unable to execute dependency graph for '{calc_config}': {reason}")]
    DispatchFailed { calc_config: String, reason: String },
    #[error("Writing cache dump failed: {0}")]
    CacheDump(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for CycleError {
    fn from(e: std::io::Error) -> Self {
        CycleError::CacheDump(e.to_string())
    }
}
