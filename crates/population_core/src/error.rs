use thiserror::Error;

use crate::model::StateId;

/// Failures of the arbitrary-precision kernel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NumericError {
    #[error("Division by zero.")]
    DivisionByZero,
    #[error("Natural logarithm is undefined for non-positive argument {0}.")]
    LogarithmDomain(String),
    #[error("Root of index {index} is undefined for argument {value}.")]
    RootDomain { value: String, index: u32 },
    #[error("Exponent {0} is too large to evaluate.")]
    ExponentOverflow(String),
    #[error("Cannot parse \"{0}\" as a decimal number.")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum CalculationError {
    #[error("Unknown transition type \"{0}\".")]
    UnknownTransitionType(String),
    #[error("Unknown transition mode \"{0}\".")]
    UnknownTransitionMode(String),
    #[error("Transition {transition} references unknown state {state}.")]
    UnknownState { transition: i64, state: StateId },
    #[error("State id {0} is used more than once.")]
    DuplicateState(StateId),
    #[error("Invalid task: {0}")]
    InvalidTask(String),
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
    #[error("Trend prediction is disabled for this analysis.")]
    NotInTrendMode,
    #[error("Worker failed: {0}")]
    Worker(String),
    #[error(transparent)]
    Numeric(#[from] NumericError),
}
