use thiserror::Error;

/// Crate-wide error type.
///
/// `Clone` because task handles are multi-consumer: every waiter on a failed
/// task receives its own copy of the failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RgError {
    #[error("shape error: {0}")]
    Shape(String),
    #[error("incompatible shapes: expected {expected:?}, found {found:?}")]
    IncompatibleShapes { expected: Vec<usize>, found: Vec<usize> },
    #[error("graph error: {0}")]
    GraphShape(String),
    #[error("invalid state: {0}")]
    State(String),
    #[error("invalid argument: {0}")]
    Argument(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("execution failed: {0}")]
    Execution(String),
}

pub type RgResult<T> = Result<T, RgError>;
