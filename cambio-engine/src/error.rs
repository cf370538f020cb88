//! Engine layer error types.

use thiserror::Error;

/// Errors that can occur in the decision layer.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Domain rule violation (invalid transition, bad value)
    #[error("Domain error: {0}")]
    Domain(#[from] cambio_domain::DomainError),

    /// Commission configuration out of range
    #[error("Invalid commission: {0}")]
    InvalidCommission(String),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
