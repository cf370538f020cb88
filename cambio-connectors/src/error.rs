//! Connector layer error types.

use thiserror::Error;

/// Errors from external collaborators.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// No market rate obtainable for the pair (direct or inverse)
    #[error("Unsupported pair: {from} -> {to}")]
    UnsupportedPair {
        /// Source asset
        from: String,
        /// Destination asset
        to: String,
    },

    /// Adapter has no backend for this currency
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    /// Network/timeout talking to the service; safe to retry on the next
    /// scheduled tick
    #[error("Transient observer error: {0}")]
    Transient(String),

    /// The service answered with something we could not interpret
    #[error("Invalid response from {service}: {detail}")]
    InvalidResponse {
        /// Service name
        service: String,
        /// What was wrong
        detail: String,
    },
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;
