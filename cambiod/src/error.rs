//! Daemon error types.

use thiserror::Error;

/// Errors at the daemon boundary.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Domain rule violation (validation, invalid transition)
    #[error("Domain error: {0}")]
    Domain(#[from] cambio_domain::DomainError),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] cambio_engine::EngineError),

    /// External collaborator error
    #[error("Connector error: {0}")]
    Connector(#[from] cambio_connectors::ConnectorError),

    /// Storage error
    #[error("Store error: {0}")]
    Store(#[from] cambio_store::StoreError),

    /// Could not provision an unused deposit address
    #[error("Address allocation failed: {0}")]
    AddressAllocation(String),
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
