//! Cambio Connectors Layer
//!
//! Ports define the interfaces for the external collaborators the engine
//! observes and drives (chain observer, settlement venue, price source,
//! deposit address provisioning). Adapters implement these ports for
//! specific services; stubs implement them for tests and development.

#![warn(clippy::all)]

pub mod blockcypher;
pub mod error;
pub mod ports;
pub mod stub;

// Re-exports for convenience
pub use blockcypher::BlockCypherObserver;
pub use error::{ConnectorError, ConnectorResult};
pub use ports::{
    ChainObserver, DepositAddressProvider, DepositCheck, PriceSource, SettlementFailure,
    SettlementService,
};
pub use stub::{StubAddressProvider, StubChainObserver, StubPriceSource, StubSettlement};
