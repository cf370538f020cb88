//! Cambio Storage Layer
//!
//! Durable keyed storage for exchange records.
//!
//! # Architecture
//!
//! - **Repository trait**: the storage interface (port)
//! - **In-memory store**: fast implementation for tests and development
//! - **PostgreSQL store**: production implementation (feature `postgres`)
//!
//! The status-guarded `update_guarded` is the per-record serialization
//! point: concurrent writers racing to advance the same record cannot both
//! succeed. The loser observes `StoreError::Conflict`, re-reads, and
//! no-ops.

#![warn(clippy::all)]

// Modules
mod error;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod repository;

// Re-exports
pub use error::StoreError;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::{init_schema, PgExchangeStore};
pub use repository::ExchangeRepository;
