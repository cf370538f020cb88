//! Repository trait definition (port)
//!
//! Defines the storage interface for exchange records. Implementations can
//! be PostgreSQL, in-memory, or mock for testing. Records are never
//! deleted by the engine; retention is an external data-governance
//! concern.

use crate::error::StoreError;
use async_trait::async_trait;
use cambio_domain::{ExchangeId, ExchangeRecord, ExchangeStatus};

/// Repository for exchange records, atomic per id.
#[async_trait]
pub trait ExchangeRepository: Send + Sync {
    /// Insert a freshly created record.
    ///
    /// Fails with `StoreError::Duplicate` on id reuse, or when the deposit
    /// address is already held by another open (non-terminal) record.
    async fn insert(&self, record: &ExchangeRecord) -> Result<(), StoreError>;

    /// Find a record by id.
    async fn find_by_id(&self, id: ExchangeId) -> Result<Option<ExchangeRecord>, StoreError>;

    /// Load a record by id, failing when it does not exist.
    async fn load(&self, id: ExchangeId) -> Result<ExchangeRecord, StoreError> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| StoreError::not_found("exchange", id.to_string()))
    }

    /// Replace a record, guarded on the status the writer read.
    ///
    /// The compare-and-swap that serializes writers per record: when the
    /// stored status no longer matches `expected`, the update is rejected
    /// with `StoreError::Conflict` and nothing is written.
    async fn update_guarded(
        &self,
        expected: ExchangeStatus,
        record: &ExchangeRecord,
    ) -> Result<(), StoreError>;

    /// All open (non-terminal) records, for monitor restoration at startup.
    async fn find_open(&self) -> Result<Vec<ExchangeRecord>, StoreError>;

    /// The open record currently holding a deposit address, if any.
    async fn find_open_by_deposit_address(
        &self,
        address: &str,
    ) -> Result<Option<ExchangeRecord>, StoreError>;
}
