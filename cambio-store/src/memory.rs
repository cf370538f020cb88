//! In-memory store implementation
//!
//! Used for testing and development without a database.
//! Thread-safe using RwLock for concurrent access.

use crate::error::StoreError;
use crate::repository::ExchangeRepository;
use async_trait::async_trait;
use cambio_domain::{ExchangeId, ExchangeRecord, ExchangeStatus};
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory exchange store for testing
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<ExchangeId, ExchangeRecord>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of records
    pub fn record_count(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Clear all data (useful for test setup)
    pub fn clear(&self) {
        self.records.write().unwrap().clear();
    }
}

#[async_trait]
impl ExchangeRepository for MemoryStore {
    async fn insert(&self, record: &ExchangeRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap();

        if records.contains_key(&record.id) {
            return Err(StoreError::duplicate("exchange", record.id.to_string()));
        }

        // A deposit address may not be concurrently held by two open records
        let address_taken = records
            .values()
            .any(|r| r.is_open() && r.deposit_address == record.deposit_address);
        if address_taken {
            return Err(StoreError::duplicate(
                "deposit_address",
                record.deposit_address.clone(),
            ));
        }

        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: ExchangeId) -> Result<Option<ExchangeRecord>, StoreError> {
        let records = self.records.read().unwrap();
        Ok(records.get(&id).cloned())
    }

    async fn update_guarded(
        &self,
        expected: ExchangeStatus,
        record: &ExchangeRecord,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap();

        let current = records
            .get(&record.id)
            .ok_or_else(|| StoreError::not_found("exchange", record.id.to_string()))?;

        if current.status != expected {
            return Err(StoreError::Conflict {
                id: record.id.to_string(),
                expected,
                actual: current.status,
            });
        }

        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn find_open(&self) -> Result<Vec<ExchangeRecord>, StoreError> {
        let records = self.records.read().unwrap();
        Ok(records.values().filter(|r| r.is_open()).cloned().collect())
    }

    async fn find_open_by_deposit_address(
        &self,
        address: &str,
    ) -> Result<Option<ExchangeRecord>, StoreError> {
        let records = self.records.read().unwrap();
        Ok(records
            .values()
            .find(|r| r.is_open() && r.deposit_address == address)
            .cloned())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use cambio_domain::{Amount, CurrencyCode, ExchangeQuote, RateType};
    use rust_decimal_macros::dec;

    fn test_record(deposit_address: &str) -> ExchangeRecord {
        let quote = ExchangeQuote::new(
            CurrencyCode::new("BTC").unwrap(),
            CurrencyCode::new("XMR").unwrap(),
            RateType::Floating,
            dec!(100),
            dec!(99),
            dec!(1),
        )
        .unwrap();

        ExchangeRecord::new(
            &quote,
            Amount::new(dec!(0.1)).unwrap(),
            Amount::new(dec!(9.9)).unwrap(),
            deposit_address.to_string(),
            "receiving-addr".to_string(),
            None,
            None,
            2,
        )
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = MemoryStore::new();
        let record = test_record("dep-1");
        let id = record.id;

        store.insert(&record).await.unwrap();

        let found = store.find_by_id(id).await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().id, id);
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_id() {
        let store = MemoryStore::new();
        let record = test_record("dep-1");

        store.insert(&record).await.unwrap();
        let mut other = test_record("dep-2");
        other.id = record.id;

        assert!(store.insert(&other).await.is_err());
    }

    #[tokio::test]
    async fn test_open_deposit_address_not_reused() {
        let store = MemoryStore::new();
        store.insert(&test_record("dep-1")).await.unwrap();

        let result = store.insert(&test_record("dep-1")).await;
        assert!(matches!(result, Err(StoreError::Duplicate { .. })));
    }

    #[tokio::test]
    async fn test_deposit_address_reusable_after_terminal() {
        let store = MemoryStore::new();
        let mut record = test_record("dep-1");
        record.fail("abandoned").unwrap();
        store.insert(&record).await.unwrap();

        // The first holder is terminal, so the address is free again
        store.insert(&test_record("dep-1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_guarded_applies_when_status_matches() {
        let store = MemoryStore::new();
        let mut record = test_record("dep-1");
        store.insert(&record).await.unwrap();

        record.register_deposit("h1", dec!(0.1)).unwrap();
        store
            .update_guarded(ExchangeStatus::Waiting, &record)
            .await
            .unwrap();

        let stored = store.load(record.id).await.unwrap();
        assert_eq!(stored.status, ExchangeStatus::Received);
    }

    #[tokio::test]
    async fn test_update_guarded_loser_gets_conflict() {
        let store = MemoryStore::new();
        let record = test_record("dep-1");
        store.insert(&record).await.unwrap();

        // Writer A advances the record
        let mut winner = record.clone();
        winner.register_deposit("h1", dec!(0.1)).unwrap();
        store
            .update_guarded(ExchangeStatus::Waiting, &winner)
            .await
            .unwrap();

        // Writer B raced from the same snapshot and must lose
        let mut loser = record.clone();
        loser.register_deposit("h2", dec!(0.2)).unwrap();
        let result = store.update_guarded(ExchangeStatus::Waiting, &loser).await;

        assert!(matches!(result, Err(StoreError::Conflict { .. })));

        // The winner's write is intact
        let stored = store.load(record.id).await.unwrap();
        assert_eq!(stored.deposit_tx_hash.as_deref(), Some("h1"));
    }

    #[tokio::test]
    async fn test_update_guarded_missing_record() {
        let store = MemoryStore::new();
        let record = test_record("dep-1");

        let result = store.update_guarded(ExchangeStatus::Waiting, &record).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_find_open_excludes_terminal() {
        let store = MemoryStore::new();
        store.insert(&test_record("dep-1")).await.unwrap();

        let mut done = test_record("dep-2");
        done.fail("gone").unwrap();
        store.insert(&done).await.unwrap();

        let open = store.find_open().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].deposit_address, "dep-1");
    }

    #[tokio::test]
    async fn test_find_open_by_deposit_address() {
        let store = MemoryStore::new();
        let record = test_record("dep-1");
        store.insert(&record).await.unwrap();

        let found = store.find_open_by_deposit_address("dep-1").await.unwrap();
        assert_eq!(found.unwrap().id, record.id);

        let missing = store.find_open_by_deposit_address("dep-9").await.unwrap();
        assert!(missing.is_none());
    }
}
