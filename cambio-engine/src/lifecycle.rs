//! Lifecycle decisions: observed fact in, updated record plus events out.
//!
//! Each method takes the current record and one fact observed by a monitor
//! (a deposit, a confirmation count, a settlement outcome), applies the
//! guarded domain transition, and returns a `Decision`. Nothing here does
//! I/O; the caller persists the updated record through a status-guarded
//! save and publishes the events, which keeps every transition a single
//! atomic update per record.

use rust_decimal::Decimal;

use cambio_domain::{Currency, ExchangeRecord, ExchangeStatus};

use crate::error::EngineResult;

// =============================================================================
// Events
// =============================================================================

/// Facts a decision asks the daemon to publish.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub enum LifecycleEvent {
    /// The record's observable state changed.
    StatusChanged {
        /// New status
        status: ExchangeStatus,
        /// Deposit hash, once known
        tx_hash: Option<String>,
        /// Confirmation count, meaningful from `received` onward
        confirmations: Option<u32>,
        /// Finality threshold for the record
        required_confirmations: Option<u32>,
    },
    /// Observed deposit diverges materially from the requested amount.
    /// Informational; the lifecycle proceeds on the actual amount.
    AmountMismatch {
        /// Requested from-amount
        expected: Decimal,
        /// Observed deposit amount
        actual: Decimal,
    },
}

/// Outcome of applying one observed fact.
#[derive(Debug, Clone)]
pub struct Decision {
    /// The record with the transition applied
    pub record: ExchangeRecord,
    /// Events to publish after the record is persisted
    pub events: Vec<LifecycleEvent>,
}

fn status_changed(record: &ExchangeRecord) -> LifecycleEvent {
    let counts_meaningful = record.status != ExchangeStatus::Waiting;
    LifecycleEvent::StatusChanged {
        status: record.status,
        tx_hash: record.deposit_tx_hash.clone(),
        confirmations: counts_meaningful.then_some(record.confirmations),
        required_confirmations: counts_meaningful.then_some(record.required_confirmations),
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

/// The exchange state machine's decision layer.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle;

impl Lifecycle {
    /// Create a lifecycle decision layer.
    pub fn new() -> Self {
        Self
    }

    /// A deposit was observed on the record's address: `waiting → received`.
    ///
    /// Emits the status change and, when the observed amount diverges from
    /// the requested amount beyond the currency tolerance, a non-blocking
    /// mismatch notice.
    pub fn on_deposit(
        &self,
        record: &ExchangeRecord,
        currency: &Currency,
        tx_hash: &str,
        amount: Decimal,
    ) -> EngineResult<Decision> {
        let mut updated = record.clone();
        updated.register_deposit(tx_hash, amount)?;

        let mut events = vec![status_changed(&updated)];
        if currency.amount_mismatch(record.from_amount.as_decimal(), amount) {
            events.push(LifecycleEvent::AmountMismatch {
                expected: record.from_amount.as_decimal(),
                actual: amount,
            });
        }

        Ok(Decision { record: updated, events })
    }

    /// A confirmation count was observed for the deposit transaction.
    ///
    /// The recorded count is monotone (regressions clamp to the previous
    /// value). Crossing the finality threshold additionally applies
    /// `received → exchanging`; the returned events then contain both
    /// status changes, in order. A tick that changes nothing returns an
    /// empty event list and an unchanged record.
    pub fn on_confirmations(
        &self,
        record: &ExchangeRecord,
        currency: &Currency,
        observed: u32,
    ) -> EngineResult<Decision> {
        let mut updated = record.clone();
        let before = updated.confirmations;
        let recorded = updated.record_confirmations(observed, currency.confirmation_ceiling)?;

        let mut events = Vec::new();
        if recorded != before {
            events.push(status_changed(&updated));
        }

        if updated.confirmations_met() {
            updated.begin_exchanging()?;
            events.push(status_changed(&updated));
        }

        Ok(Decision { record: updated, events })
    }

    /// The settlement step succeeded: `exchanging → completed`.
    pub fn on_settlement_success(&self, record: &ExchangeRecord) -> EngineResult<Decision> {
        let mut updated = record.clone();
        updated.complete()?;

        Ok(Decision {
            events: vec![status_changed(&updated)],
            record: updated,
        })
    }

    /// The settlement step failed: terminal `failed`, reason retained.
    pub fn on_settlement_failure(
        &self,
        record: &ExchangeRecord,
        reason: &str,
    ) -> EngineResult<Decision> {
        let mut updated = record.clone();
        updated.fail(reason)?;

        Ok(Decision {
            events: vec![status_changed(&updated)],
            record: updated,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
