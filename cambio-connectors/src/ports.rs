//! Port definitions for external collaborators.
//!
//! Implementations:
//! - `Stub*` in this crate - scripted fakes for tests and development
//! - `BlockCypherObserver` - HTTP address-activity adapter for UTXO chains

use async_trait::async_trait;
use rust_decimal::Decimal;

use cambio_domain::{Currency, CurrencyCode, ExchangeRecord};

use crate::error::ConnectorResult;

// =============================================================================
// Chain Observer Port
// =============================================================================

/// Result of an address-activity query against the chain observer.
#[derive(Debug, Clone, PartialEq)]
pub struct DepositCheck {
    /// Whether the address has received funds
    pub detected: bool,
    /// Transaction hash of the deposit, when detected
    pub tx_hash: Option<String>,
    /// Observed deposit amount, when detected
    pub amount: Option<Decimal>,
    /// Confirmation depth reported alongside the detection, if any
    pub confirmations: Option<u32>,
}

impl DepositCheck {
    /// No activity on the address.
    pub fn none() -> Self {
        Self {
            detected: false,
            tx_hash: None,
            amount: None,
            confirmations: None,
        }
    }

    /// A detected deposit.
    pub fn detected(tx_hash: &str, amount: Decimal, confirmations: u32) -> Self {
        Self {
            detected: true,
            tx_hash: Some(tx_hash.to_string()),
            amount: Some(amount),
            confirmations: Some(confirmations),
        }
    }
}

/// Port for querying a blockchain through an external observer service.
///
/// Every call is a single bounded query; rate limiting and scheduling are
/// the caller's concern (the deposit monitor's poll gate).
#[async_trait]
pub trait ChainObserver: Send + Sync {
    /// Has this address received funds?
    async fn check_deposit(
        &self,
        address: &str,
        currency: &CurrencyCode,
    ) -> ConnectorResult<DepositCheck>;

    /// Current confirmation depth of a transaction.
    async fn get_confirmations(
        &self,
        tx_hash: &str,
        currency: &CurrencyCode,
    ) -> ConnectorResult<u32>;
}

// =============================================================================
// Settlement Port
// =============================================================================

/// Terminal settlement failure; the record moves to `failed` with the
/// reason retained for manual review.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Settlement failed: {reason}")]
pub struct SettlementFailure {
    /// Why the conversion could not be completed
    pub reason: String,
}

impl SettlementFailure {
    /// Build a failure with a reason.
    pub fn new(reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

/// Port for the external conversion/payout step.
///
/// A bounded-duration task: convert the received funds and release them to
/// the receiving address. Success completes the exchange; failure is
/// terminal.
#[async_trait]
pub trait SettlementService: Send + Sync {
    /// Convert and release funds for a finalized deposit.
    async fn convert(&self, record: &ExchangeRecord) -> Result<(), SettlementFailure>;
}

// =============================================================================
// Price Source Port
// =============================================================================

/// Port for live market rates.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Market rate for the pair.
    ///
    /// Implementations try the inverse pair before giving up; when neither
    /// is known they fail with `ConnectorError::UnsupportedPair`.
    async fn get_rate(&self, from: &CurrencyCode, to: &CurrencyCode) -> ConnectorResult<Decimal>;
}

// =============================================================================
// Deposit Address Port
// =============================================================================

/// Port for provisioning one-time deposit addresses.
///
/// Callers enforce that an allocated address is not concurrently in use by
/// another open record before assigning it.
#[async_trait]
pub trait DepositAddressProvider: Send + Sync {
    /// Allocate a fresh deposit address for a currency.
    async fn allocate(&self, currency: &Currency) -> ConnectorResult<String>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_deposit_check_constructors() {
        let none = DepositCheck::none();
        assert!(!none.detected);
        assert!(none.tx_hash.is_none());

        let hit = DepositCheck::detected("h1", dec!(0.1), 3);
        assert!(hit.detected);
        assert_eq!(hit.tx_hash.as_deref(), Some("h1"));
        assert_eq!(hit.amount, Some(dec!(0.1)));
        assert_eq!(hit.confirmations, Some(3));
    }

    #[test]
    fn test_settlement_failure_display() {
        let failure = SettlementFailure::new("venue rejected order");
        assert_eq!(failure.to_string(), "Settlement failed: venue rejected order");
    }
}
