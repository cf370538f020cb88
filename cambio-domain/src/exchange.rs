//! The exchange record: the central entity of the swap lifecycle.
//!
//! Status moves forward-only along waiting → received → exchanging →
//! completed, with failed reachable from any non-terminal state. Every
//! transition method is a single atomic update of `status` plus its
//! associated fields, guarded so readers never observe a half-applied
//! state (e.g., `received` without a deposit hash).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::quote::ExchangeQuote;
use crate::value_objects::{Amount, CurrencyCode, DomainError, RateType};

/// Unique identifier for an exchange record
pub type ExchangeId = Uuid;

/// Decimal places the from-amount is normalized to at creation.
pub const FROM_AMOUNT_PRECISION: u32 = 8;

// =============================================================================
// ExchangeStatus
// =============================================================================

/// Lifecycle states of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeStatus {
    /// Deposit address issued, waiting for the sender's payment
    Waiting,
    /// Deposit observed on-chain, accumulating confirmations
    Received,
    /// Finality reached, conversion in progress
    Exchanging,
    /// Funds released (terminal)
    Completed,
    /// Irrecoverable error, reason recorded (terminal)
    Failed,
}

impl ExchangeStatus {
    /// State name for display and persistence.
    pub fn name(&self) -> &'static str {
        match self {
            ExchangeStatus::Waiting => "waiting",
            ExchangeStatus::Received => "received",
            ExchangeStatus::Exchanging => "exchanging",
            ExchangeStatus::Completed => "completed",
            ExchangeStatus::Failed => "failed",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExchangeStatus::Completed | ExchangeStatus::Failed)
    }
}

impl fmt::Display for ExchangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ExchangeStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(ExchangeStatus::Waiting),
            "received" => Ok(ExchangeStatus::Received),
            "exchanging" => Ok(ExchangeStatus::Exchanging),
            "completed" => Ok(ExchangeStatus::Completed),
            "failed" => Ok(ExchangeStatus::Failed),
            other => Err(DomainError::InvalidStateTransition(format!(
                "Unknown status: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// ExchangeRecord
// =============================================================================

/// One user-initiated swap, from creation to settlement.
///
/// Created by the exchange-creation use case in `waiting`; mutated
/// exclusively through the guarded transition methods below; never deleted
/// by the engine (retention is a data-governance concern).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRecord {
    /// Opaque unique identifier
    pub id: ExchangeId,
    /// Asset the sender deposits
    pub from_currency: CurrencyCode,
    /// Asset the receiver is paid in
    pub to_currency: CurrencyCode,
    /// Requested deposit amount, normalized to 8 decimal places
    pub from_amount: Amount,
    /// Quoted output amount at destination precision
    pub to_amount: Amount,
    /// Amount actually observed on-chain; may diverge from `from_amount`
    pub actual_received_amount: Option<Decimal>,
    /// Floating or fixed quoting mode
    pub rate_type: RateType,
    /// Effective rate, locked at creation for fixed-rate records
    pub rate: Decimal,
    /// Commission percentage embedded in the rate
    pub fee_percent: Decimal,
    /// One-time deposit address, assigned exactly once at creation
    pub deposit_address: String,
    /// User-supplied payout address, validated against `to_currency`
    pub receiving_address: String,
    /// Optional refund address, validated against `from_currency`
    pub refund_address: Option<String>,
    /// Optional notification email
    pub email: Option<String>,
    /// Current lifecycle state
    pub status: ExchangeStatus,
    /// First-seen deposit transaction hash; set at most once
    pub deposit_tx_hash: Option<String>,
    /// Monotonically non-decreasing confirmation count
    pub confirmations: u32,
    /// Finality threshold, fixed from the currency at creation
    pub required_confirmations: u32,
    /// Reason recorded when the record moves to `failed`
    pub failure_reason: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl ExchangeRecord {
    /// Create a new record in `waiting`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        quote: &ExchangeQuote,
        from_amount: Amount,
        to_amount: Amount,
        deposit_address: String,
        receiving_address: String,
        refund_address: Option<String>,
        email: Option<String>,
        required_confirmations: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            from_currency: quote.from_currency.clone(),
            to_currency: quote.to_currency.clone(),
            from_amount: from_amount.round_dp(FROM_AMOUNT_PRECISION),
            to_amount,
            actual_received_amount: None,
            rate_type: quote.rate_type,
            rate: quote.rate,
            fee_percent: quote.fee_percent,
            deposit_address,
            receiving_address,
            refund_address,
            email,
            status: ExchangeStatus::Waiting,
            deposit_tx_hash: None,
            confirmations: 0,
            required_confirmations,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this record has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether this record still occupies its deposit address.
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    /// Record the first observed deposit: `waiting → received`.
    ///
    /// The first-seen hash wins and is immutable afterwards; confirmations
    /// start at zero and are tracked from here by the confirmation poller.
    ///
    /// # Errors
    /// `DomainError::InvalidStateTransition` if the record is not in
    /// `waiting` or a hash was already recorded.
    pub fn register_deposit(&mut self, tx_hash: &str, amount: Decimal) -> Result<(), DomainError> {
        if self.status != ExchangeStatus::Waiting {
            return Err(DomainError::InvalidStateTransition(format!(
                "Cannot register deposit in status {}",
                self.status
            )));
        }

        if self.deposit_tx_hash.is_some() {
            return Err(DomainError::InvalidStateTransition(
                "Deposit hash already recorded".to_string(),
            ));
        }

        self.deposit_tx_hash = Some(tx_hash.to_string());
        self.actual_received_amount = Some(amount);
        self.confirmations = 0;
        self.status = ExchangeStatus::Received;
        self.updated_at = Utc::now();

        Ok(())
    }

    /// Record an observed confirmation count: monotone, clamped to `ceiling`.
    ///
    /// An observer reporting a lower count than previously recorded keeps
    /// the recorded value; the count never regresses.
    ///
    /// # Errors
    /// `DomainError::InvalidStateTransition` if the record is not in
    /// `received`.
    pub fn record_confirmations(&mut self, observed: u32, ceiling: u32) -> Result<u32, DomainError> {
        if self.status != ExchangeStatus::Received {
            return Err(DomainError::InvalidStateTransition(format!(
                "Cannot record confirmations in status {}",
                self.status
            )));
        }

        let clamped = observed.min(ceiling);
        if clamped > self.confirmations {
            self.confirmations = clamped;
            self.updated_at = Utc::now();
        }

        Ok(self.confirmations)
    }

    /// Whether the finality threshold has been reached.
    pub fn confirmations_met(&self) -> bool {
        self.confirmations >= self.required_confirmations
    }

    /// Finality reached: `received → exchanging`.
    ///
    /// # Errors
    /// `DomainError::InvalidStateTransition` unless the record is in
    /// `received` with the threshold met; skipping `received` from
    /// `waiting` is rejected, not silently jumped.
    pub fn begin_exchanging(&mut self) -> Result<(), DomainError> {
        if self.status != ExchangeStatus::Received {
            return Err(DomainError::InvalidStateTransition(format!(
                "Cannot begin exchanging from status {}",
                self.status
            )));
        }

        if !self.confirmations_met() {
            return Err(DomainError::InvalidStateTransition(format!(
                "Threshold not met: {}/{} confirmations",
                self.confirmations, self.required_confirmations
            )));
        }

        self.status = ExchangeStatus::Exchanging;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Settlement succeeded: `exchanging → completed`.
    ///
    /// # Errors
    /// `DomainError::InvalidStateTransition` if the record is not in
    /// `exchanging`.
    pub fn complete(&mut self) -> Result<(), DomainError> {
        if self.status != ExchangeStatus::Exchanging {
            return Err(DomainError::InvalidStateTransition(format!(
                "Cannot complete from status {}",
                self.status
            )));
        }

        self.status = ExchangeStatus::Completed;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Irrecoverable error: any non-terminal state → `failed`.
    ///
    /// # Errors
    /// `DomainError::InvalidStateTransition` if the record is already
    /// terminal.
    pub fn fail(&mut self, reason: &str) -> Result<(), DomainError> {
        if self.is_terminal() {
            return Err(DomainError::InvalidStateTransition(format!(
                "Cannot fail from terminal status {}",
                self.status
            )));
        }

        self.status = ExchangeStatus::Failed;
        self.failure_reason = Some(reason.to_string());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// The amount downstream settlement math operates on.
    ///
    /// The observed deposit when one exists, otherwise the requested
    /// amount. Divergence is surfaced through the mismatch notice, never
    /// silently substituted elsewhere.
    pub fn settlement_amount(&self) -> Decimal {
        self.actual_received_amount
            .unwrap_or_else(|| self.from_amount.as_decimal())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_quote() -> ExchangeQuote {
        ExchangeQuote::new(
            CurrencyCode::new("BTC").unwrap(),
            CurrencyCode::new("XMR").unwrap(),
            RateType::Floating,
            dec!(112.78421),
            dec!(111.6563679),
            dec!(1),
        )
        .unwrap()
    }

    fn test_record() -> ExchangeRecord {
        let quote = test_quote();
        ExchangeRecord::new(
            &quote,
            Amount::new(dec!(0.1)).unwrap(),
            Amount::new(dec!(11.16563679)).unwrap(),
            "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa".to_string(),
            "44AFFq5kSiGBoZ4NMDwYtN18obc8AemS33DBLWs3H7otXft3XjrpDtQGv7SqSsaBYBb98uNbr2VBBEt7f2wfn3RVGQBEP3A".to_string(),
            None,
            None,
            2,
        )
    }

    #[test]
    fn test_new_record_starts_waiting() {
        let record = test_record();

        assert_eq!(record.status, ExchangeStatus::Waiting);
        assert_eq!(record.confirmations, 0);
        assert_eq!(record.required_confirmations, 2);
        assert!(record.deposit_tx_hash.is_none());
        assert!(record.actual_received_amount.is_none());
        assert!(record.is_open());
    }

    #[test]
    fn test_from_amount_normalized_to_eight_places() {
        let quote = test_quote();
        let record = ExchangeRecord::new(
            &quote,
            Amount::new(dec!(0.123456789123)).unwrap(),
            Amount::new(dec!(1)).unwrap(),
            "addr".to_string(),
            "addr".to_string(),
            None,
            None,
            2,
        );

        assert_eq!(record.from_amount.as_decimal(), dec!(0.12345679));
    }

    #[test]
    fn test_register_deposit_transitions_to_received() {
        let mut record = test_record();

        record.register_deposit("h1", dec!(0.1)).unwrap();

        assert_eq!(record.status, ExchangeStatus::Received);
        assert_eq!(record.deposit_tx_hash.as_deref(), Some("h1"));
        assert_eq!(record.actual_received_amount, Some(dec!(0.1)));
        assert_eq!(record.confirmations, 0);
    }

    #[test]
    fn test_first_seen_deposit_hash_wins() {
        let mut record = test_record();
        record.register_deposit("h1", dec!(0.1)).unwrap();

        let result = record.register_deposit("h2", dec!(0.2));

        assert!(result.is_err());
        assert_eq!(record.deposit_tx_hash.as_deref(), Some("h1"));
        assert_eq!(record.actual_received_amount, Some(dec!(0.1)));
    }

    #[test]
    fn test_confirmations_never_decrease() {
        let mut record = test_record();
        record.register_deposit("h1", dec!(0.1)).unwrap();

        let mut recorded = Vec::new();
        for observed in [2, 1, 3] {
            recorded.push(record.record_confirmations(observed, 500).unwrap());
        }

        assert_eq!(recorded, vec![2, 2, 3]);
        assert_eq!(record.confirmations, 3);
    }

    #[test]
    fn test_confirmations_clamped_to_ceiling() {
        let mut record = test_record();
        record.register_deposit("h1", dec!(0.1)).unwrap();

        let recorded = record.record_confirmations(10_000, 500).unwrap();
        assert_eq!(recorded, 500);
    }

    #[test]
    fn test_skipping_received_is_rejected() {
        let mut record = test_record();

        // waiting → exchanging directly must not silently jump
        let result = record.begin_exchanging();

        assert!(matches!(result, Err(DomainError::InvalidStateTransition(_))));
        assert_eq!(record.status, ExchangeStatus::Waiting);
    }

    #[test]
    fn test_begin_exchanging_requires_threshold() {
        let mut record = test_record();
        record.register_deposit("h1", dec!(0.1)).unwrap();
        record.record_confirmations(1, 500).unwrap();

        assert!(record.begin_exchanging().is_err());

        record.record_confirmations(2, 500).unwrap();
        record.begin_exchanging().unwrap();
        assert_eq!(record.status, ExchangeStatus::Exchanging);
    }

    #[test]
    fn test_complete_only_from_exchanging() {
        let mut record = test_record();
        assert!(record.complete().is_err());

        record.register_deposit("h1", dec!(0.1)).unwrap();
        assert!(record.complete().is_err());

        record.record_confirmations(2, 500).unwrap();
        record.begin_exchanging().unwrap();
        record.complete().unwrap();

        assert_eq!(record.status, ExchangeStatus::Completed);
        assert!(record.is_terminal());
    }

    #[test]
    fn test_fail_reachable_from_any_non_terminal_state() {
        // waiting
        let mut record = test_record();
        record.fail("observer unreachable").unwrap();
        assert_eq!(record.status, ExchangeStatus::Failed);
        assert_eq!(record.failure_reason.as_deref(), Some("observer unreachable"));

        // received
        let mut record = test_record();
        record.register_deposit("h1", dec!(0.1)).unwrap();
        record.fail("reorg").unwrap();
        assert_eq!(record.status, ExchangeStatus::Failed);

        // exchanging
        let mut record = test_record();
        record.register_deposit("h1", dec!(0.1)).unwrap();
        record.record_confirmations(2, 500).unwrap();
        record.begin_exchanging().unwrap();
        record.fail("settlement rejected").unwrap();
        assert_eq!(record.status, ExchangeStatus::Failed);
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut record = test_record();
        record.register_deposit("h1", dec!(0.1)).unwrap();
        record.record_confirmations(2, 500).unwrap();
        record.begin_exchanging().unwrap();
        record.complete().unwrap();

        assert!(record.fail("too late").is_err());
        assert!(record.complete().is_err());
        assert!(record.register_deposit("h2", dec!(0.1)).is_err());
    }

    #[test]
    fn test_settlement_amount_prefers_observed_deposit() {
        let mut record = test_record();
        assert_eq!(record.settlement_amount(), dec!(0.1));

        record.register_deposit("h1", dec!(0.095)).unwrap();
        assert_eq!(record.settlement_amount(), dec!(0.095));
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for status in [
            ExchangeStatus::Waiting,
            ExchangeStatus::Received,
            ExchangeStatus::Exchanging,
            ExchangeStatus::Completed,
            ExchangeStatus::Failed,
        ] {
            assert_eq!(status.name().parse::<ExchangeStatus>().unwrap(), status);
        }
        assert!("pending".parse::<ExchangeStatus>().is_err());
    }
}
