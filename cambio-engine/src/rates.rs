//! Rate engine: commission application over an externally sourced market rate.
//!
//! The market rate itself comes from a `PriceSource` collaborator; this
//! layer only derives the effective rate the receiver settles at. Floating
//! quotes carry the lower commission and track the market until settlement;
//! fixed quotes carry the higher commission and are locked into the record
//! at creation. Re-deriving a quote for display is read-only and never
//! mutates a persisted record.

use rust_decimal::Decimal;
use tracing::debug;

use cambio_domain::{Amount, Currency, ExchangeQuote, RateType};

use crate::error::{EngineError, EngineResult};

/// Decimal places effective rates are rounded to.
const RATE_PRECISION: u32 = 8;

/// Derives effective exchange rates from base market rates.
#[derive(Debug, Clone)]
pub struct RateEngine {
    /// Commission for floating-rate quotes, percent of output
    floating_commission_pct: Decimal,
    /// Commission for fixed-rate quotes, percent of output
    fixed_commission_pct: Decimal,
}

impl RateEngine {
    /// Create a rate engine with explicit commissions.
    ///
    /// # Errors
    /// Returns `EngineError::InvalidCommission` if either percentage is
    /// negative or at/above 100.
    pub fn new(floating_commission_pct: Decimal, fixed_commission_pct: Decimal) -> EngineResult<Self> {
        for (label, pct) in [
            ("floating", floating_commission_pct),
            ("fixed", fixed_commission_pct),
        ] {
            if pct < Decimal::ZERO || pct >= Decimal::from(100) {
                return Err(EngineError::InvalidCommission(format!(
                    "{} commission out of range: {}%",
                    label, pct
                )));
            }
        }

        Ok(Self {
            floating_commission_pct,
            fixed_commission_pct,
        })
    }

    /// Commission percentage for a rate type.
    pub fn commission_pct(&self, rate_type: RateType) -> Decimal {
        match rate_type {
            RateType::Floating => self.floating_commission_pct,
            RateType::Fixed => self.fixed_commission_pct,
        }
    }

    /// Compute a quote from a base market rate.
    ///
    /// The sender pays the full from-amount; the commission is applied to
    /// the output: `effective = base × (1 − commission)`.
    ///
    /// # Errors
    /// `EngineError::Domain` for same-currency pairs or non-positive rates.
    pub fn quote(
        &self,
        from: &Currency,
        to: &Currency,
        rate_type: RateType,
        base_rate: Decimal,
    ) -> EngineResult<ExchangeQuote> {
        let fee_percent = self.commission_pct(rate_type);
        let effective = (base_rate
            * (Decimal::ONE - fee_percent / Decimal::from(100)))
        .round_dp(RATE_PRECISION);

        debug!(
            from = %from.code,
            to = %to.code,
            %rate_type,
            %base_rate,
            rate = %effective,
            "Quote computed"
        );

        Ok(ExchangeQuote::new(
            from.code.clone(),
            to.code.clone(),
            rate_type,
            base_rate,
            effective,
            fee_percent,
        )?)
    }

    /// Output amount for a quote, rounded to the destination precision.
    pub fn to_amount(&self, quote: &ExchangeQuote, from_amount: Amount, to: &Currency) -> Amount {
        quote.to_amount(from_amount, to.precision)
    }
}

impl Default for RateEngine {
    /// Documented defaults: floating 1%, fixed 2%.
    fn default() -> Self {
        Self {
            floating_commission_pct: Decimal::ONE,
            fixed_commission_pct: Decimal::from(2),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use cambio_domain::CurrencyCatalog;
    use rust_decimal_macros::dec;

    fn pair() -> (&'static Currency, &'static Currency) {
        let catalog = CurrencyCatalog::builtin();
        (catalog.get("BTC").unwrap(), catalog.get("XMR").unwrap())
    }

    #[test]
    fn test_default_commissions() {
        let engine = RateEngine::default();
        assert_eq!(engine.commission_pct(RateType::Floating), dec!(1));
        assert_eq!(engine.commission_pct(RateType::Fixed), dec!(2));
    }

    #[test]
    fn test_floating_quote_applies_one_percent() {
        let engine = RateEngine::default();
        let (btc, xmr) = pair();

        let quote = engine
            .quote(btc, xmr, RateType::Floating, dec!(112.78421))
            .unwrap();

        assert_eq!(quote.rate, dec!(111.6563679));
        assert_eq!(quote.base_rate, dec!(112.78421));
        assert_eq!(quote.fee_percent, dec!(1));

        let to_amount = engine.to_amount(&quote, Amount::new(dec!(0.1)).unwrap(), xmr);
        assert_eq!(to_amount.as_decimal(), dec!(11.16563679));
    }

    #[test]
    fn test_fixed_quote_applies_two_percent() {
        let engine = RateEngine::default();
        let (btc, xmr) = pair();

        let quote = engine
            .quote(btc, xmr, RateType::Fixed, dec!(112.78421))
            .unwrap();

        assert_eq!(quote.rate, dec!(110.5285258));
        assert_eq!(quote.fee_percent, dec!(2));
    }

    #[test]
    fn test_requote_does_not_touch_existing_quote() {
        // Re-derivation for display must never mutate an earlier quote.
        let engine = RateEngine::default();
        let (btc, xmr) = pair();

        let original = engine
            .quote(btc, xmr, RateType::Floating, dec!(112.78421))
            .unwrap();
        let rate_before = original.rate;

        let _fresh = engine
            .quote(btc, xmr, RateType::Floating, dec!(150.0))
            .unwrap();

        assert_eq!(original.rate, rate_before);
    }

    #[test]
    fn test_same_pair_rejected() {
        let engine = RateEngine::default();
        let catalog = CurrencyCatalog::builtin();
        let btc = catalog.get("BTC").unwrap();

        assert!(engine.quote(btc, btc, RateType::Floating, dec!(1)).is_err());
    }

    #[test]
    fn test_commission_bounds() {
        assert!(RateEngine::new(dec!(0), dec!(0)).is_ok());
        assert!(RateEngine::new(dec!(-1), dec!(2)).is_err());
        assert!(RateEngine::new(dec!(1), dec!(100)).is_err());
    }
}
