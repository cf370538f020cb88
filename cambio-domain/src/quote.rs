//! Exchange quotes.
//!
//! A quote is computed at creation time and embedded into the exchange
//! record; it is never persisted independently.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::value_objects::{Amount, CurrencyCode, DomainError, RateType};

/// A priced pair: the effective rate the receiver settles at.
///
/// `rate` already has the commission applied; `base_rate` is the raw market
/// rate the quote was derived from. For fixed-rate exchanges the quote is
/// locked into the record at creation and later market movement must not
/// alter settlement math.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeQuote {
    /// Asset the sender deposits
    pub from_currency: CurrencyCode,
    /// Asset the receiver is paid in
    pub to_currency: CurrencyCode,
    /// Floating or fixed
    pub rate_type: RateType,
    /// Raw market rate before commission
    pub base_rate: Decimal,
    /// Effective rate after commission
    pub rate: Decimal,
    /// Commission percentage applied to the output
    pub fee_percent: Decimal,
}

impl ExchangeQuote {
    /// Build a quote with validation.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidQuote` for same-currency pairs or
    /// non-positive rates.
    pub fn new(
        from_currency: CurrencyCode,
        to_currency: CurrencyCode,
        rate_type: RateType,
        base_rate: Decimal,
        rate: Decimal,
        fee_percent: Decimal,
    ) -> Result<Self, DomainError> {
        if from_currency == to_currency {
            return Err(DomainError::InvalidQuote(
                "From and to currencies cannot be the same".to_string(),
            ));
        }

        if base_rate <= Decimal::ZERO || rate <= Decimal::ZERO {
            return Err(DomainError::InvalidQuote("Rate must be positive".to_string()));
        }

        if fee_percent < Decimal::ZERO || fee_percent >= Decimal::from(100) {
            return Err(DomainError::InvalidQuote(format!(
                "Fee percent out of range: {}",
                fee_percent
            )));
        }

        Ok(Self {
            from_currency,
            to_currency,
            rate_type,
            base_rate,
            rate,
            fee_percent,
        })
    }

    /// Output amount for a given input, rounded to the destination
    /// currency's precision.
    pub fn to_amount(&self, from_amount: Amount, to_precision: u32) -> Amount {
        Amount::new(from_amount.as_decimal() * self.rate)
            .map(|a| a.round_dp(to_precision))
            // rate and from_amount are both validated positive
            .unwrap_or(from_amount)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn code(c: &str) -> CurrencyCode {
        CurrencyCode::new(c).unwrap()
    }

    #[test]
    fn test_quote_rejects_same_pair() {
        let result = ExchangeQuote::new(
            code("BTC"),
            code("BTC"),
            RateType::Floating,
            dec!(1),
            dec!(0.99),
            dec!(1),
        );
        assert!(matches!(result, Err(DomainError::InvalidQuote(_))));
    }

    #[test]
    fn test_quote_rejects_non_positive_rate() {
        let result = ExchangeQuote::new(
            code("BTC"),
            code("XMR"),
            RateType::Floating,
            dec!(0),
            dec!(0),
            dec!(1),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_to_amount_rounds_to_destination_precision() {
        let quote = ExchangeQuote::new(
            code("BTC"),
            code("XMR"),
            RateType::Floating,
            dec!(112.78421),
            dec!(111.6563679),
            dec!(1),
        )
        .unwrap();

        let from_amount = Amount::new(dec!(0.1)).unwrap();
        let to_amount = quote.to_amount(from_amount, 12);

        assert_eq!(to_amount.as_decimal(), dec!(11.16563679));
    }
}
