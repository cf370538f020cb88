//! Builders for exchange records used across unit and integration tests.

use rust_decimal::Decimal;
use uuid::Uuid;

use cambio_domain::{Amount, CurrencyCatalog, ExchangeRecord, RateType};
use cambio_engine::RateEngine;

/// A documented, format-valid address per builtin currency.
pub fn sample_address(code: &str) -> &'static str {
    match code {
        "BTC" => "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa",
        "ETH" => "0x742d35Cc6634C0532925a3b8D8aE000fEd1f9b89",
        "XMR" => {
            "44AFFq5kSiGBoZ4NMDwYtN18obc8AemS33DBLWs3H7otXft3XjrpDtQGv7SqSsaBYBb98uNbr2VBBEt7f2wfn3RVGQBEP3A"
        }
        "LTC" => "LRNYxwQsHpm2A1VhawrJQti3nUMvMLPRWF",
        "XRP" => "rN7n7otQDd6FczFgLdSqtcsAUxDkw6fzRH",
        "DOGE" => "DH5yaieqoZN36fDVciNyRueRGvGLR3mr7L",
        _ => "generic-test-address",
    }
}

/// A deposit address unique per call (stores enforce no concurrent reuse).
pub fn unique_deposit_address(code: &str) -> String {
    format!("dep-{}-{}", code.to_lowercase(), Uuid::now_v7().simple())
}

/// Build a record in `waiting` through the real quote path.
pub fn quoted_record(
    from: &str,
    to: &str,
    rate_type: RateType,
    from_amount: Decimal,
    base_rate: Decimal,
) -> ExchangeRecord {
    let catalog = CurrencyCatalog::builtin();
    let from_currency = catalog.get(from).expect("known from currency");
    let to_currency = catalog.get(to).expect("known to currency");

    let engine = RateEngine::default();
    let quote = engine
        .quote(from_currency, to_currency, rate_type, base_rate)
        .expect("quote");
    let amount = Amount::new(from_amount).expect("positive amount");
    let to_amount = engine.to_amount(&quote, amount, to_currency);

    ExchangeRecord::new(
        &quote,
        amount,
        to_amount,
        unique_deposit_address(from),
        sample_address(to).to_string(),
        None,
        None,
        from_currency.required_confirmations,
    )
}

/// The scenario most tests exercise: a floating BTC→XMR swap.
pub fn btc_to_xmr(from_amount: Decimal, base_rate: Decimal) -> ExchangeRecord {
    quoted_record("BTC", "XMR", RateType::Floating, from_amount, base_rate)
}

/// Advance a waiting record past deposit detection.
pub fn with_deposit(mut record: ExchangeRecord, tx_hash: &str, amount: Decimal) -> ExchangeRecord {
    record
        .register_deposit(tx_hash, amount)
        .expect("record in waiting");
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use cambio_domain::ExchangeStatus;
    use rust_decimal_macros::dec;

    #[test]
    fn test_quoted_record_uses_catalog_threshold() {
        let record = btc_to_xmr(dec!(0.1), dec!(112.78421));

        assert_eq!(record.status, ExchangeStatus::Waiting);
        assert_eq!(record.required_confirmations, 2);
        assert_eq!(record.to_amount.as_decimal(), dec!(11.16563679));
    }

    #[test]
    fn test_deposit_addresses_are_unique() {
        assert_ne!(unique_deposit_address("BTC"), unique_deposit_address("BTC"));
    }

    #[test]
    fn test_with_deposit_advances() {
        let record = with_deposit(btc_to_xmr(dec!(0.1), dec!(112.78421)), "h1", dec!(0.1));
        assert_eq!(record.status, ExchangeStatus::Received);
    }
}
