//! Currency catalog: the per-asset reference data registry.
//!
//! Everything currency-specific (address grammar, finality threshold,
//! polling cadence, amount bounds, display precision) lives here as data
//! so the lifecycle engine stays currency-agnostic.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;

use crate::value_objects::CurrencyCode;

/// Confirmation threshold applied to currencies without a catalog entry.
pub const DEFAULT_REQUIRED_CONFIRMATIONS: u32 = 3;

/// Poll interval applied to currencies without a catalog entry.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 20_000;

/// Ceiling applied to confirmation counts for unknown currencies.
pub const DEFAULT_CONFIRMATION_CEILING: u32 = 1_000;

/// Minimum length for the generic address check used when a currency has
/// no hand-authored pattern. Passing it proves surface plausibility only,
/// never on-chain correctness.
pub const GENERIC_MIN_ADDRESS_LEN: usize = 10;

// =============================================================================
// Network
// =============================================================================

/// A chain/network a currency settles on.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Network {
    /// Chain identifier (e.g., "BTC")
    pub chain_id: String,
    /// Human-readable network name
    pub name: String,
}

impl Network {
    /// Create a network entry.
    pub fn new(chain_id: &str, name: &str) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            name: name.to_string(),
        }
    }
}

// =============================================================================
// Currency
// =============================================================================

/// Immutable reference data for one supported currency.
#[derive(Debug, Clone)]
pub struct Currency {
    /// Asset ticker
    pub code: CurrencyCode,
    /// Human-readable name
    pub name: String,
    /// Networks the asset settles on
    pub networks: Vec<Network>,
    /// Compiled address grammar; `None` falls back to the generic check
    pub address_pattern: Option<Regex>,
    /// Finality threshold: confirmations before a deposit is irreversible
    pub required_confirmations: u32,
    /// Sane upper bound on recorded confirmation counts
    pub confirmation_ceiling: u32,
    /// Minimum interval between chain-observer polls for this asset
    pub poll_interval_ms: u64,
    /// Smallest accepted from-amount
    pub min_amount: Decimal,
    /// Largest accepted from-amount
    pub max_amount: Decimal,
    /// Decimal places used when rounding amounts of this asset
    pub precision: u32,
    /// Deposit/requested divergence above which a mismatch notice is emitted
    pub amount_tolerance: Decimal,
}

impl Currency {
    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Format-check an address against this currency's grammar.
    ///
    /// Trims whitespace; an empty address is invalid. Currencies without a
    /// pattern use the generic minimum-length check.
    pub fn matches_address(&self, address: &str) -> bool {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return false;
        }

        match &self.address_pattern {
            Some(pattern) => pattern.is_match(trimmed),
            None => trimmed.len() >= GENERIC_MIN_ADDRESS_LEN,
        }
    }

    /// Whether an observed deposit diverges materially from the requested amount.
    pub fn amount_mismatch(&self, expected: Decimal, actual: Decimal) -> bool {
        (expected - actual).abs() > self.amount_tolerance
    }
}

// =============================================================================
// CurrencyCatalog
// =============================================================================

/// Registry of supported currencies, looked up by code.
///
/// The catalog is immutable reference data. Lookups for unknown codes fall
/// back to defined defaults rather than erroring, so the engine can drive
/// exchanges for assets that predate a hand-authored catalog entry.
#[derive(Debug, Clone)]
pub struct CurrencyCatalog {
    currencies: HashMap<String, Currency>,
}

impl CurrencyCatalog {
    /// Build a catalog from explicit entries.
    pub fn new(currencies: Vec<Currency>) -> Self {
        let currencies = currencies
            .into_iter()
            .map(|c| (c.code.as_str().to_string(), c))
            .collect();
        Self { currencies }
    }

    /// The built-in production catalog.
    pub fn builtin() -> &'static CurrencyCatalog {
        static CATALOG: Lazy<CurrencyCatalog> = Lazy::new(builtin_catalog);
        &CATALOG
    }

    /// Look up a currency by code (case-insensitive).
    pub fn get(&self, code: &str) -> Option<&Currency> {
        self.currencies.get(code.trim().to_ascii_uppercase().as_str())
    }

    /// Whether the catalog has an entry for this code.
    pub fn contains(&self, code: &str) -> bool {
        self.get(code).is_some()
    }

    /// Finality threshold for a code; unknown codes get the default.
    ///
    /// Pure function of the code, usable before any record exists.
    pub fn required_confirmations(&self, code: &str) -> u32 {
        self.get(code)
            .map(|c| c.required_confirmations)
            .unwrap_or(DEFAULT_REQUIRED_CONFIRMATIONS)
    }

    /// Confirmation ceiling for a code; unknown codes get the default.
    pub fn confirmation_ceiling(&self, code: &str) -> u32 {
        self.get(code)
            .map(|c| c.confirmation_ceiling)
            .unwrap_or(DEFAULT_CONFIRMATION_CEILING)
    }

    /// Poll interval for a code; unknown codes get the default.
    pub fn poll_interval(&self, code: &str) -> Duration {
        Duration::from_millis(
            self.get(code)
                .map(|c| c.poll_interval_ms)
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        )
    }

    /// Resolve a code to catalog data, synthesizing an entry with the
    /// documented defaults when the code has no hand-authored row. Lets the
    /// engine drive records for assets that predate a catalog entry.
    pub fn resolve(&self, code: &CurrencyCode) -> Currency {
        self.get(code.as_str()).cloned().unwrap_or_else(|| Currency {
            code: code.clone(),
            name: code.to_string(),
            networks: Vec::new(),
            address_pattern: None,
            required_confirmations: DEFAULT_REQUIRED_CONFIRMATIONS,
            confirmation_ceiling: DEFAULT_CONFIRMATION_CEILING,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            min_amount: Decimal::ZERO,
            max_amount: Decimal::MAX,
            precision: 8,
            amount_tolerance: Decimal::new(1, 3),
        })
    }

    /// Iterate over all catalog entries.
    pub fn all(&self) -> impl Iterator<Item = &Currency> {
        self.currencies.values()
    }

    /// Number of catalog entries.
    pub fn len(&self) -> usize {
        self.currencies.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.currencies.is_empty()
    }
}

/// Compile one builtin entry. Patterns are authored constants; a failure to
/// compile is a programming error, not a runtime condition.
#[allow(clippy::too_many_arguments)]
fn entry(
    code: &str,
    name: &str,
    chain: &str,
    chain_name: &str,
    pattern: &str,
    required_confirmations: u32,
    confirmation_ceiling: u32,
    poll_interval_ms: u64,
    min_amount: Decimal,
    max_amount: Decimal,
    precision: u32,
    amount_tolerance: Decimal,
) -> Currency {
    Currency {
        code: CurrencyCode::new(code).expect("builtin currency code"),
        name: name.to_string(),
        networks: vec![Network::new(chain, chain_name)],
        address_pattern: Some(Regex::new(pattern).expect("builtin address pattern")),
        required_confirmations,
        confirmation_ceiling,
        poll_interval_ms,
        min_amount,
        max_amount,
        precision,
        amount_tolerance,
    }
}

fn builtin_catalog() -> CurrencyCatalog {
    use rust_decimal_macros::dec;

    CurrencyCatalog::new(vec![
        entry(
            "BTC",
            "Bitcoin",
            "BTC",
            "Bitcoin Network",
            r"^(bc1|[13])[a-zA-HJ-NP-Z0-9]{25,62}$",
            2,
            500,
            20_000,
            dec!(0.001),
            dec!(10),
            8,
            dec!(0.0001),
        ),
        entry(
            "ETH",
            "Ethereum",
            "ETH",
            "Ethereum Network",
            r"^0x[a-fA-F0-9]{40}$",
            12,
            5_000,
            10_000,
            dec!(0.01),
            dec!(100),
            8,
            dec!(0.001),
        ),
        entry(
            "XMR",
            "Monero",
            "XMR",
            "Monero Network",
            r"^4[0-9AB][1-9A-HJ-NP-Za-km-z]{93}$",
            10,
            1_000,
            60_000,
            dec!(0.1),
            dec!(1000),
            12,
            dec!(0.001),
        ),
        entry(
            "LTC",
            "Litecoin",
            "LTC",
            "Litecoin Network",
            r"^[LM3][a-km-zA-HJ-NP-Z1-9]{26,34}$",
            6,
            1_000,
            10_000,
            dec!(0.1),
            dec!(500),
            8,
            dec!(0.0001),
        ),
        entry(
            "XRP",
            "Ripple",
            "XRP",
            "Ripple Network",
            r"^r[0-9a-zA-Z]{24,34}$",
            1,
            500,
            10_000,
            dec!(20),
            dec!(100000),
            6,
            dec!(0.001),
        ),
        entry(
            "DOGE",
            "Dogecoin",
            "DOGE",
            "Dogecoin Network",
            r"^D[5-9A-HJ-NP-U][1-9A-HJ-NP-Za-km-z]{32}$",
            6,
            1_000,
            20_000,
            dec!(100),
            dec!(1000000),
            8,
            dec!(0.01),
        ),
    ])
}

// =============================================================================
// Tests
// =============================================================================
