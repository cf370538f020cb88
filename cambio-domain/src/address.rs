//! Address and email format validation.
//!
//! Pure, deterministic format checks. A passing address proves surface
//! plausibility only; callers must not treat it as proof of on-chain
//! correctness.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::currency::{CurrencyCatalog, GENERIC_MIN_ADDRESS_LEN};

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("email pattern")
});

/// Format-check an address against a currency's grammar.
///
/// Trims whitespace; an empty address is invalid. An unrecognized currency
/// code falls back to a generic minimum-length check rather than failing,
/// a deliberate permissive default for currencies without a hand-authored
/// pattern.
pub fn validate_address(catalog: &CurrencyCatalog, address: &str, currency_code: &str) -> bool {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return false;
    }

    match catalog.get(currency_code) {
        Some(currency) => currency.matches_address(trimmed),
        None => trimmed.len() >= GENERIC_MIN_ADDRESS_LEN,
    }
}

/// Format-check a notification email address.
pub fn validate_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email.trim())
}

// =============================================================================
// Tests
// =============================================================================
