//! Value Objects for the Cambio Domain
//!
//! Immutable, validated domain primitives.
//! All value objects enforce invariants at construction time.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Domain errors for validation and lifecycle rules
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Amount must be positive and inside the currency bounds
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Currency code unknown or malformed
    #[error("Invalid currency: {0}")]
    InvalidCurrency(String),

    /// Address failed the currency's format check
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Email failed the format check
    #[error("Invalid email: {0}")]
    InvalidEmail(String),

    /// Quote construction error (same-currency pair, bad rate)
    #[error("Invalid quote: {0}")]
    InvalidQuote(String),

    /// Invalid state transition
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

// =============================================================================
// CurrencyCode
// =============================================================================

/// CurrencyCode is an uppercase asset ticker (e.g., "BTC", "USDT-ERC20")
///
/// # Invariants
/// - 2 to 16 characters
/// - ASCII alphanumeric plus `-`
/// - Stored uppercase regardless of input case
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Create a new CurrencyCode with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidCurrency` if the code is malformed
    pub fn new(code: &str) -> Result<Self, DomainError> {
        let normalized = code.trim().to_ascii_uppercase();

        if normalized.len() < 2 || normalized.len() > 16 {
            return Err(DomainError::InvalidCurrency(format!(
                "Code must be 2-16 characters: {:?}",
                code
            )));
        }

        if !normalized.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(DomainError::InvalidCurrency(format!(
                "Code must be alphanumeric: {:?}",
                code
            )));
        }

        Ok(Self(normalized))
    }

    /// Get the code as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CurrencyCode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// =============================================================================
// Amount
// =============================================================================

/// Amount represents a positive decimal quantity of an asset
///
/// # Invariants
/// - Must be > 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    /// Create a new Amount with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidAmount` if value <= 0
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value <= Decimal::ZERO {
            return Err(DomainError::InvalidAmount("Amount must be positive".to_string()));
        }
        Ok(Self(value))
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Round to the given number of decimal places
    pub fn round_dp(&self, dp: u32) -> Self {
        Self(self.0.round_dp(dp))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// RateType
// =============================================================================

/// RateType selects the quoting mode for an exchange
///
/// Floating rates track the market until settlement and carry the lower
/// commission; fixed rates are locked at creation and carry the higher one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateType {
    /// Re-derived from live market price, lower commission
    #[serde(rename = "float")]
    Floating,
    /// Locked at creation, higher commission
    #[serde(rename = "fixed")]
    Fixed,
}

impl fmt::Display for RateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateType::Floating => write!(f, "float"),
            RateType::Fixed => write!(f, "fixed"),
        }
    }
}

impl FromStr for RateType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "float" | "floating" => Ok(RateType::Floating),
            "fixed" => Ok(RateType::Fixed),
            other => Err(DomainError::InvalidQuote(format!("Unknown rate type: {}", other))),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // CurrencyCode tests
    #[test]
    fn test_currency_code_normalizes_case() {
        let code = CurrencyCode::new("btc").unwrap();
        assert_eq!(code.as_str(), "BTC");
    }

    #[test]
    fn test_currency_code_allows_network_suffix() {
        let code = CurrencyCode::new("usdt-erc20").unwrap();
        assert_eq!(code.as_str(), "USDT-ERC20");
    }

    #[test]
    fn test_currency_code_rejects_malformed() {
        assert!(CurrencyCode::new("").is_err());
        assert!(CurrencyCode::new("B").is_err());
        assert!(CurrencyCode::new("BTC USD").is_err());
        assert!(CurrencyCode::new("WAYTOOLONGCURRENCYCODE").is_err());
    }

    // Amount tests
    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(dec!(0.00000001)).is_ok());
        assert!(Amount::new(dec!(100.0)).is_ok());
        assert!(Amount::new(dec!(0)).is_err());
        assert!(Amount::new(dec!(-0.1)).is_err());
    }

    #[test]
    fn test_amount_round_dp() {
        let amount = Amount::new(dec!(0.123456789123)).unwrap();
        assert_eq!(amount.round_dp(8).as_decimal(), dec!(0.12345679));
    }

    // RateType tests
    #[test]
    fn test_rate_type_parse() {
        assert_eq!("float".parse::<RateType>().unwrap(), RateType::Floating);
        assert_eq!("floating".parse::<RateType>().unwrap(), RateType::Floating);
        assert_eq!("FIXED".parse::<RateType>().unwrap(), RateType::Fixed);
        assert!("variable".parse::<RateType>().is_err());
    }

    #[test]
    fn test_rate_type_display_roundtrip() {
        assert_eq!(RateType::Floating.to_string(), "float");
        assert_eq!(RateType::Fixed.to_string(), "fixed");
    }
}
