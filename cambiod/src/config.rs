//! Daemon configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::error::{DaemonError, DaemonResult};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Exchange engine configuration
    pub exchange: ExchangeConfig,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Exchange engine configuration.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Commission on floating-rate quotes (percent, default 1)
    pub floating_commission_pct: Decimal,
    /// Commission on fixed-rate quotes (percent, default 2)
    pub fixed_commission_pct: Decimal,
    /// Overrides the catalog poll cadence for every currency.
    /// Intended for tests; production follows the catalog.
    pub poll_interval_override: Option<Duration>,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment (uses stubs)
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let environment = Self::load_environment()?;
        let api = Self::load_api_config()?;
        let exchange = Self::load_exchange_config()?;

        Ok(Self {
            api,
            exchange,
            environment,
        })
    }

    /// Create test configuration: OS-assigned port, fast polling.
    pub fn test() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            exchange: ExchangeConfig {
                floating_commission_pct: Decimal::ONE,
                fixed_commission_pct: Decimal::from(2),
                poll_interval_override: Some(Duration::from_millis(10)),
            },
            environment: Environment::Test,
        }
    }

    fn load_environment() -> DaemonResult<Environment> {
        let env_str = env::var("CAMBIO_ENV").unwrap_or_else(|_| "development".to_string());

        match env_str.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid CAMBIO_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }

    fn load_api_config() -> DaemonResult<ApiConfig> {
        let host = env::var("CAMBIO_API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port_str = env::var("CAMBIO_API_PORT").unwrap_or_else(|_| "8080".to_string());

        let port = port_str
            .parse::<u16>()
            .map_err(|_| DaemonError::Config(format!("Invalid CAMBIO_API_PORT: {}", port_str)))?;

        Ok(ApiConfig { host, port })
    }

    fn load_exchange_config() -> DaemonResult<ExchangeConfig> {
        let floating = Self::load_decimal_env("CAMBIO_FLOAT_COMMISSION_PCT", Decimal::ONE)?;
        let fixed = Self::load_decimal_env("CAMBIO_FIXED_COMMISSION_PCT", Decimal::from(2))?;

        Ok(ExchangeConfig {
            floating_commission_pct: floating,
            fixed_commission_pct: fixed,
            poll_interval_override: None,
        })
    }

    fn load_decimal_env(key: &str, default: Decimal) -> DaemonResult<Decimal> {
        match env::var(key) {
            Ok(val) => Decimal::from_str(&val)
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            Err(_) => Ok(default),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            exchange: ExchangeConfig {
                floating_commission_pct: Decimal::ONE,
                fixed_commission_pct: Decimal::from(2),
                poll_interval_override: None,
            },
            environment: Environment::Development,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
