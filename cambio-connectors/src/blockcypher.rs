//! BlockCypher chain-observer adapter for UTXO chains (BTC, LTC, DOGE).
//!
//! Address-activity and transaction queries against the BlockCypher REST
//! API. Amounts arrive in base units (satoshis) and are converted to
//! coin-denominated decimals. Network failures surface as transient errors
//! and are retried by the monitor on its next scheduled tick.

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use cambio_domain::CurrencyCode;

use crate::error::{ConnectorError, ConnectorResult};
use crate::ports::{ChainObserver, DepositCheck};

const DEFAULT_BASE_URL: &str = "https://api.blockcypher.com/v1";

/// Decimal places of the base unit (satoshi-style) on supported chains.
const BASE_UNIT_SCALE: u32 = 8;

/// HTTP chain observer backed by BlockCypher.
pub struct BlockCypherObserver {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BlockCypherObserver {
    /// Create an observer against the public API.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
        }
    }

    /// Point the observer at a different endpoint (tests, proxies).
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Attach an API token to raise the rate limit.
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    fn chain_path(currency: &CurrencyCode) -> ConnectorResult<&'static str> {
        match currency.as_str() {
            "BTC" => Ok("btc/main"),
            "LTC" => Ok("ltc/main"),
            "DOGE" => Ok("doge/main"),
            other => Err(ConnectorError::UnsupportedCurrency(other.to_string())),
        }
    }

    fn url(&self, chain: &str, resource: &str) -> String {
        let mut url = format!("{}/{}/{}", self.base_url, chain, resource);
        if let Some(token) = &self.token {
            url.push_str(&format!("?token={}", token));
        }
        url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> ConnectorResult<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ConnectorError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectorError::Transient(format!(
                "BlockCypher returned {}",
                status
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ConnectorError::InvalidResponse {
                service: "blockcypher".to_string(),
                detail: e.to_string(),
            })
    }
}

impl Default for BlockCypherObserver {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a base-unit value to a coin-denominated decimal.
fn from_base_units(value: i64) -> Decimal {
    Decimal::new(value, BASE_UNIT_SCALE)
}

#[derive(Debug, Deserialize)]
struct AddressInfo {
    #[serde(default)]
    txrefs: Vec<TxRef>,
}

#[derive(Debug, Deserialize)]
struct TxRef {
    tx_hash: String,
    value: i64,
    #[serde(default)]
    confirmations: u32,
}

#[derive(Debug, Deserialize)]
struct TxInfo {
    #[serde(default)]
    confirmations: u32,
}

#[async_trait::async_trait]
impl ChainObserver for BlockCypherObserver {
    async fn check_deposit(
        &self,
        address: &str,
        currency: &CurrencyCode,
    ) -> ConnectorResult<DepositCheck> {
        let chain = Self::chain_path(currency)?;
        let url = self.url(chain, &format!("addrs/{}", address));

        let info: AddressInfo = self.get_json(&url).await?;

        // Most recent transaction first
        match info.txrefs.first() {
            Some(tx) => {
                let amount = from_base_units(tx.value);
                debug!(
                    %currency,
                    address,
                    tx_hash = %tx.tx_hash,
                    %amount,
                    confirmations = tx.confirmations,
                    "Deposit observed"
                );
                Ok(DepositCheck::detected(&tx.tx_hash, amount, tx.confirmations))
            }
            None => Ok(DepositCheck::none()),
        }
    }

    async fn get_confirmations(
        &self,
        tx_hash: &str,
        currency: &CurrencyCode,
    ) -> ConnectorResult<u32> {
        let chain = Self::chain_path(currency)?;
        let url = self.url(chain, &format!("txs/{}", tx_hash));

        let info: TxInfo = self.get_json(&url).await?;
        Ok(info.confirmations)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_chain_path_mapping() {
        let btc = CurrencyCode::new("BTC").unwrap();
        let xmr = CurrencyCode::new("XMR").unwrap();

        assert_eq!(BlockCypherObserver::chain_path(&btc).unwrap(), "btc/main");
        assert!(matches!(
            BlockCypherObserver::chain_path(&xmr),
            Err(ConnectorError::UnsupportedCurrency(_))
        ));
    }

    #[test]
    fn test_base_unit_conversion() {
        assert_eq!(from_base_units(10_000_000), dec!(0.1));
        assert_eq!(from_base_units(1), dec!(0.00000001));
        assert_eq!(from_base_units(250_000_000), dec!(2.5));
    }

    #[test]
    fn test_address_response_parsing() {
        let json = r#"{
            "address": "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa",
            "txrefs": [
                {"tx_hash": "h1", "value": 10000000, "confirmations": 3},
                {"tx_hash": "h0", "value": 5000000, "confirmations": 100}
            ]
        }"#;

        let info: AddressInfo = serde_json::from_str(json).unwrap();
        let latest = info.txrefs.first().unwrap();

        assert_eq!(latest.tx_hash, "h1");
        assert_eq!(from_base_units(latest.value), dec!(0.1));
        assert_eq!(latest.confirmations, 3);
    }

    #[test]
    fn test_empty_address_response_parsing() {
        let info: AddressInfo = serde_json::from_str(r#"{"address": "x"}"#).unwrap();
        assert!(info.txrefs.is_empty());
    }

    #[test]
    fn test_url_includes_token() {
        let observer = BlockCypherObserver::with_base_url("http://localhost:9999").with_token("t1");
        assert_eq!(
            observer.url("btc/main", "addrs/a1"),
            "http://localhost:9999/btc/main/addrs/a1?token=t1"
        );
    }
}
