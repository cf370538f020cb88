//! Stub implementations for tests and development.
//!
//! These fakes are scripted from the outside: tests decide when a deposit
//! appears, which confirmation counts the observer reports, and whether
//! settlement succeeds. Nothing here auto-progresses on wall-clock time,
//! and nothing here is reachable from the lifecycle engine itself.

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use cambio_domain::{Currency, CurrencyCode, ExchangeRecord};

use crate::error::{ConnectorError, ConnectorResult};
use crate::ports::{
    ChainObserver, DepositAddressProvider, DepositCheck, PriceSource, SettlementFailure,
    SettlementService,
};

const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

fn random_chars(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

/// Generate a plausible transaction hash for a currency (64 hex chars,
/// `0x`-prefixed for Ethereum).
pub fn generate_tx_hash(currency: &CurrencyCode) -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    let hash = hex::encode(bytes);

    if currency.as_str() == "ETH" {
        format!("0x{}", hash)
    } else {
        hash
    }
}

// =============================================================================
// Stub Chain Observer
// =============================================================================

struct ConfirmationScript {
    sequence: Vec<u32>,
    cursor: usize,
}

/// Scripted chain observer.
///
/// Deposits and confirmation sequences are injected by the test; call
/// counters let tests assert the rate-limiting and idempotence properties
/// (exactly N external calls).
#[derive(Default)]
pub struct StubChainObserver {
    /// Scripted deposit result per address
    deposits: RwLock<HashMap<String, DepositCheck>>,
    /// Scripted confirmation sequence per tx hash (last value repeats)
    confirmations: RwLock<HashMap<String, ConfirmationScript>>,
    /// check_deposit calls per address
    check_calls: RwLock<HashMap<String, u64>>,
    total_check_calls: AtomicU64,
    total_confirmation_calls: AtomicU64,
    /// Whether to fail the next call with a transient error
    fail_next: RwLock<bool>,
}

impl StubChainObserver {
    /// Create an observer with no scripted activity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the deposit result for an address.
    pub fn script_deposit(&self, address: &str, check: DepositCheck) {
        self.deposits
            .write()
            .unwrap()
            .insert(address.to_string(), check);
    }

    /// Script a detected deposit with a generated hash; returns the hash.
    pub fn script_detected(
        &self,
        address: &str,
        currency: &CurrencyCode,
        amount: Decimal,
    ) -> String {
        let tx_hash = generate_tx_hash(currency);
        self.script_deposit(address, DepositCheck::detected(&tx_hash, amount, 0));
        tx_hash
    }

    /// Script the confirmation counts reported for a tx hash, in order.
    /// Once the sequence is exhausted the last value repeats.
    pub fn script_confirmations(&self, tx_hash: &str, sequence: Vec<u32>) {
        self.confirmations.write().unwrap().insert(
            tx_hash.to_string(),
            ConfirmationScript { sequence, cursor: 0 },
        );
    }

    /// Configure the next call to fail with a transient error.
    pub fn set_fail_next(&self, fail: bool) {
        *self.fail_next.write().unwrap() = fail;
    }

    fn should_fail(&self) -> bool {
        let mut fail_next = self.fail_next.write().unwrap();
        let fail = *fail_next;
        *fail_next = false; // Reset after check
        fail
    }

    /// check_deposit calls made for one address.
    pub fn check_calls(&self, address: &str) -> u64 {
        self.check_calls
            .read()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    /// Total external calls of any kind.
    pub fn total_calls(&self) -> u64 {
        self.total_check_calls.load(Ordering::SeqCst)
            + self.total_confirmation_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainObserver for StubChainObserver {
    async fn check_deposit(
        &self,
        address: &str,
        _currency: &CurrencyCode,
    ) -> ConnectorResult<DepositCheck> {
        *self
            .check_calls
            .write()
            .unwrap()
            .entry(address.to_string())
            .or_insert(0) += 1;
        self.total_check_calls.fetch_add(1, Ordering::SeqCst);

        if self.should_fail() {
            return Err(ConnectorError::Transient(
                "Simulated observer outage".to_string(),
            ));
        }

        Ok(self
            .deposits
            .read()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or_else(DepositCheck::none))
    }

    async fn get_confirmations(
        &self,
        tx_hash: &str,
        _currency: &CurrencyCode,
    ) -> ConnectorResult<u32> {
        self.total_confirmation_calls.fetch_add(1, Ordering::SeqCst);

        if self.should_fail() {
            return Err(ConnectorError::Transient(
                "Simulated observer outage".to_string(),
            ));
        }

        let mut scripts = self.confirmations.write().unwrap();
        match scripts.get_mut(tx_hash) {
            Some(script) if !script.sequence.is_empty() => {
                let value = script.sequence[script.cursor];
                if script.cursor + 1 < script.sequence.len() {
                    script.cursor += 1;
                }
                Ok(value)
            }
            _ => Ok(0),
        }
    }
}

// =============================================================================
// Stub Settlement
// =============================================================================

/// Scripted settlement venue.
///
/// Converts immediately (or after a configured delay); captures the last
/// record seen so tests can assert the settlement math basis.
#[derive(Default)]
pub struct StubSettlement {
    fail_with: RwLock<Option<String>>,
    delay: Duration,
    calls: AtomicU64,
    last_converted: RwLock<Option<ExchangeRecord>>,
}

impl StubSettlement {
    /// Create a settlement stub that succeeds immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the bounded conversion duration of the real venue.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Configure conversions to fail with a reason (`None` to succeed).
    pub fn set_fail_with(&self, reason: Option<&str>) {
        *self.fail_with.write().unwrap() = reason.map(str::to_string);
    }

    /// Number of convert calls made.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// The last record handed to convert, if any.
    pub fn last_converted(&self) -> Option<ExchangeRecord> {
        self.last_converted.read().unwrap().clone()
    }
}

#[async_trait]
impl SettlementService for StubSettlement {
    async fn convert(&self, record: &ExchangeRecord) -> Result<(), SettlementFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        *self.last_converted.write().unwrap() = Some(record.clone());

        match self.fail_with.read().unwrap().as_deref() {
            Some(reason) => Err(SettlementFailure::new(reason)),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Stub Price Source
// =============================================================================

/// In-memory rate table with inverse-pair fallback.
pub struct StubPriceSource {
    rates: RwLock<HashMap<(String, String), Decimal>>,
}

impl StubPriceSource {
    /// Create an empty price source.
    pub fn new() -> Self {
        Self {
            rates: RwLock::new(HashMap::new()),
        }
    }

    /// Demo rate table for development wiring.
    pub fn with_demo_rates() -> Self {
        let source = Self::new();
        let table: &[(&str, &str, &str)] = &[
            ("BTC", "ETH", "16.3"),
            ("BTC", "XMR", "83.1"),
            ("BTC", "LTC", "201.5"),
            ("BTC", "XRP", "56789.2"),
            ("BTC", "DOGE", "234567.8"),
            ("ETH", "XMR", "5.1"),
            ("ETH", "LTC", "12.3"),
            ("ETH", "XRP", "3467.1"),
            ("ETH", "DOGE", "14323.4"),
            ("XMR", "LTC", "2.41"),
            ("XMR", "XRP", "678.9"),
            ("XMR", "DOGE", "2801.3"),
            ("LTC", "XRP", "283.7"),
            ("LTC", "DOGE", "1167.2"),
            ("XRP", "DOGE", "4.12"),
        ];
        for (from, to, rate) in table {
            source.set_rate(from, to, rate.parse().expect("demo rate"));
        }
        source
    }

    /// Set the rate for a pair.
    pub fn set_rate(&self, from: &str, to: &str, rate: Decimal) {
        self.rates
            .write()
            .unwrap()
            .insert((from.to_uppercase(), to.to_uppercase()), rate);
    }
}

impl Default for StubPriceSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceSource for StubPriceSource {
    async fn get_rate(&self, from: &CurrencyCode, to: &CurrencyCode) -> ConnectorResult<Decimal> {
        let rates = self.rates.read().unwrap();
        let direct = (from.as_str().to_string(), to.as_str().to_string());
        if let Some(rate) = rates.get(&direct) {
            return Ok(*rate);
        }

        // Inverse fallback
        let inverse = (to.as_str().to_string(), from.as_str().to_string());
        if let Some(rate) = rates.get(&inverse) {
            if *rate > Decimal::ZERO {
                return Ok(Decimal::ONE / *rate);
            }
        }

        Err(ConnectorError::UnsupportedPair {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

// =============================================================================
// Stub Address Provider
// =============================================================================

/// Generates pattern-conformant one-time deposit addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubAddressProvider;

impl StubAddressProvider {
    /// Create an address provider.
    pub fn new() -> Self {
        Self
    }

    fn generate(code: &str) -> String {
        match code {
            "BTC" => format!("1{}", random_chars(BASE58_ALPHABET, 33)),
            "ETH" => {
                let mut bytes = [0u8; 20];
                rand::thread_rng().fill(&mut bytes);
                format!("0x{}", hex::encode(bytes))
            }
            "XMR" => format!("44{}", random_chars(BASE58_ALPHABET, 93)),
            "LTC" => format!("L{}", random_chars(BASE58_ALPHABET, 33)),
            "XRP" => format!("r{}", random_chars(BASE58_ALPHABET, 33)),
            "DOGE" => format!("D8{}", random_chars(BASE58_ALPHABET, 32)),
            other => {
                let mut bytes = [0u8; 8];
                rand::thread_rng().fill(&mut bytes);
                format!("dep-{}-{}", other.to_lowercase(), hex::encode(bytes))
            }
        }
    }
}

#[async_trait]
impl DepositAddressProvider for StubAddressProvider {
    async fn allocate(&self, currency: &Currency) -> ConnectorResult<String> {
        Ok(Self::generate(currency.code.as_str()))
    }
}

// =============================================================================
// Tests
// =============================================================================
