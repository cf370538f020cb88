//! Deposit monitor: detect the first deposit to an exchange's address
//! without exceeding the chain observer's rate limits.
//!
//! One monitor loop runs per exchange in `waiting`. The poll gate keeps a
//! `last_checked_at` stamp per (currency, address); ticks arriving before
//! the minimum interval has elapsed are dropped, not queued, which defends
//! against overlapping timers and scheduler backpressure. A failed poll is
//! logged and retried on the next scheduled tick; it never fails the
//! exchange.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cambio_connectors::ChainObserver;
use cambio_domain::{Currency, CurrencyCode, ExchangeId, ExchangeStatus};
use cambio_engine::Lifecycle;
use cambio_store::ExchangeRepository;

use crate::error::DaemonResult;
use crate::event_bus::{EventBus, ExchangeEvent};

// =============================================================================
// Poll Gate
// =============================================================================

/// Shared rate-limit state: `last_checked_at` per (currency, address).
#[derive(Default)]
pub struct PollGate {
    last_checked: RwLock<HashMap<String, Instant>>,
}

/// Rate-limit key for a monitored address.
pub fn gate_key(currency: &CurrencyCode, address: &str) -> String {
    format!("{}_{}", currency, address)
}

impl PollGate {
    /// Create an empty gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a poll may proceed now; passing stamps the key.
    ///
    /// Returns false when less than `min_interval` has elapsed since the
    /// last passing call for this key; the tick is dropped.
    pub async fn try_pass(&self, key: &str, min_interval: Duration) -> bool {
        let now = Instant::now();
        let mut stamps = self.last_checked.write().await;

        match stamps.get(key) {
            Some(last) if now.duration_since(*last) < min_interval => false,
            _ => {
                stamps.insert(key.to_string(), now);
                true
            }
        }
    }
}

// =============================================================================
// Deposit Monitor
// =============================================================================

/// Why a monitor loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The phase this loop watches is over; the driver decides what's next
    PhaseComplete,
    /// The exchange's cancellation token fired
    Cancelled,
}

/// Polls the chain observer for the first deposit to an exchange address.
pub struct DepositMonitor {
    observer: Arc<dyn ChainObserver>,
    store: Arc<dyn ExchangeRepository>,
    bus: Arc<EventBus>,
    gate: Arc<PollGate>,
    lifecycle: Lifecycle,
    poll_interval_override: Option<Duration>,
}

impl DepositMonitor {
    /// Create a deposit monitor.
    pub fn new(
        observer: Arc<dyn ChainObserver>,
        store: Arc<dyn ExchangeRepository>,
        bus: Arc<EventBus>,
        gate: Arc<PollGate>,
        poll_interval_override: Option<Duration>,
    ) -> Self {
        Self {
            observer,
            store,
            bus,
            gate,
            lifecycle: Lifecycle::new(),
            poll_interval_override,
        }
    }

    fn effective_interval(&self, currency: &Currency) -> Duration {
        self.poll_interval_override
            .unwrap_or_else(|| currency.poll_interval())
    }

    /// Poll until the deposit phase is over or the token fires.
    ///
    /// Tick errors are swallowed at the tick level: a single failed poll
    /// never crashes the monitor or marks the exchange failed.
    pub async fn run(
        &self,
        id: ExchangeId,
        currency: &Currency,
        cancel: &CancellationToken,
    ) -> DaemonResult<RunExit> {
        let interval = self.effective_interval(currency);
        debug!(exchange_id = %id, interval_ms = interval.as_millis() as u64, "Deposit monitor started");

        loop {
            if cancel.is_cancelled() {
                return Ok(RunExit::Cancelled);
            }

            match self.tick(id, currency).await {
                Ok(true) => return Ok(RunExit::PhaseComplete),
                Ok(false) => {}
                Err(e) => {
                    warn!(exchange_id = %id, error = %e, "Deposit poll failed, retrying next tick");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(RunExit::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// One poll tick. Returns true when the deposit phase is over.
    pub(crate) async fn tick(&self, id: ExchangeId, currency: &Currency) -> DaemonResult<bool> {
        let record = self.store.load(id).await?;

        if record.status != ExchangeStatus::Waiting {
            // Already detected (or terminal); nothing left for this loop
            return Ok(true);
        }

        let key = gate_key(&record.from_currency, &record.deposit_address);
        if !self
            .gate
            .try_pass(&key, self.effective_interval(currency))
            .await
        {
            // Dropped tick: the minimum interval has not elapsed
            return Ok(false);
        }

        let check = self
            .observer
            .check_deposit(&record.deposit_address, &record.from_currency)
            .await?;

        if !check.detected {
            return Ok(false);
        }

        let (Some(tx_hash), Some(amount)) = (check.tx_hash.as_deref(), check.amount) else {
            warn!(exchange_id = %id, "Observer reported a deposit without hash or amount");
            return Ok(false);
        };

        let decision = self.lifecycle.on_deposit(&record, currency, tx_hash, amount)?;

        match self
            .store
            .update_guarded(ExchangeStatus::Waiting, &decision.record)
            .await
        {
            Ok(()) => {
                info!(
                    exchange_id = %id,
                    currency = %record.from_currency,
                    tx_hash,
                    %amount,
                    "Deposit detected"
                );
                self.bus.publish_decision(id, &decision.events);
                Ok(true)
            }
            Err(e) if e.is_conflict() => {
                // A concurrent writer advanced the record first: discard
                // our update; the driver re-reads the advanced state.
                debug!(exchange_id = %id, "Lost deposit write race, no-op");
                self.report_anomaly_if_diverged(id, tx_hash).await;
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// After a lost race, flag a conflicting hash for manual reconciliation.
    async fn report_anomaly_if_diverged(&self, id: ExchangeId, observed_hash: &str) {
        if let Ok(Some(current)) = self.store.find_by_id(id).await {
            match current.deposit_tx_hash.as_deref() {
                Some(recorded) if recorded != observed_hash => {
                    warn!(
                        exchange_id = %id,
                        recorded,
                        observed = observed_hash,
                        "Conflicting deposit observation, flagging for reconciliation"
                    );
                    self.bus.send(ExchangeEvent::DepositAnomaly {
                        exchange_id: id,
                        tx_hash: observed_hash.to_string(),
                        timestamp: chrono::Utc::now(),
                    });
                }
                _ => {}
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use cambio_connectors::{DepositCheck, StubChainObserver};
    use cambio_domain::CurrencyCatalog;
    use cambio_store::MemoryStore;
    use cambio_testkit::btc_to_xmr;
    use rust_decimal_macros::dec;

    struct Fixture {
        observer: Arc<StubChainObserver>,
        store: Arc<MemoryStore>,
        bus: Arc<EventBus>,
        monitor: DepositMonitor,
    }

    fn fixture(poll_interval_override: Option<Duration>) -> Fixture {
        let observer = Arc::new(StubChainObserver::new());
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::new(64));
        let monitor = DepositMonitor::new(
            observer.clone(),
            store.clone(),
            bus.clone(),
            Arc::new(PollGate::new()),
            poll_interval_override,
        );
        Fixture {
            observer,
            store,
            bus,
            monitor,
        }
    }

    fn btc() -> Currency {
        CurrencyCatalog::builtin().get("BTC").unwrap().clone()
    }

    #[tokio::test]
    async fn test_two_ticks_within_interval_make_one_external_call() {
        // Interval large enough that the second tick must be dropped
        let fx = fixture(Some(Duration::from_secs(10)));
        let record = btc_to_xmr(dec!(0.1), dec!(112.78421));
        let address = record.deposit_address.clone();
        fx.store.insert(&record).await.unwrap();

        assert!(!fx.monitor.tick(record.id, &btc()).await.unwrap());
        assert!(!fx.monitor.tick(record.id, &btc()).await.unwrap());

        assert_eq!(fx.observer.check_calls(&address), 1);
    }

    #[tokio::test]
    async fn test_detection_transitions_and_publishes() {
        let fx = fixture(Some(Duration::ZERO));
        let record = btc_to_xmr(dec!(0.1), dec!(112.78421));
        let address = record.deposit_address.clone();
        fx.store.insert(&record).await.unwrap();

        let mut receiver = fx.bus.subscribe();
        fx.observer
            .script_deposit(&address, DepositCheck::detected("h1", dec!(0.1), 0));

        let phase_over = fx.monitor.tick(record.id, &btc()).await.unwrap();
        assert!(phase_over);

        let stored = fx.store.load(record.id).await.unwrap();
        assert_eq!(stored.status, ExchangeStatus::Received);
        assert_eq!(stored.deposit_tx_hash.as_deref(), Some("h1"));
        assert_eq!(stored.confirmations, 0);

        match receiver.try_recv().unwrap().unwrap() {
            ExchangeEvent::StatusChanged {
                status,
                confirmations,
                required_confirmations,
                ..
            } => {
                assert_eq!(status, ExchangeStatus::Received);
                assert_eq!(confirmations, Some(0));
                assert_eq!(required_confirmations, Some(2));
            }
            other => panic!("Expected StatusChanged, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_short_deposit_emits_mismatch_and_proceeds() {
        let fx = fixture(Some(Duration::ZERO));
        let record = btc_to_xmr(dec!(0.1), dec!(112.78421));
        let address = record.deposit_address.clone();
        fx.store.insert(&record).await.unwrap();

        let mut receiver = fx.bus.subscribe();
        fx.observer
            .script_deposit(&address, DepositCheck::detected("h1", dec!(0.095), 0));

        fx.monitor.tick(record.id, &btc()).await.unwrap();

        let stored = fx.store.load(record.id).await.unwrap();
        assert_eq!(stored.status, ExchangeStatus::Received);
        assert_eq!(stored.actual_received_amount, Some(dec!(0.095)));
        assert_eq!(stored.settlement_amount(), dec!(0.095));

        // StatusChanged first, then the informational mismatch notice
        assert!(matches!(
            receiver.try_recv().unwrap().unwrap(),
            ExchangeEvent::StatusChanged { .. }
        ));
        match receiver.try_recv().unwrap().unwrap() {
            ExchangeEvent::AmountMismatch {
                expected, actual, ..
            } => {
                assert_eq!(expected, dec!(0.1));
                assert_eq!(actual, dec!(0.095));
            }
            other => panic!("Expected AmountMismatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tick_on_advanced_record_is_noop() {
        let fx = fixture(Some(Duration::ZERO));
        let mut record = btc_to_xmr(dec!(0.1), dec!(112.78421));
        record.register_deposit("h1", dec!(0.1)).unwrap();
        fx.store.insert(&record).await.unwrap();

        let phase_over = fx.monitor.tick(record.id, &btc()).await.unwrap();

        assert!(phase_over);
        assert_eq!(fx.observer.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_transient_error_leaves_record_untouched() {
        let fx = fixture(Some(Duration::ZERO));
        let record = btc_to_xmr(dec!(0.1), dec!(112.78421));
        fx.store.insert(&record).await.unwrap();

        fx.observer.set_fail_next(true);
        let result = fx.monitor.tick(record.id, &btc()).await;
        assert!(result.is_err());

        let stored = fx.store.load(record.id).await.unwrap();
        assert_eq!(stored.status, ExchangeStatus::Waiting);

        // Next tick succeeds
        assert!(!fx.monitor.tick(record.id, &btc()).await.unwrap());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let fx = fixture(Some(Duration::from_millis(5)));
        let record = btc_to_xmr(dec!(0.1), dec!(112.78421));
        fx.store.insert(&record).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let exit = fx.monitor.run(record.id, &btc(), &cancel).await.unwrap();
        assert_eq!(exit, RunExit::Cancelled);
    }
}
