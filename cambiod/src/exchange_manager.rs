//! Exchange manager: the creation use case and the per-exchange driver
//! task registry.
//!
//! Each open exchange is driven by exactly one spawned task holding a
//! cancellation token. Within the task the phases run strictly in order
//! (deposit polling, confirmation tracking, settlement), so no two timers
//! for the same (exchange, concern) are ever active at once, and
//! transitions per exchange id are strictly ordered. Across different
//! exchange ids there is no ordering guarantee and none is required.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cambio_connectors::{
    ChainObserver, DepositAddressProvider, PriceSource, SettlementService,
};
use cambio_domain::address::{validate_address, validate_email};
use cambio_domain::{
    Amount, Currency, CurrencyCatalog, DomainError, ExchangeId, ExchangeQuote, ExchangeRecord,
    ExchangeStatus, RateType,
};
use cambio_engine::{Lifecycle, RateEngine};
use cambio_store::ExchangeRepository;

use crate::confirmation_tracker::ConfirmationTracker;
use crate::deposit_monitor::{DepositMonitor, PollGate, RunExit};
use crate::error::{DaemonError, DaemonResult};
use crate::event_bus::{EventBus, ExchangeEvent};

/// Attempts to draw an unused deposit address before giving up.
const MAX_ADDRESS_ATTEMPTS: usize = 5;

// =============================================================================
// Request
// =============================================================================

/// Input to the exchange-creation use case.
#[derive(Debug, Clone)]
pub struct NewExchangeRequest {
    /// Asset the sender deposits
    pub from_currency: String,
    /// Asset the receiver is paid in
    pub to_currency: String,
    /// Requested deposit amount
    pub from_amount: Decimal,
    /// Payout address, validated against the destination currency
    pub receiving_address: String,
    /// Optional refund address, validated against the source currency
    pub refund_address: Option<String>,
    /// Optional notification email
    pub email: Option<String>,
    /// Quoting mode
    pub rate_type: RateType,
}

struct ExchangeTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

// =============================================================================
// Exchange Manager
// =============================================================================

/// Owns the collaborators and the driver task per open exchange.
pub struct ExchangeManager {
    catalog: Arc<CurrencyCatalog>,
    store: Arc<dyn ExchangeRepository>,
    settlement: Arc<dyn SettlementService>,
    price_source: Arc<dyn PriceSource>,
    address_provider: Arc<dyn DepositAddressProvider>,
    rate_engine: RateEngine,
    lifecycle: Lifecycle,
    bus: Arc<EventBus>,
    deposit_monitor: DepositMonitor,
    confirmation_tracker: ConfirmationTracker,
    tasks: RwLock<HashMap<ExchangeId, ExchangeTask>>,
}

impl ExchangeManager {
    /// Wire a manager from its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<CurrencyCatalog>,
        store: Arc<dyn ExchangeRepository>,
        observer: Arc<dyn ChainObserver>,
        settlement: Arc<dyn SettlementService>,
        price_source: Arc<dyn PriceSource>,
        address_provider: Arc<dyn DepositAddressProvider>,
        rate_engine: RateEngine,
        bus: Arc<EventBus>,
        poll_interval_override: Option<std::time::Duration>,
    ) -> Self {
        let gate = Arc::new(PollGate::new());
        let deposit_monitor = DepositMonitor::new(
            observer.clone(),
            store.clone(),
            bus.clone(),
            gate,
            poll_interval_override,
        );
        let confirmation_tracker = ConfirmationTracker::new(
            observer,
            store.clone(),
            bus.clone(),
            poll_interval_override,
        );

        Self {
            catalog,
            store,
            settlement,
            price_source,
            address_provider,
            rate_engine,
            lifecycle: Lifecycle::new(),
            bus,
            deposit_monitor,
            confirmation_tracker,
            tasks: RwLock::new(HashMap::new()),
        }
    }

    fn currency(&self, code: &str) -> DaemonResult<&Currency> {
        self.catalog
            .get(code)
            .ok_or_else(|| DomainError::InvalidCurrency(format!("Unsupported currency: {}", code)).into())
    }

    // =========================================================================
    // Quoting
    // =========================================================================

    /// Compute a quote for a pair without touching any record.
    ///
    /// Re-derivation for an open floating-rate exchange goes through here
    /// too (e.g., UI polling for display); it never mutates the persisted
    /// rate; only settlement commits it.
    pub async fn quote(
        &self,
        from_code: &str,
        to_code: &str,
        rate_type: RateType,
    ) -> DaemonResult<ExchangeQuote> {
        let from = self.currency(from_code)?;
        let to = self.currency(to_code)?;

        if from.code == to.code {
            return Err(DomainError::InvalidQuote(
                "From and to currencies cannot be the same".to_string(),
            )
            .into());
        }

        let base_rate = self.price_source.get_rate(&from.code, &to.code).await?;
        Ok(self.rate_engine.quote(from, to, rate_type, base_rate)?)
    }

    // =========================================================================
    // Creation use case
    // =========================================================================

    fn validate_request(&self, req: &NewExchangeRequest) -> DaemonResult<()> {
        let from = self.currency(&req.from_currency)?;
        let to = self.currency(&req.to_currency)?;

        if req.from_amount < from.min_amount || req.from_amount > from.max_amount {
            return Err(DomainError::InvalidAmount(format!(
                "{} amount must be between {} and {}",
                from.code, from.min_amount, from.max_amount
            ))
            .into());
        }

        if !validate_address(&self.catalog, &req.receiving_address, to.code.as_str()) {
            return Err(DomainError::InvalidAddress(format!(
                "Receiving address is not a valid {} address",
                to.code
            ))
            .into());
        }

        if let Some(refund) = non_empty(req.refund_address.as_deref()) {
            if !validate_address(&self.catalog, refund, from.code.as_str()) {
                return Err(DomainError::InvalidAddress(format!(
                    "Refund address is not a valid {} address",
                    from.code
                ))
                .into());
            }
        }

        if let Some(email) = non_empty(req.email.as_deref()) {
            if !validate_email(email) {
                return Err(DomainError::InvalidEmail(email.to_string()).into());
            }
        }

        Ok(())
    }

    async fn allocate_deposit_address(&self, currency: &Currency) -> DaemonResult<String> {
        for _ in 0..MAX_ADDRESS_ATTEMPTS {
            let address = self.address_provider.allocate(currency).await?;
            if self
                .store
                .find_open_by_deposit_address(&address)
                .await?
                .is_none()
            {
                return Ok(address);
            }
            warn!(currency = %currency.code, address, "Allocated address already held by an open exchange, retrying");
        }

        Err(DaemonError::AddressAllocation(format!(
            "No unused {} deposit address after {} attempts",
            currency.code, MAX_ADDRESS_ATTEMPTS
        )))
    }

    /// Create an exchange: validate, quote, assign a deposit address,
    /// persist in `waiting`, and start monitoring.
    ///
    /// Validation and pair-support errors surface synchronously to the
    /// caller; nothing invalid is ever persisted.
    pub async fn create_exchange(
        self: Arc<Self>,
        req: NewExchangeRequest,
    ) -> DaemonResult<ExchangeRecord> {
        self.validate_request(&req)?;

        let from = self.currency(&req.from_currency)?;
        let to = self.currency(&req.to_currency)?;

        let quote = self
            .quote(&req.from_currency, &req.to_currency, req.rate_type)
            .await?;
        let from_amount = Amount::new(req.from_amount)?;
        let to_amount = self.rate_engine.to_amount(&quote, from_amount, to);

        let deposit_address = self.allocate_deposit_address(from).await?;

        let record = ExchangeRecord::new(
            &quote,
            from_amount,
            to_amount,
            deposit_address,
            req.receiving_address.trim().to_string(),
            non_empty(req.refund_address.as_deref()).map(str::to_string),
            non_empty(req.email.as_deref()).map(str::to_string),
            from.required_confirmations,
        );

        self.store.insert(&record).await?;

        info!(
            exchange_id = %record.id,
            from = %record.from_currency,
            to = %record.to_currency,
            from_amount = %record.from_amount,
            to_amount = %record.to_amount,
            rate_type = %record.rate_type,
            "Exchange created"
        );

        self.bus.send(ExchangeEvent::StatusChanged {
            exchange_id: record.id,
            status: ExchangeStatus::Waiting,
            tx_hash: None,
            confirmations: None,
            required_confirmations: Some(record.required_confirmations),
            timestamp: chrono::Utc::now(),
        });

        self.clone().start_monitoring(record.id).await?;

        Ok(record)
    }

    // =========================================================================
    // Monitoring
    // =========================================================================

    /// Start (or resume) monitoring an exchange.
    ///
    /// Idempotent: a second call while a driver task is live is a no-op,
    /// and a call for a terminal record returns immediately with zero
    /// external calls and zero state mutations.
    pub async fn start_monitoring(self: Arc<Self>, id: ExchangeId) -> DaemonResult<()> {
        let record = self.store.load(id).await?;
        if record.is_terminal() {
            debug!(exchange_id = %id, status = %record.status, "Terminal record, nothing to monitor");
            return Ok(());
        }

        let currency = self.catalog.resolve(&record.from_currency);

        // Check-and-insert under one lock so two racing calls cannot both
        // spawn a driver for the same exchange. The driver's self-removal
        // serializes behind this lock as well.
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get(&id) {
            if !task.handle.is_finished() {
                debug!(exchange_id = %id, "Already monitored, no-op");
                return Ok(());
            }
        }

        let token = CancellationToken::new();
        let manager = self.clone();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            manager.drive(id, currency, task_token).await;
        });

        tasks.insert(id, ExchangeTask { token, handle });
        Ok(())
    }

    /// Drive an exchange through its remaining phases, one at a time.
    async fn drive(self: Arc<Self>, id: ExchangeId, currency: Currency, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let record = match self.store.load(id).await {
                Ok(record) => record,
                Err(e) => {
                    error!(exchange_id = %id, error = %e, "Driver cannot load record, stopping");
                    break;
                }
            };

            let exit = match record.status {
                ExchangeStatus::Waiting => {
                    self.deposit_monitor.run(id, &currency, &cancel).await
                }
                ExchangeStatus::Received => {
                    self.confirmation_tracker.run(id, &currency, &cancel).await
                }
                ExchangeStatus::Exchanging => match self.settle(id).await {
                    Ok(()) => Ok(RunExit::PhaseComplete),
                    Err(e) => {
                        error!(exchange_id = %id, error = %e, "Settlement step errored, stopping driver");
                        break;
                    }
                },
                ExchangeStatus::Completed | ExchangeStatus::Failed => break,
            };

            match exit {
                Ok(RunExit::PhaseComplete) => continue,
                Ok(RunExit::Cancelled) => break,
                Err(e) => {
                    error!(exchange_id = %id, error = %e, "Monitor loop errored, stopping driver");
                    break;
                }
            }
        }

        // Cancel before any further state can be touched, then deregister.
        // Safe to call repeatedly.
        cancel.cancel();
        self.tasks.write().await.remove(&id);
        debug!(exchange_id = %id, "Driver task finished");
    }

    /// Run the bounded settlement step for a finalized deposit.
    async fn settle(&self, id: ExchangeId) -> DaemonResult<()> {
        let record = self.store.load(id).await?;
        if record.status != ExchangeStatus::Exchanging {
            return Ok(());
        }

        info!(
            exchange_id = %id,
            amount = %record.settlement_amount(),
            to = %record.to_currency,
            "Settlement started"
        );

        let decision = match self.settlement.convert(&record).await {
            Ok(()) => self.lifecycle.on_settlement_success(&record)?,
            Err(failure) => {
                warn!(exchange_id = %id, reason = %failure.reason, "Settlement failed");
                self.lifecycle.on_settlement_failure(&record, &failure.reason)?
            }
        };

        match self
            .store
            .update_guarded(ExchangeStatus::Exchanging, &decision.record)
            .await
        {
            Ok(()) => {
                self.bus.publish_decision(id, &decision.events);
                Ok(())
            }
            Err(e) if e.is_conflict() => {
                debug!(exchange_id = %id, "Lost settlement write race, no-op");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stop monitoring an exchange. Idempotent; cancels the timer before
    /// any further state mutation.
    pub async fn stop(&self, id: ExchangeId) {
        if let Some(task) = self.tasks.write().await.remove(&id) {
            task.token.cancel();
            debug!(exchange_id = %id, "Monitoring stopped");
        }
    }

    /// Stop all driver tasks (shutdown path).
    pub async fn stop_all(&self) {
        let mut tasks = self.tasks.write().await;
        for (id, task) in tasks.drain() {
            task.token.cancel();
            debug!(exchange_id = %id, "Monitoring stopped");
        }
    }

    /// Resume monitoring for every open record in the store (startup path).
    pub async fn restore_open_exchanges(self: Arc<Self>) -> DaemonResult<usize> {
        let open = self.store.find_open().await?;
        let count = open.len();

        for record in open {
            self.clone().start_monitoring(record.id).await?;
        }

        Ok(count)
    }

    /// Number of live driver tasks.
    pub async fn active_task_count(&self) -> usize {
        self.tasks.read().await.len()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// =============================================================================
// Tests
// =============================================================================
