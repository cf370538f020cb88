//! Confirmation tracker: accumulate confirmation depth for a detected
//! deposit until the currency's finality threshold is met.
//!
//! One tracker loop runs per exchange in `received`. The recorded count is
//! monotone: an observer reporting a lower depth than previously recorded
//! is clamped, never regressed. On reaching the threshold the record moves
//! `received → exchanging` and this loop ends; the driver then runs the
//! settlement step.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cambio_connectors::ChainObserver;
use cambio_domain::{Currency, ExchangeId, ExchangeStatus};
use cambio_engine::Lifecycle;
use cambio_store::ExchangeRepository;

use crate::deposit_monitor::RunExit;
use crate::error::{DaemonError, DaemonResult};
use crate::event_bus::EventBus;

/// Polls confirmation depth for an exchange's deposit transaction.
pub struct ConfirmationTracker {
    observer: Arc<dyn ChainObserver>,
    store: Arc<dyn ExchangeRepository>,
    bus: Arc<EventBus>,
    lifecycle: Lifecycle,
    poll_interval_override: Option<Duration>,
}

impl ConfirmationTracker {
    /// Create a confirmation tracker.
    pub fn new(
        observer: Arc<dyn ChainObserver>,
        store: Arc<dyn ExchangeRepository>,
        bus: Arc<EventBus>,
        poll_interval_override: Option<Duration>,
    ) -> Self {
        Self {
            observer,
            store,
            bus,
            lifecycle: Lifecycle::new(),
            poll_interval_override,
        }
    }

    fn effective_interval(&self, currency: &Currency) -> Duration {
        self.poll_interval_override
            .unwrap_or_else(|| currency.poll_interval())
    }

    /// Poll until finality is reached or the token fires.
    ///
    /// Tick errors are swallowed and retried on the next scheduled tick.
    pub async fn run(
        &self,
        id: ExchangeId,
        currency: &Currency,
        cancel: &CancellationToken,
    ) -> DaemonResult<RunExit> {
        let interval = self.effective_interval(currency);
        debug!(exchange_id = %id, interval_ms = interval.as_millis() as u64, "Confirmation tracker started");

        loop {
            if cancel.is_cancelled() {
                return Ok(RunExit::Cancelled);
            }

            match self.tick(id, currency).await {
                Ok(true) => return Ok(RunExit::PhaseComplete),
                Ok(false) => {}
                Err(e) => {
                    warn!(exchange_id = %id, error = %e, "Confirmation poll failed, retrying next tick");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(RunExit::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// One poll tick. Returns true when the confirmation phase is over.
    pub(crate) async fn tick(&self, id: ExchangeId, currency: &Currency) -> DaemonResult<bool> {
        let record = self.store.load(id).await?;

        if record.status != ExchangeStatus::Received {
            // Threshold already crossed (or terminal); nothing left here
            return Ok(true);
        }

        let Some(tx_hash) = record.deposit_tx_hash.clone() else {
            // Guarded out by the domain; a received record always has a hash
            return Err(DaemonError::Domain(
                cambio_domain::DomainError::InvalidStateTransition(format!(
                    "Record {} is received without a deposit hash",
                    id
                )),
            ));
        };

        let observed = self
            .observer
            .get_confirmations(&tx_hash, &record.from_currency)
            .await?;

        let decision = self.lifecycle.on_confirmations(&record, currency, observed)?;

        if decision.events.is_empty() {
            // Nothing changed this tick
            return Ok(false);
        }

        let threshold_crossed = decision.record.status == ExchangeStatus::Exchanging;

        match self
            .store
            .update_guarded(ExchangeStatus::Received, &decision.record)
            .await
        {
            Ok(()) => {
                if threshold_crossed {
                    info!(
                        exchange_id = %id,
                        confirmations = decision.record.confirmations,
                        required = decision.record.required_confirmations,
                        "Finality reached"
                    );
                }
                self.bus.publish_decision(id, &decision.events);
                Ok(threshold_crossed)
            }
            Err(e) if e.is_conflict() => {
                debug!(exchange_id = %id, "Lost confirmation write race, no-op");
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
