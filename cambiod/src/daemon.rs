//! Daemon: main runtime orchestrator.
//!
//! Ties together the exchange manager, event bus, store, and API server.
//!
//! # Lifecycle
//!
//! 1. Load configuration
//! 2. Initialize components
//! 3. Resume monitoring for open exchanges from the store
//! 4. Start API server
//! 5. Main loop (log bus events, wait for shutdown)
//! 6. Graceful shutdown on SIGINT: cancel every driver task

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use cambio_connectors::{
    StubAddressProvider, StubChainObserver, StubPriceSource, StubSettlement,
};
use cambio_domain::CurrencyCatalog;
use cambio_engine::RateEngine;
use cambio_store::{ExchangeRepository, MemoryStore};

use crate::api::{create_router, ApiState};
use crate::config::Config;
use crate::error::{DaemonError, DaemonResult};
use crate::event_bus::{EventBus, ExchangeEvent};
use crate::exchange_manager::ExchangeManager;

// =============================================================================
// Daemon
// =============================================================================

/// The main Cambio daemon.
pub struct Daemon {
    config: Config,
    manager: Arc<ExchangeManager>,
    bus: Arc<EventBus>,
    store: Arc<dyn ExchangeRepository>,
    catalog: Arc<CurrencyCatalog>,
}

impl Daemon {
    /// Create a daemon with stub collaborators (development/testing).
    pub fn new_stub(config: Config) -> DaemonResult<Self> {
        let catalog = Arc::new(CurrencyCatalog::builtin().clone());
        let store: Arc<dyn ExchangeRepository> = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::default());

        let rate_engine = RateEngine::new(
            config.exchange.floating_commission_pct,
            config.exchange.fixed_commission_pct,
        )?;

        let manager = Arc::new(ExchangeManager::new(
            catalog.clone(),
            store.clone(),
            Arc::new(StubChainObserver::new()),
            Arc::new(StubSettlement::new()),
            Arc::new(StubPriceSource::with_demo_rates()),
            Arc::new(StubAddressProvider::new()),
            rate_engine,
            bus.clone(),
            config.exchange.poll_interval_override,
        ));

        Ok(Self {
            config,
            manager,
            bus,
            store,
            catalog,
        })
    }

    /// Create a daemon from pre-wired components.
    pub fn new(
        config: Config,
        manager: Arc<ExchangeManager>,
        bus: Arc<EventBus>,
        store: Arc<dyn ExchangeRepository>,
        catalog: Arc<CurrencyCatalog>,
    ) -> Self {
        Self {
            config,
            manager,
            bus,
            store,
            catalog,
        }
    }

    /// The exchange manager (for tests and embedding).
    pub fn manager(&self) -> Arc<ExchangeManager> {
        self.manager.clone()
    }

    /// Run the daemon until SIGINT.
    pub async fn run(self) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            "Starting Cambio daemon"
        );

        // 1. Resume monitoring for open exchanges
        let restored = self.manager.clone().restore_open_exchanges().await?;
        if restored > 0 {
            info!(count = restored, "Resumed monitoring for open exchanges");
        } else {
            info!("No open exchanges to resume");
        }

        // 2. Start API server
        let api_addr = self.start_api_server().await?;
        info!(%api_addr, "API server started");

        // 3. Main loop: log engine events until shutdown
        let mut receiver = self.bus.subscribe();
        loop {
            tokio::select! {
                Some(event_result) = receiver.recv() => {
                    match event_result {
                        Ok(event) => log_event(&event),
                        Err(lag_msg) => warn!(%lag_msg, "Event receiver lagged"),
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        // 4. Graceful shutdown: cancel every driver task before exit
        self.shutdown().await
    }

    /// Start the API server on the configured address.
    async fn start_api_server(&self) -> DaemonResult<SocketAddr> {
        let state = Arc::new(ApiState {
            manager: self.manager.clone(),
            catalog: self.catalog.clone(),
            store: self.store.clone(),
        });

        let router = create_router(state);
        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| DaemonError::Config(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| DaemonError::Config(format!("Failed to get local address: {}", e)))?;

        // Spawn the server task
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "API server error");
            }
        });

        Ok(local_addr)
    }

    async fn shutdown(&self) -> DaemonResult<()> {
        info!("Initiating graceful shutdown");
        self.manager.stop_all().await;
        info!("Shutdown complete");
        Ok(())
    }
}

fn log_event(event: &ExchangeEvent) {
    match event {
        ExchangeEvent::StatusChanged {
            exchange_id,
            status,
            confirmations,
            required_confirmations,
            ..
        } => {
            info!(
                %exchange_id,
                %status,
                confirmations = confirmations.unwrap_or(0),
                required = required_confirmations.unwrap_or(0),
                "Exchange status changed"
            );
        }
        ExchangeEvent::AmountMismatch {
            exchange_id,
            expected,
            actual,
            ..
        } => {
            warn!(%exchange_id, %expected, %actual, "Deposit amount mismatch");
        }
        ExchangeEvent::DepositAnomaly {
            exchange_id,
            tx_hash,
            ..
        } => {
            warn!(%exchange_id, tx_hash, "Deposit anomaly flagged for reconciliation");
        }
    }
}

// =============================================================================
// Postgres wiring
// =============================================================================

#[cfg(feature = "postgres")]
impl Daemon {
    /// Create a daemon backed by PostgreSQL (`CAMBIO_DATABASE_URL`).
    ///
    /// Chain observation still requires a real observer wiring; this
    /// constructor swaps only the store.
    pub async fn new_with_postgres(config: Config) -> DaemonResult<Self> {
        let url = std::env::var("CAMBIO_DATABASE_URL")
            .map_err(|_| DaemonError::Config("CAMBIO_DATABASE_URL not set".to_string()))?;

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(8)
            .connect(&url)
            .await
            .map_err(|e| DaemonError::Config(format!("Database connection failed: {}", e)))?;

        cambio_store::init_schema(&pool).await?;

        let catalog = Arc::new(CurrencyCatalog::builtin().clone());
        let store: Arc<dyn ExchangeRepository> = Arc::new(cambio_store::PgExchangeStore::new(pool));
        let bus = Arc::new(EventBus::default());

        let rate_engine = RateEngine::new(
            config.exchange.floating_commission_pct,
            config.exchange.fixed_commission_pct,
        )?;

        let manager = Arc::new(ExchangeManager::new(
            catalog.clone(),
            store.clone(),
            Arc::new(cambio_connectors::BlockCypherObserver::new()),
            Arc::new(StubSettlement::new()),
            Arc::new(StubPriceSource::with_demo_rates()),
            Arc::new(StubAddressProvider::new()),
            rate_engine,
            bus.clone(),
            config.exchange.poll_interval_override,
        ));

        Ok(Self {
            config,
            manager,
            bus,
            store,
            catalog,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
