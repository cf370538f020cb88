//! Cambio Daemon
//!
//! Runtime orchestrator for the exchange lifecycle engine and API server.
//!
//! # Usage
//!
//! ```bash
//! # Start with default configuration
//! cargo run -p cambiod
//!
//! # Start with custom environment
//! CAMBIO_ENV=test CAMBIO_API_PORT=8081 cargo run -p cambiod
//! ```
//!
//! # Environment Variables
//!
//! - `CAMBIO_ENV`: Environment (test, development, production)
//! - `CAMBIO_API_HOST`: API host (default: 0.0.0.0)
//! - `CAMBIO_API_PORT`: API port (default: 8080)
//! - `CAMBIO_FLOAT_COMMISSION_PCT`: Floating-rate commission (default: 1)
//! - `CAMBIO_FIXED_COMMISSION_PCT`: Fixed-rate commission (default: 2)

use cambiod::{Config, Daemon};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("cambiod=info".parse()?))
        .init();

    // Load configuration
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        api_host = %config.api.host,
        api_port = config.api.port,
        "Cambio Daemon"
    );

    // Create and run daemon
    let daemon = Daemon::new_stub(config)?;
    daemon.run().await?;

    Ok(())
}
