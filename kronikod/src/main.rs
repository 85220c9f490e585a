//! Kroniko Daemon
//!
//! Event store host and demo shopping-cart API.
//!
//! # Usage
//!
//! ```bash
//! # Start with default configuration
//! cargo run -p kronikod
//!
//! # Start with custom environment
//! KRONIKO_DATA_DIR=/var/lib/kroniko KRONIKO_API_PORT=8081 cargo run -p kronikod
//! ```
//!
//! # Environment Variables
//!
//! - `KRONIKO_ENV`: Environment (test, development, production)
//! - `KRONIKO_DATA_DIR`: Store root (default: event_store)
//! - `KRONIKO_API_HOST`: API host (default: 0.0.0.0)
//! - `KRONIKO_API_PORT`: API port (default: 8080)
//! - `KRONIKO_LOCK_RETRY_ATTEMPTS`: Lock attempts per acquisition (default: 10)
//! - `KRONIKO_LOCK_RETRY_DELAY_MS`: Pause between lock attempts (default: 10)
//! - `KRONIKO_WRITE_MAX_ATTEMPTS`: Acquisitions per guarded write (default: 5)
//! - `KRONIKO_WRITE_BACKOFF_MS`: First write backoff (default: 20)
//! - `KRONIKO_SYNC_WRITES`: fsync every write (default: false)
//! - `KRONIKO_MAX_CART_ITEMS`: Items allowed per cart (default: 3)

use kronikod::{Config, Daemon, Environment};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing; JSON lines in production
    let json = config.environment == Environment::Production;
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("kronikod=info".parse()?)
                .add_directive("kroniko_eventlog=info".parse()?),
        )
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer()))
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        data_dir = %config.store.data_dir.display(),
        api_host = %config.api.host,
        api_port = config.api.port,
        "Kroniko Daemon"
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                signal_token.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    let daemon = Daemon::open(config).await?;
    daemon.run(shutdown).await?;

    Ok(())
}
