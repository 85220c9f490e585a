//! Daemon: runtime host for the event store and the API server.
//!
//! # Lifecycle
//!
//! 1. Open the event store (recovering positions from the log)
//! 2. Register the logging subscribers
//! 3. Serve the API until the shutdown token is cancelled
//! 4. Drain asynchronous subscribers and stop

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use kroniko_domain::StoredEvent;
use kroniko_eventlog::EventStore;

use crate::api::{create_router, ApiState};
use crate::config::Config;
use crate::error::{DaemonError, DaemonResult};

// =============================================================================
// Daemon
// =============================================================================

/// The Kroniko daemon.
pub struct Daemon {
    /// Configuration
    config: Config,
    /// Event store shared with the API handlers
    store: Arc<EventStore>,
}

impl Daemon {
    /// Open the store and register the logging subscribers.
    pub async fn open(config: Config) -> DaemonResult<Self> {
        let store = Arc::new(EventStore::open(config.store_config()).await?);

        store.subscribe(|event: &StoredEvent| {
            info!(event_type = %event.event_type, event_id = %event.id, "Event received");
            Ok(())
        });
        store.subscribe_async(|event: StoredEvent| async move {
            debug!(event_id = %event.id, "Processing event");
            anyhow::Ok(())
        });

        Ok(Self { config, store })
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// API router bound to this daemon's store
    pub fn router(&self) -> Router {
        create_router(Arc::new(ApiState::new(
            self.store.clone(),
            self.config.cart.max_items,
        )))
    }

    /// Bind the configured address and serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> DaemonResult<()> {
        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);

        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            DaemonError::Config(format!("Failed to bind to {}: {}", addr, e))
        })?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` is cancelled.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> DaemonResult<()> {
        let local_addr: SocketAddr = listener.local_addr()?;
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            %local_addr,
            "API server started"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;

        info!("API server stopped, draining subscribers");
        self.store.shutdown().await;
        Ok(())
    }
}
