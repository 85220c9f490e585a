//! Kroniko Daemon Library
//!
//! Hosts a file-backed event store behind a small HTTP API.
//!
//! # Architecture
//!
//! ```text
//! HTTP → API handlers → Cart service → EventStore (write / read)
//!                                          ↓
//!                                 Dispatcher → logging subscribers
//! ```
//!
//! # Components
//!
//! - **Daemon**: opens the store, serves the API, drains on shutdown
//! - **API**: raw event endpoints and the demo shopping cart
//! - **Cart**: cart fold and guarded cart commands
//! - **Config**: Environment-based configuration

#![warn(clippy::all)]

pub mod api;
pub mod cart;
pub mod config;
pub mod daemon;
pub mod error;

// Re-exports for convenience
pub use api::{create_router, ApiState};
pub use cart::{CartService, CartView};
pub use config::{ApiConfig, CartConfig, Config, Environment, StoreSettings};
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
