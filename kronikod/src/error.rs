//! Daemon error types.

use kroniko_domain::DomainError;
use kroniko_eventlog::EventLogError;
use thiserror::Error;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Event store error
    #[error("Event store error: {0}")]
    EventLog(#[from] EventLogError),

    /// Malformed request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Cart already holds the maximum number of items
    #[error("Cart cannot have more than {max} items")]
    CartFull { cart_id: String, max: usize },

    /// Item is not in the cart
    #[error("Item not found in cart")]
    ItemNotFound { cart_id: String, item_id: String },

    /// I/O error outside the event store
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
