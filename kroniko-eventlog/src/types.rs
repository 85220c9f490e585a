//! Event Log Types

use kroniko_domain::{DomainError, Position};

/// Event log errors
#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    /// Write input failed validation; never retried
    #[error("Validation error: {0}")]
    Validation(#[from] DomainError),

    /// The append guard matched existing events; never retried
    #[error("Append condition failed: {matches} matching event(s) after {}", watermark(.after))]
    AppendConditionFailed {
        after: Option<Position>,
        matches: usize,
    },

    /// The guard lock stayed busy for every bounded retry
    #[error("Lock timeout on {key} after {attempts} attempts")]
    LockTimeout { key: String, attempts: u32 },

    /// `write()` exhausted its backoff schedule waiting for a guard lock
    #[error("Failed to acquire lock {key} after {attempts} write attempts")]
    LockAcquisitionFailed { key: String, attempts: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted record exists but cannot be parsed
    #[error("Corrupted record: {0}")]
    Corrupted(String),
}

impl EventLogError {
    /// Business conflict raised by an append condition
    pub fn is_conflict(&self) -> bool {
        matches!(self, EventLogError::AppendConditionFailed { .. })
    }

    /// Transient contention that `write()` retries internally
    pub fn is_retryable(&self) -> bool {
        matches!(self, EventLogError::LockTimeout { .. })
    }
}

fn watermark(after: &Option<Position>) -> String {
    match after {
        Some(position) => format!("position {}", position),
        None => "the start of the log".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, EventLogError>;
