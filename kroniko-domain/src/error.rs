//! Domain validation errors

/// Errors raised when input fails structural validation at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Event type is empty or malformed
    #[error("Invalid event type: {0}")]
    InvalidEventType(String),

    /// Payload is not an object, or an attribute name is unusable
    #[error("Invalid event data: {0}")]
    InvalidData(String),

    /// Wire document does not have the shape of an event
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// A write was attempted with no events
    #[error("Empty batch: at least one event is required")]
    EmptyBatch,
}
