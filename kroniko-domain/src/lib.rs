//! Kroniko Domain Layer
//!
//! Pure data model of the event store with zero I/O dependencies:
//! events before and after persistence, the query algebra used for reads
//! and append guards, and read options.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod condition;
pub mod error;
pub mod event;
pub mod query;

// Re-export commonly used types
pub use condition::{AppendCondition, ReadOptions};
pub use error::DomainError;
pub use event::{Event, EventId, Position, SequencedEvent, StoredEvent, MAX_TYPE_LEN};
pub use query::{data_index_key, value_text, Condition, MatchClause, Query, QueryItem, TYPE_INDEX_KEY};
