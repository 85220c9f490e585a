//! Event Log Module
//!
//! File-backed, append-only event store with:
//! - Gap-free positions assigned by a newline-delimited position log
//! - Per-attribute posting lists for type and payload queries
//! - Append conditions guarded by per-shape locks
//! - Synchronous and asynchronous subscriber dispatch
//!
//! # Usage
//!
//! ```rust,no_run
//! use kroniko_eventlog::{AppendCondition, Event, EventStore, Query, QueryItem, ReadOptions, StoreConfig};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = EventStore::open(StoreConfig::new("event_store")).await?;
//!
//! let cart = Query::item(
//!     QueryItem::new()
//!         .types(["ItemAdded", "ItemRemoved"])
//!         .property("cart_id", "42"),
//! );
//! let history = store.read(&cart, ReadOptions::new()).await?;
//! let after = history.last().map(|e| e.position).unwrap_or(0);
//!
//! let event = Event::with_value("ItemAdded", json!({"cart_id": "42", "item_id": "7"}))?;
//! store
//!     .write(vec![event], Some(AppendCondition::new(cart).after(after)))
//!     .await?;
//!
//! store.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod append;
pub mod config;
pub mod dispatch;
pub mod index;
pub mod lock;
pub mod position_log;
pub mod query;
pub mod storage;
pub mod store;
pub mod types;

pub use config::StoreConfig;
pub use dispatch::{AsyncSubscriber, Dispatcher};
pub use lock::{LockGuard, LockKey, LockManager};
pub use query::QueryEngine;
pub use store::EventStore;
pub use types::{EventLogError, Result};

pub use kroniko_domain::{
    AppendCondition, DomainError, Event, EventId, Position, Query, QueryItem, ReadOptions,
    SequencedEvent, StoredEvent,
};
