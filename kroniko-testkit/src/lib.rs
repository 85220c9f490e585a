//! Test helpers for Kroniko event store tests.
//!
//! Provides throwaway stores in temporary directories, shopping-cart event
//! builders, and a polling helper for asynchronous assertions.

mod helpers;

pub use helpers::{
    cart_cleared, cart_query, eventually, item_added, item_removed, ItemDetails,
};

use anyhow::Result;
use kroniko_eventlog::{EventStore, StoreConfig};
use std::path::Path;
use tempfile::TempDir;

/// An [`EventStore`] rooted in a temporary directory.
///
/// The directory is removed when the value is dropped.
pub struct TestStore {
    pub store: EventStore,
    dir: TempDir,
}

impl TestStore {
    /// Root directory of the store
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Shut the store down and reopen it over the same directory
    pub async fn reopen(self) -> Result<Self> {
        let Self { store, dir } = self;
        let config = store.config().clone();
        store.shutdown().await;
        drop(store);

        Ok(Self {
            store: EventStore::open(config).await?,
            dir,
        })
    }
}

impl std::ops::Deref for TestStore {
    type Target = EventStore;

    fn deref(&self) -> &EventStore {
        &self.store
    }
}

/// Open a fresh store with default tuning in a temporary directory
pub async fn open_temp_store() -> Result<TestStore> {
    open_temp_store_with(|config| config).await
}

/// Open a fresh store, adjusting its configuration first
pub async fn open_temp_store_with<F>(configure: F) -> Result<TestStore>
where
    F: FnOnce(StoreConfig) -> StoreConfig,
{
    let dir = TempDir::new()?;
    let config = configure(StoreConfig::new(dir.path()));
    let store = EventStore::open(config).await?;
    Ok(TestStore { store, dir })
}
