//! Guard-shape Lock Manager
//!
//! Conditioned appends are serialized per canonical guard shape. The shape
//! of a query (sorted conditions within each clause, sorted clauses) is
//! hashed with SHA-256 into a [`LockKey`]; two guards that differ only in
//! declaration order share a key, unrelated guards never contend.
//!
//! Locks are held in an in-process arena of `tokio` mutexes keyed by
//! [`LockKey`]. An entry lives only while someone holds or waits on it and
//! is pruned when the last [`LockGuard`] for it drops. A zero-length marker
//! `locks/<key>.lock` is created when an entry is (re)created.

use crate::types::{EventLogError, Result};
use kroniko_domain::Query;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

const CONDITION_SEPARATOR: u8 = 0x1f;
const CLAUSE_SEPARATOR: u8 = 0x1e;

/// Fixed-width (64 hex chars) key derived from a guard's canonical shape
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockKey(String);

impl LockKey {
    /// Key for a guard query
    ///
    /// Formula: SHA256(clause₁ ␞ clause₂ ␞ …) where each clause is its sorted
    /// canonical conditions joined by ␟.
    pub fn for_query(query: &Query) -> Self {
        let mut hasher = Sha256::new();
        for clause in query.canonical_shape() {
            for condition in clause {
                hasher.update(condition.as_bytes());
                hasher.update([CONDITION_SEPARATOR]);
            }
            hasher.update([CLAUSE_SEPARATOR]);
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type LockTable = Arc<Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>>;

/// Exclusive hold on one lock key; released on drop
pub struct LockGuard {
    key: LockKey,
    guard: Option<OwnedMutexGuard<()>>,
    table: LockTable,
}

impl LockGuard {
    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = table
            .get(&self.key)
            .is_some_and(|handle| Arc::strong_count(handle) == 1);
        if idle {
            table.remove(&self.key);
        }
        debug!(lock_key = %self.key, pruned = idle, "Lock released");
    }
}

/// Named-lock arena for conditioned appends
pub struct LockManager {
    dir: PathBuf,
    attempts: u32,
    delay: Duration,
    locks: LockTable,
}

impl LockManager {
    /// Create a manager whose markers live in `dir` (must already exist)
    pub fn new(dir: impl Into<PathBuf>, attempts: u32, delay: Duration) -> Self {
        Self {
            dir: dir.into(),
            attempts: attempts.max(1),
            delay,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// One non-blocking attempt; `None` if another holder has the key
    pub async fn try_acquire(&self, key: &LockKey) -> Result<Option<LockGuard>> {
        let handle = self.handle(key).await?;
        Ok(handle.try_lock_owned().ok().map(|guard| LockGuard {
            key: key.clone(),
            guard: Some(guard),
            table: Arc::clone(&self.locks),
        }))
    }

    /// Acquire with the configured bounded retry: the attempts spaced by
    /// the configured delay, i.e. [`acquire_within`](Self::acquire_within)
    /// over `delay * (attempts - 1)`.
    ///
    /// # Errors
    /// `LockTimeout` when every attempt finds the key held
    pub async fn acquire(&self, key: &LockKey) -> Result<LockGuard> {
        let timeout = self.delay * (self.attempts - 1);
        if let Some(guard) = self.acquire_within(key, timeout).await? {
            debug!(lock_key = %key, "Lock acquired");
            return Ok(guard);
        }

        warn!(lock_key = %key, attempts = self.attempts, "Lock acquisition timed out");
        Err(EventLogError::LockTimeout {
            key: key.to_string(),
            attempts: self.attempts,
        })
    }

    /// `acquire(key, timeout) -> bool`: try now, then once per configured
    /// delay until `timeout` runs out. `None` means the key stayed held.
    ///
    /// This is the contract any lock backend keeps; a cross-process file
    /// lock would replace the arena behind it.
    pub async fn acquire_within(&self, key: &LockKey, timeout: Duration) -> Result<Option<LockGuard>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(guard) = self.try_acquire(key).await? {
                return Ok(Some(guard));
            }
            if tokio::time::Instant::now() + self.delay > deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.delay).await;
        }
    }

    /// Keys currently held or being waited on
    pub fn tracked_keys(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Marker file path for a key
    pub fn marker_path(&self, key: &LockKey) -> PathBuf {
        self.dir.join(format!("{}.lock", key))
    }

    async fn handle(&self, key: &LockKey) -> Result<Arc<AsyncMutex<()>>> {
        let (handle, created) = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            match locks.get(key) {
                Some(handle) => (handle.clone(), false),
                None => {
                    let handle = Arc::new(AsyncMutex::new(()));
                    locks.insert(key.clone(), handle.clone());
                    (handle, true)
                }
            }
        };

        if created {
            tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .open(self.marker_path(key))
                .await?;
        }
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kroniko_domain::QueryItem;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> LockManager {
        LockManager::new(dir.path(), 3, Duration::from_millis(5))
    }

    fn cart_guard(cart_id: &str) -> Query {
        Query::item(
            QueryItem::new()
                .types(["ItemAdded", "ItemRemoved"])
                .property("cart_id", cart_id),
        )
    }

    #[test]
    fn test_key_is_fixed_width_hex() {
        let key = LockKey::for_query(&cart_guard("42"));
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_key_ignores_declaration_order() {
        let a = Query::item(
            QueryItem::new()
                .types(["ItemAdded", "ItemRemoved"])
                .property("cart_id", "42")
                .property("item_id", "7"),
        );
        let b = Query::item(
            QueryItem::new()
                .property("item_id", "7")
                .property("cart_id", "42")
                .types(["ItemRemoved", "ItemAdded"]),
        );
        assert_eq!(LockKey::for_query(&a), LockKey::for_query(&b));
    }

    #[test]
    fn test_key_normalizes_value_representation() {
        let text = Query::item(QueryItem::new().property("cart_id", "42"));
        let number = Query::item(QueryItem::new().property("cart_id", 42));
        assert_eq!(LockKey::for_query(&text), LockKey::for_query(&number));
    }

    #[test]
    fn test_distinct_shapes_get_distinct_keys() {
        assert_ne!(
            LockKey::for_query(&cart_guard("1")),
            LockKey::for_query(&cart_guard("2"))
        );

        // clause boundaries matter: (A AND B) is not (A) OR (B)
        let joined = Query::item(QueryItem::new().property("a", "1").property("b", "2"));
        let split = Query::new(vec![
            QueryItem::new().property("a", "1"),
            QueryItem::new().property("b", "2"),
        ]);
        assert_ne!(LockKey::for_query(&joined), LockKey::for_query(&split));
    }

    #[tokio::test]
    async fn test_marker_file_created() {
        let dir = TempDir::new().unwrap();
        let lm = manager(&dir);
        let key = LockKey::for_query(&cart_guard("42"));

        let _guard = lm.acquire(&key).await.unwrap();
        let marker = lm.marker_path(&key);
        assert!(marker.exists());
        assert_eq!(std::fs::metadata(marker).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_same_key_times_out_while_held() {
        let dir = TempDir::new().unwrap();
        let lm = manager(&dir);
        let key = LockKey::for_query(&cart_guard("42"));

        let guard = lm.acquire(&key).await.unwrap();
        let err = lm.acquire(&key).await.err().unwrap();
        assert!(matches!(err, EventLogError::LockTimeout { attempts: 3, .. }));

        drop(guard);
        assert!(lm.acquire(&key).await.is_ok());
    }

    #[tokio::test]
    async fn test_disjoint_keys_do_not_contend() {
        let dir = TempDir::new().unwrap();
        let lm = manager(&dir);

        let _a = lm.acquire(&LockKey::for_query(&cart_guard("1"))).await.unwrap();
        let b = lm.try_acquire(&LockKey::for_query(&cart_guard("2"))).await.unwrap();
        assert!(b.is_some());
    }

    #[tokio::test]
    async fn test_released_keys_are_pruned() {
        let dir = TempDir::new().unwrap();
        let lm = manager(&dir);

        for cart_id in ["1", "2", "3"] {
            let guard = lm.acquire(&LockKey::for_query(&cart_guard(cart_id))).await.unwrap();
            assert_eq!(lm.tracked_keys(), 1);
            drop(guard);
        }
        assert_eq!(lm.tracked_keys(), 0);

        let key = LockKey::for_query(&cart_guard("1"));
        let held = lm.acquire(&key).await.unwrap();
        assert!(lm.try_acquire(&key).await.unwrap().is_none());
        assert_eq!(lm.tracked_keys(), 1);

        drop(held);
        assert_eq!(lm.tracked_keys(), 0);
        assert!(lm.try_acquire(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_acquire_within_reports_false_on_timeout() {
        let dir = TempDir::new().unwrap();
        let lm = manager(&dir);
        let key = LockKey::for_query(&cart_guard("9"));

        let _held = lm.acquire(&key).await.unwrap();
        let attempt = lm
            .acquire_within(&key, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(attempt.is_none());
    }
}
