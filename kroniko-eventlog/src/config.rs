//! Store configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of non-blocking lock attempts per acquisition
pub const DEFAULT_LOCK_RETRY_ATTEMPTS: u32 = 10;

/// Default fixed pause between lock attempts
pub const DEFAULT_LOCK_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Default number of acquisitions `write()` makes before giving up
pub const DEFAULT_WRITE_MAX_ATTEMPTS: u32 = 5;

/// Default first backoff between acquisitions; doubled each time
pub const DEFAULT_WRITE_BACKOFF_BASE: Duration = Duration::from_millis(20);

/// Configuration for a file-backed event store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory holding `events/`, `log/`, `index/` and `locks/`
    pub base_dir: PathBuf,

    /// Non-blocking lock attempts before reporting a lock timeout
    pub lock_retry_attempts: u32,

    /// Pause between lock attempts
    pub lock_retry_delay: Duration,

    /// Lock acquisitions `write()` makes (with exponential backoff)
    /// before reporting a fatal acquisition failure
    pub write_max_attempts: u32,

    /// Backoff after the first timed-out acquisition
    pub write_backoff_base: Duration,

    /// fsync bodies, log lines and postings after each write
    pub sync_writes: bool,
}

impl StoreConfig {
    /// Configuration rooted at `base_dir` with default tuning
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            lock_retry_attempts: DEFAULT_LOCK_RETRY_ATTEMPTS,
            lock_retry_delay: DEFAULT_LOCK_RETRY_DELAY,
            write_max_attempts: DEFAULT_WRITE_MAX_ATTEMPTS,
            write_backoff_base: DEFAULT_WRITE_BACKOFF_BASE,
            sync_writes: false,
        }
    }

    /// Set lock retry attempts and delay
    pub fn lock_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.lock_retry_attempts = attempts.max(1);
        self.lock_retry_delay = delay;
        self
    }

    /// Set the outer write retry schedule
    pub fn write_retry(mut self, max_attempts: u32, backoff_base: Duration) -> Self {
        self.write_max_attempts = max_attempts.max(1);
        self.write_backoff_base = backoff_base;
        self
    }

    /// Enable or disable fsync after writes
    pub fn sync_writes(mut self, enabled: bool) -> Self {
        self.sync_writes = enabled;
        self
    }

    /// Directory of event bodies
    pub fn events_dir(&self) -> PathBuf {
        self.base_dir.join("events")
    }

    /// Directory of the position log
    pub fn log_dir(&self) -> PathBuf {
        self.base_dir.join("log")
    }

    /// Position log file
    pub fn log_path(&self) -> PathBuf {
        self.log_dir().join("append.log")
    }

    /// Directory of posting lists
    pub fn index_dir(&self) -> PathBuf {
        self.base_dir.join("index")
    }

    /// Directory of lock marker files
    pub fn locks_dir(&self) -> PathBuf {
        self.base_dir.join("locks")
    }

    /// Backoff before acquisition number `attempt + 1` (1-based `attempt`)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.write_backoff_base.saturating_mul(1u32 << exponent)
    }

    /// Root directory
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new("event_store")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let config = StoreConfig::new("/tmp/kroniko");

        assert_eq!(config.events_dir(), PathBuf::from("/tmp/kroniko/events"));
        assert_eq!(config.log_path(), PathBuf::from("/tmp/kroniko/log/append.log"));
        assert_eq!(config.index_dir(), PathBuf::from("/tmp/kroniko/index"));
        assert_eq!(config.locks_dir(), PathBuf::from("/tmp/kroniko/locks"));
    }

    #[test]
    fn test_backoff_doubles() {
        let config = StoreConfig::default().write_retry(5, Duration::from_millis(20));

        assert_eq!(config.backoff_for(1), Duration::from_millis(20));
        assert_eq!(config.backoff_for(2), Duration::from_millis(40));
        assert_eq!(config.backoff_for(3), Duration::from_millis(80));
    }

    #[test]
    fn test_retry_counts_never_zero() {
        let config = StoreConfig::default()
            .lock_retry(0, Duration::ZERO)
            .write_retry(0, Duration::ZERO);

        assert_eq!(config.lock_retry_attempts, 1);
        assert_eq!(config.write_max_attempts, 1);
    }
}
