//! Daemon configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::error::{DaemonError, DaemonResult};
use kroniko_eventlog::config::{
    DEFAULT_LOCK_RETRY_ATTEMPTS, DEFAULT_LOCK_RETRY_DELAY, DEFAULT_WRITE_BACKOFF_BASE,
    DEFAULT_WRITE_MAX_ATTEMPTS,
};
use kroniko_eventlog::StoreConfig;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default maximum number of items in one cart
pub const DEFAULT_MAX_CART_ITEMS: usize = 3;

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Event store configuration
    pub store: StoreSettings,

    /// Cart rules
    pub cart: CartConfig,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Event store settings.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Root directory of the store
    pub data_dir: PathBuf,
    /// Non-blocking lock attempts per acquisition
    pub lock_retry_attempts: u32,
    /// Pause between lock attempts
    pub lock_retry_delay: Duration,
    /// Lock acquisitions per guarded write
    pub write_max_attempts: u32,
    /// First backoff between acquisitions
    pub write_backoff_base: Duration,
    /// fsync after every write
    pub sync_writes: bool,
}

/// Cart rules.
#[derive(Debug, Clone)]
pub struct CartConfig {
    /// Maximum number of items in one cart
    pub max_items: usize,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        Ok(Self {
            environment: Self::load_environment()?,
            api: Self::load_api_config()?,
            store: Self::load_store_settings()?,
            cart: CartConfig {
                max_items: load_env("KRONIKO_MAX_CART_ITEMS", DEFAULT_MAX_CART_ITEMS)?,
            },
        })
    }

    /// Create test configuration rooted at `data_dir`.
    pub fn test(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            store: StoreSettings {
                data_dir: data_dir.into(),
                ..StoreSettings::default()
            },
            cart: CartConfig {
                max_items: DEFAULT_MAX_CART_ITEMS,
            },
            environment: Environment::Test,
        }
    }

    /// Engine configuration derived from the store settings
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(&self.store.data_dir)
            .lock_retry(self.store.lock_retry_attempts, self.store.lock_retry_delay)
            .write_retry(self.store.write_max_attempts, self.store.write_backoff_base)
            .sync_writes(self.store.sync_writes)
    }

    fn load_environment() -> DaemonResult<Environment> {
        let env_str = env::var("KRONIKO_ENV").unwrap_or_else(|_| "development".to_string());
        env_str.parse()
    }

    fn load_api_config() -> DaemonResult<ApiConfig> {
        let host = env::var("KRONIKO_API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = load_env("KRONIKO_API_PORT", 8080u16)?;

        Ok(ApiConfig { host, port })
    }

    fn load_store_settings() -> DaemonResult<StoreSettings> {
        let defaults = StoreSettings::default();

        let data_dir = env::var("KRONIKO_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let lock_retry_delay_ms = load_env(
            "KRONIKO_LOCK_RETRY_DELAY_MS",
            defaults.lock_retry_delay.as_millis() as u64,
        )?;
        let write_backoff_ms = load_env(
            "KRONIKO_WRITE_BACKOFF_MS",
            defaults.write_backoff_base.as_millis() as u64,
        )?;

        Ok(StoreSettings {
            data_dir,
            lock_retry_attempts: load_env(
                "KRONIKO_LOCK_RETRY_ATTEMPTS",
                defaults.lock_retry_attempts,
            )?,
            lock_retry_delay: Duration::from_millis(lock_retry_delay_ms),
            write_max_attempts: load_env("KRONIKO_WRITE_MAX_ATTEMPTS", defaults.write_max_attempts)?,
            write_backoff_base: Duration::from_millis(write_backoff_ms),
            sync_writes: load_env("KRONIKO_SYNC_WRITES", defaults.sync_writes)?,
        })
    }
}

/// Parse `key` from the environment, falling back to `default` when unset
fn load_env<T: FromStr>(key: &str, default: T) -> DaemonResult<T> {
    match env::var(key) {
        Ok(val) => val
            .trim()
            .parse()
            .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
        Err(_) => Ok(default),
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("event_store"),
            lock_retry_attempts: DEFAULT_LOCK_RETRY_ATTEMPTS,
            lock_retry_delay: DEFAULT_LOCK_RETRY_DELAY,
            write_max_attempts: DEFAULT_WRITE_MAX_ATTEMPTS,
            write_backoff_base: DEFAULT_WRITE_BACKOFF_BASE,
            sync_writes: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            store: StoreSettings::default(),
            cart: CartConfig {
                max_items: DEFAULT_MAX_CART_ITEMS,
            },
            environment: Environment::Development,
        }
    }
}

impl FromStr for Environment {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid KRONIKO_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.api.port, 8080);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.cart.max_items, 3);
        assert_eq!(config.store.data_dir, PathBuf::from("event_store"));
    }

    #[test]
    fn test_test_config() {
        let config = Config::test("/tmp/kroniko");

        assert_eq!(config.api.port, 0);
        assert_eq!(config.environment, Environment::Test);
        assert_eq!(config.store.data_dir, PathBuf::from("/tmp/kroniko"));
    }

    #[test]
    fn test_store_config_mapping() {
        let mut config = Config::test("/tmp/kroniko");
        config.store.lock_retry_attempts = 4;
        config.store.write_backoff_base = Duration::from_millis(50);
        config.store.sync_writes = true;

        let store = config.store_config();
        assert_eq!(store.base_dir, PathBuf::from("/tmp/kroniko"));
        assert_eq!(store.lock_retry_attempts, 4);
        assert_eq!(store.write_backoff_base, Duration::from_millis(50));
        assert!(store.sync_writes);
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("test".parse::<Environment>().unwrap(), Environment::Test);
        assert!(matches!(
            "staging".parse::<Environment>(),
            Err(DaemonError::Config(_))
        ));
    }

    #[test]
    fn test_load_env_rejects_invalid_values() {
        env::set_var("KRONIKO_TEST_CONFIG_PORT", "not-a-port");
        let result = load_env("KRONIKO_TEST_CONFIG_PORT", 8080u16);
        assert!(matches!(result, Err(DaemonError::Config(_))));

        env::set_var("KRONIKO_TEST_CONFIG_PORT", " 9090 ");
        assert_eq!(load_env("KRONIKO_TEST_CONFIG_PORT", 8080u16).unwrap(), 9090);
        env::remove_var("KRONIKO_TEST_CONFIG_PORT");

        assert_eq!(load_env("KRONIKO_TEST_CONFIG_UNSET", 7u32).unwrap(), 7);
    }
}
