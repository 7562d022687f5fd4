//! Service configuration.

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use stock_ledger_core::Thresholds;
use stock_ledger_store::{StoreOptions, WritePolicy};

use crate::ledger::RetryPolicy;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/stock-ledger").
    pub data_dir: String,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// How long a writer waits for a balance row lock, in milliseconds.
    pub lock_timeout_ms: u64,

    /// Retries after a lock conflict before the writer gives up.
    pub write_max_retries: u32,

    /// Initial backoff between write retries (doubles with each attempt).
    pub write_initial_backoff_ms: u64,

    /// Maximum backoff between write retries.
    pub write_max_backoff_ms: u64,

    /// Age after which a `processing` idempotency record may be reclaimed.
    pub idempotency_stale_after_seconds: u64,

    /// How long finalized idempotency records are kept.
    pub idempotency_retention_hours: u64,

    /// Absolute variance treated as noise by reconciliation.
    pub reconciliation_absolute_threshold: Decimal,

    /// Relative variance (percent) treated as noise by reconciliation.
    pub reconciliation_relative_threshold_percent: Decimal,

    /// Whether outbound movements may take a balance below zero.
    pub allow_negative_stock: bool,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_or("MAX_BODY_BYTES", defaults.max_body_bytes),
            request_timeout_seconds: env_or(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
            lock_timeout_ms: env_or("LOCK_TIMEOUT_MS", defaults.lock_timeout_ms),
            write_max_retries: env_or("WRITE_MAX_RETRIES", defaults.write_max_retries),
            write_initial_backoff_ms: env_or(
                "WRITE_INITIAL_BACKOFF_MS",
                defaults.write_initial_backoff_ms,
            ),
            write_max_backoff_ms: env_or("WRITE_MAX_BACKOFF_MS", defaults.write_max_backoff_ms),
            idempotency_stale_after_seconds: env_or(
                "IDEMPOTENCY_STALE_AFTER_SECONDS",
                defaults.idempotency_stale_after_seconds,
            ),
            idempotency_retention_hours: env_or(
                "IDEMPOTENCY_RETENTION_HOURS",
                defaults.idempotency_retention_hours,
            ),
            reconciliation_absolute_threshold: env_or(
                "RECONCILIATION_ABSOLUTE_THRESHOLD",
                defaults.reconciliation_absolute_threshold,
            ),
            reconciliation_relative_threshold_percent: env_or(
                "RECONCILIATION_RELATIVE_THRESHOLD_PERCENT",
                defaults.reconciliation_relative_threshold_percent,
            ),
            allow_negative_stock: env_or("ALLOW_NEGATIVE_STOCK", defaults.allow_negative_stock),
        }
    }

    /// Options for opening the store.
    #[must_use]
    pub const fn store_options(&self) -> StoreOptions {
        StoreOptions {
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
        }
    }

    /// Rules the ledger writer enforces.
    #[must_use]
    pub const fn write_policy(&self) -> WritePolicy {
        WritePolicy {
            allow_negative_stock: self.allow_negative_stock,
        }
    }

    /// Retry schedule for lock conflicts.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.write_max_retries,
            initial_backoff: Duration::from_millis(self.write_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.write_max_backoff_ms),
        }
    }

    /// Age after which an in-flight request is treated as crashed.
    #[must_use]
    pub fn idempotency_stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(
            i64::try_from(self.idempotency_stale_after_seconds).unwrap_or(i64::MAX / 1000),
        )
    }

    /// How long finalized idempotency records are kept.
    #[must_use]
    pub fn idempotency_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(
            i64::try_from(self.idempotency_retention_hours).unwrap_or(i64::MAX / 3_600_000),
        )
    }

    /// Reconciliation thresholds.
    #[must_use]
    pub const fn thresholds(&self) -> Thresholds {
        Thresholds {
            absolute: self.reconciliation_absolute_threshold,
            relative_percent: self.reconciliation_relative_threshold_percent,
        }
    }
}

/// Parse an environment variable, falling back on absence or parse failure.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(name, value = %raw, "Ignoring unparseable configuration value");
            default
        }),
        Err(_) => default,
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let thresholds = Thresholds::default();
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/stock-ledger".into(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            lock_timeout_ms: 10_000,
            write_max_retries: 5,
            write_initial_backoff_ms: 20,
            write_max_backoff_ms: 1000,
            idempotency_stale_after_seconds: 120,
            idempotency_retention_hours: 72,
            reconciliation_absolute_threshold: thresholds.absolute,
            reconciliation_relative_threshold_percent: thresholds.relative_percent,
            allow_negative_stock: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_permissive_and_bounded() {
        let config = ServiceConfig::default();
        assert!(config.write_policy().allow_negative_stock);
        assert_eq!(config.store_options().lock_timeout, Duration::from_secs(10));
        assert_eq!(config.retry_policy().max_retries, 5);
        assert_eq!(config.idempotency_stale_after(), chrono::Duration::seconds(120));
        assert_eq!(config.thresholds(), Thresholds::default());
    }

    #[test]
    fn env_or_falls_back_on_garbage() {
        std::env::set_var("STOCK_LEDGER_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_or("STOCK_LEDGER_TEST_GARBAGE", 7u32), 7);
        std::env::set_var("STOCK_LEDGER_TEST_NUMBER", " 12 ");
        assert_eq!(env_or("STOCK_LEDGER_TEST_NUMBER", 7u32), 12);
        assert!(!env_or("STOCK_LEDGER_TEST_MISSING_BOOL", false));
    }
}
