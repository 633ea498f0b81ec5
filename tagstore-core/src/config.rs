//! Configuration types
//!
//! The configuration is loaded by the embedding host (TOML file or
//! environment) and handed to the engine builder. The engine itself never
//! reads files.

use crate::constants::*;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub stats_enabled: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: DEFAULT_CACHE_ENABLED,
            ttl_seconds: DEFAULT_CACHE_TTL_SECS,
            stats_enabled: DEFAULT_CACHE_STATS_ENABLED,
        }
    }
}

impl CacheSettings {
    /// Default time-to-live as a `Duration`.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Write batching settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub enabled: bool,
    pub size: usize,
    pub interval_seconds: u64,
    pub auto_flush: bool,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            enabled: DEFAULT_BATCH_ENABLED,
            size: DEFAULT_BATCH_SIZE,
            interval_seconds: DEFAULT_BATCH_INTERVAL_SECS,
            auto_flush: DEFAULT_BATCH_AUTO_FLUSH,
        }
    }
}

impl BatchSettings {
    /// Interval between scheduled flushes as a `Duration`.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub threads: usize,
    pub shutdown_timeout_seconds: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            threads: DEFAULT_WORKER_THREADS,
            shutdown_timeout_seconds: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

impl WorkerSettings {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagstoreConfig {
    pub cache: CacheSettings,
    pub batching: BatchSettings,
    pub workers: WorkerSettings,
}

impl TagstoreConfig {
    /// Parse a TOML document with optional `[cache]`, `[batching]` and
    /// `[workers]` sections. Missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Create a configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `TAGSTORE_CACHE_ENABLED`: Enable the read cache (default: true)
    /// - `TAGSTORE_CACHE_TTL_SECS`: Entry time-to-live (default: 300)
    /// - `TAGSTORE_CACHE_STATS_ENABLED`: Collect hit/miss statistics (default: false)
    /// - `TAGSTORE_BATCH_ENABLED`: Queue writes for batched commits (default: true)
    /// - `TAGSTORE_BATCH_SIZE`: Writes per batch (default: 50)
    /// - `TAGSTORE_BATCH_INTERVAL_SECS`: Scheduled flush interval (default: 5)
    /// - `TAGSTORE_BATCH_AUTO_FLUSH`: Flush as soon as a queue fills a batch (default: true)
    /// - `TAGSTORE_WORKER_THREADS`: Worker pool size (default: 4)
    /// - `TAGSTORE_SHUTDOWN_TIMEOUT_SECS`: Bounded wait on shutdown (default: 10)
    ///
    /// Unparsable values fall back to their defaults.
    pub fn from_env() -> Self {
        Self {
            cache: CacheSettings {
                enabled: env_flag("TAGSTORE_CACHE_ENABLED", DEFAULT_CACHE_ENABLED),
                ttl_seconds: env_parse("TAGSTORE_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS),
                stats_enabled: env_flag(
                    "TAGSTORE_CACHE_STATS_ENABLED",
                    DEFAULT_CACHE_STATS_ENABLED,
                ),
            },
            batching: BatchSettings {
                enabled: env_flag("TAGSTORE_BATCH_ENABLED", DEFAULT_BATCH_ENABLED),
                size: env_parse("TAGSTORE_BATCH_SIZE", DEFAULT_BATCH_SIZE),
                interval_seconds: env_parse(
                    "TAGSTORE_BATCH_INTERVAL_SECS",
                    DEFAULT_BATCH_INTERVAL_SECS,
                ),
                auto_flush: env_flag("TAGSTORE_BATCH_AUTO_FLUSH", DEFAULT_BATCH_AUTO_FLUSH),
            },
            workers: WorkerSettings {
                threads: env_parse("TAGSTORE_WORKER_THREADS", DEFAULT_WORKER_THREADS),
                shutdown_timeout_seconds: env_parse(
                    "TAGSTORE_SHUTDOWN_TIMEOUT_SECS",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                ),
            },
        }
    }

    /// Check value ranges. Settings of a disabled feature are not checked.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.enabled {
            check_range("cache.ttl_seconds", self.cache.ttl_seconds, MAX_CACHE_TTL_SECS)?;
        }
        if self.batching.enabled {
            if self.batching.size == 0 {
                return Err(invalid("batching.size", "0", "must be positive"));
            }
            check_range(
                "batching.interval_seconds",
                self.batching.interval_seconds,
                MAX_BATCH_INTERVAL_SECS,
            )?;
        }
        if self.workers.threads == 0 {
            return Err(invalid("workers.threads", "0", "must be positive"));
        }
        if self.workers.shutdown_timeout_seconds > MAX_SHUTDOWN_TIMEOUT_SECS {
            return Err(invalid(
                "workers.shutdown_timeout_seconds",
                &self.workers.shutdown_timeout_seconds.to_string(),
                &format!("must be at most {}", MAX_SHUTDOWN_TIMEOUT_SECS),
            ));
        }
        Ok(())
    }

    /// Configuration with both cache and batching switched off: every read
    /// and write passes straight through to persistence.
    pub fn pass_through() -> Self {
        Self {
            cache: CacheSettings {
                enabled: false,
                ..Default::default()
            },
            batching: BatchSettings {
                enabled: false,
                ..Default::default()
            },
            workers: WorkerSettings::default(),
        }
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Seconds must lie in `1..=max`.
fn check_range(field: &str, seconds: u64, max: u64) -> Result<(), ConfigError> {
    if seconds == 0 {
        return Err(invalid(field, "0", "must be positive"));
    }
    if seconds > max {
        return Err(invalid(
            field,
            &seconds.to_string(),
            &format!("must be at most {}", max),
        ));
    }
    Ok(())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = TagstoreConfig::default();
        assert!(config.cache.enabled);
        assert_eq!(config.cache.ttl(), Duration::from_secs(DEFAULT_CACHE_TTL_SECS));
        assert!(!config.cache.stats_enabled);
        assert!(config.batching.enabled);
        assert_eq!(config.batching.size, DEFAULT_BATCH_SIZE);
        assert_eq!(
            config.batching.interval(),
            Duration::from_secs(DEFAULT_BATCH_INTERVAL_SECS)
        );
        assert!(config.batching.auto_flush);
        assert_eq!(config.workers.threads, DEFAULT_WORKER_THREADS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml_partial() {
        let config = TagstoreConfig::from_toml_str(
            r#"
            [cache]
            ttl_seconds = 60
            stats_enabled = true

            [batching]
            size = 2
            "#,
        )
        .unwrap();

        assert!(config.cache.enabled);
        assert_eq!(config.cache.ttl_seconds, 60);
        assert!(config.cache.stats_enabled);
        assert_eq!(config.batching.size, 2);
        assert_eq!(config.batching.interval_seconds, DEFAULT_BATCH_INTERVAL_SECS);
        assert_eq!(config.workers, WorkerSettings::default());
    }

    #[test]
    fn test_config_from_toml_rejects_garbage() {
        let err = TagstoreConfig::from_toml_str("[cache\nttl_seconds = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_config_validate_zero_batch_size() {
        let mut config = TagstoreConfig::default();
        config.batching.size = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "batching.size"));

        // Disabled batching is not checked
        config.batching.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validate_zero_ttl() {
        let mut config = TagstoreConfig::default();
        config.cache.ttl_seconds = 0;
        assert!(config.validate().is_err());
        config.cache.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validate_upper_bounds() {
        let mut config = TagstoreConfig::default();
        config.cache.ttl_seconds = u64::MAX;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "cache.ttl_seconds"));
        config.cache.ttl_seconds = MAX_CACHE_TTL_SECS;
        assert!(config.validate().is_ok());

        config.batching.interval_seconds = MAX_BATCH_INTERVAL_SECS + 1;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "batching.interval_seconds"));
        config.batching.interval_seconds = DEFAULT_BATCH_INTERVAL_SECS;

        config.workers.shutdown_timeout_seconds = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_zero_workers() {
        let mut config = TagstoreConfig::default();
        config.workers.threads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_pass_through() {
        let config = TagstoreConfig::pass_through();
        assert!(!config.cache.enabled);
        assert!(!config.batching.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Without environment variables set, should use defaults
        let config = TagstoreConfig::from_env();
        assert_eq!(config.cache.ttl_seconds, DEFAULT_CACHE_TTL_SECS);
        assert_eq!(config.batching.size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.workers.threads, DEFAULT_WORKER_THREADS);
    }
}
