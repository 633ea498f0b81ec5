//! Explicit wiring of the engine's components.

use std::sync::Arc;
use std::time::Duration;

use tagstore_core::{ConfigError, TagResult, TagstoreConfig};
use tagstore_storage::{CacheConfig, CacheService, Persistence};

use crate::batch::BatchProcessor;
use crate::engine::TagEngine;
use crate::host::{Host, TokioHost};
use crate::pool::WorkerPool;
use crate::queue::WriteQueues;

/// Assembles a [`TagEngine`] once at startup.
///
/// # Example
///
/// ```ignore
/// let engine = EngineBuilder::new()
///     .with_config(TagstoreConfig::from_env())
///     .with_storage(Arc::new(MockStorage::new()))
///     .build()?;
/// ```
#[derive(Default)]
pub struct EngineBuilder {
    config: TagstoreConfig,
    storage: Option<Arc<dyn Persistence>>,
    host: Option<Arc<dyn Host>>,
    cache_config: Option<CacheConfig>,
    flush_interval: Option<Duration>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: TagstoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Persistence backend. Required.
    pub fn with_storage(mut self, storage: Arc<dyn Persistence>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Scheduling and callback host. Defaults to a new [`TokioHost`].
    pub fn with_host(mut self, host: Arc<dyn Host>) -> Self {
        self.host = Some(host);
        self
    }

    /// Override the cache configuration derived from `config.cache`, e.g. for
    /// sub-second TTLs.
    pub fn with_cache_config(mut self, cache_config: CacheConfig) -> Self {
        self.cache_config = Some(cache_config);
        self
    }

    /// Override `batching.interval_seconds` with a finer interval.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    /// Validate the configuration, wire every component and start the
    /// periodic flush and sweep.
    pub fn build(self) -> TagResult<TagEngine> {
        self.config.validate()?;

        let storage = self.storage.ok_or_else(|| ConfigError::MissingRequired {
            field: "storage".to_string(),
        })?;
        let host: Arc<dyn Host> = match self.host {
            Some(host) => host,
            None => Arc::new(TokioHost::new()?),
        };

        let cache_config = self
            .cache_config
            .unwrap_or_else(|| CacheConfig::from_settings(&self.config.cache));
        let cache = Arc::new(CacheService::new(cache_config));

        let batching = &self.config.batching;
        let queues = Arc::new(WriteQueues::new(batching.size));
        let processor = Arc::new(BatchProcessor::new(
            Arc::clone(&storage),
            Arc::clone(&cache),
            Arc::clone(&host),
            Arc::clone(&queues),
            batching.size,
        ));
        let pool = WorkerPool::new(self.config.workers.threads)?;

        let mut scheduled = Vec::new();
        if batching.enabled {
            let interval = self.flush_interval.unwrap_or_else(|| batching.interval());
            let flusher = Arc::clone(&processor);
            scheduled.push(host.schedule_repeating(
                "batch-flush",
                interval,
                Arc::new(move || {
                    flusher.run_cycle();
                }),
            ));
        }
        if cache.is_enabled() {
            let sweeper = Arc::clone(&cache);
            scheduled.push(host.schedule_repeating(
                "cache-sweep",
                cache.config().sweep_interval,
                Arc::new(move || {
                    sweeper.sweep_expired();
                }),
            ));
        }

        tracing::info!(
            cache_enabled = cache.is_enabled(),
            cache_ttl_secs = cache.default_ttl().as_secs(),
            batching_enabled = batching.enabled,
            batch_size = batching.size,
            auto_flush = batching.auto_flush,
            worker_threads = pool.threads(),
            "Tag engine started"
        );

        Ok(TagEngine::from_parts(
            self.config,
            storage,
            cache,
            host,
            pool,
            queues,
            processor,
            scheduled,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagstore_core::TagstoreError;
    use tagstore_storage::MockStorage;

    #[test]
    fn test_build_requires_storage() {
        let err = EngineBuilder::new().build().unwrap_err();
        assert_eq!(
            err,
            TagstoreError::Config(ConfigError::MissingRequired {
                field: "storage".to_string()
            })
        );
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = TagstoreConfig::default();
        config.batching.size = 0;
        let err = EngineBuilder::new()
            .with_config(config)
            .with_storage(Arc::new(MockStorage::new()))
            .build()
            .unwrap_err();
        assert!(matches!(err, TagstoreError::Config(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_build_with_default_host() {
        let engine = EngineBuilder::new()
            .with_storage(Arc::new(MockStorage::new()))
            .build()
            .unwrap();
        assert!(engine.cache().is_enabled());
        assert_eq!(engine.processor().batch_size(), 50);
        engine.shutdown();
    }

    #[test]
    fn test_cache_config_override() {
        let engine = EngineBuilder::new()
            .with_storage(Arc::new(MockStorage::new()))
            .with_cache_config(CacheConfig::new().with_ttl(Duration::from_millis(50)))
            .build()
            .unwrap();
        assert_eq!(engine.cache().default_ttl(), Duration::from_millis(50));
        engine.shutdown();
    }
}
