//! Concurrent TTL cache service.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tagstore_core::{owner_of, CacheSettings, TagResult};
use tracing::{debug, info};

use super::entry::CacheEntry;
use super::key::{CacheCategory, CacheKey};
use super::value::{Cacheable, CachedValue};

/// Configuration for the cache service.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// When false every read goes to the loader and nothing is stored.
    pub enabled: bool,
    /// TTL applied when a caller does not pass one.
    pub default_ttl: Duration,
    /// Whether hit/miss/load statistics are collected.
    pub stats_enabled: bool,
    /// How often the expired-entry sweep runs.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::from_settings(&CacheSettings::default())
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the loaded configuration. The sweep runs every half TTL.
    pub fn from_settings(settings: &CacheSettings) -> Self {
        let default_ttl = settings.ttl();
        Self {
            enabled: settings.enabled,
            default_ttl,
            stats_enabled: settings.stats_enabled,
            sweep_interval: half_of(default_ttl),
        }
    }

    /// Enable or disable caching.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the default TTL; the sweep interval follows at half of it.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self.sweep_interval = half_of(ttl);
        self
    }

    /// Enable or disable statistics.
    pub fn with_stats(mut self, enabled: bool) -> Self {
        self.stats_enabled = enabled;
        self
    }
}

fn half_of(ttl: Duration) -> Duration {
    (ttl / 2).max(Duration::from_millis(1))
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Whether statistics were being collected.
    pub collected: bool,
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of loader invocations.
    pub loads: u64,
    /// Cumulative time spent in loaders.
    pub load_time: Duration,
    /// Number of live and not-yet-swept entries.
    pub entries: u64,
    /// Entries removed by the expiry sweep.
    pub expired_swept: u64,
    /// Entries removed by invalidation.
    pub invalidated: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Mean loader latency.
    pub fn average_load_time(&self) -> Duration {
        if self.loads == 0 {
            Duration::ZERO
        } else {
            self.load_time / self.loads as u32
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cache: {} entries", self.entries)?;
        if self.collected {
            write!(
                f,
                ", {} hits / {} misses ({:.1}% hit rate), {} loads averaging {:.2}ms",
                self.hits,
                self.misses,
                self.hit_rate() * 100.0,
                self.loads,
                self.average_load_time().as_secs_f64() * 1000.0
            )?;
        } else {
            write!(f, ", statistics disabled")?;
        }
        write!(
            f,
            ", {} invalidated, {} expired",
            self.invalidated, self.expired_swept
        )
    }
}

/// Concurrent key to entry store with get-or-load semantics.
///
/// The map is the only shared mutable state; entries are immutable and are
/// inserted, replaced or removed whole.
///
/// Every invalidation advances a generation counter. A load that overlaps an
/// invalidation does not keep its result in the map.
#[derive(Debug)]
pub struct CacheService {
    entries: DashMap<CacheKey, CacheEntry<CachedValue>>,
    config: CacheConfig,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_nanos: AtomicU64,
    expired_swept: AtomicU64,
    invalidated: AtomicU64,
}

impl Default for CacheService {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl CacheService {
    /// Create a new cache service.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            load_nanos: AtomicU64::new(0),
            expired_swept: AtomicU64::new(0),
            invalidated: AtomicU64::new(0),
        }
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if a live entry exists for `key`. Does not touch statistics.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries
            .get(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false)
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Cache-only lookup. Never invokes a loader.
    pub fn get<T: Cacheable>(&self, key: &CacheKey) -> Option<T> {
        if !self.config.enabled {
            return None;
        }

        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                if let Some(value) = T::from_cached(entry.value().value()) {
                    self.record(&self.hits, 1);
                    debug!(key = %key, "Cache hit");
                    return Some(value);
                }
            } else {
                drop(entry);
                // A fresh replacement may have landed since the check
                self.entries.remove_if(key, |_, e| e.is_expired());
            }
        }

        self.record(&self.misses, 1);
        debug!(key = %key, "Cache miss");
        None
    }

    /// Return the live cached value, or call `loader`, store a non-empty
    /// result for `ttl` (default TTL when `None`) and return it.
    ///
    /// A loader error propagates and nothing is cached.
    pub fn get_or_load<T, F>(&self, key: CacheKey, loader: F, ttl: Option<Duration>) -> TagResult<Option<T>>
    where
        T: Cacheable,
        F: FnOnce() -> TagResult<Option<T>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(Some(value));
        }
        self.load_into(key, loader, ttl)
    }

    /// Run `loader` and store its result without a lookup first. This is the
    /// store half of [`get_or_load`](Self::get_or_load), for callers that
    /// already observed the miss.
    ///
    /// If any invalidation runs while the loader is in flight the result is
    /// returned but not kept, since it may predate the write that caused it.
    pub fn load_into<T, F>(&self, key: CacheKey, loader: F, ttl: Option<Duration>) -> TagResult<Option<T>>
    where
        T: Cacheable,
        F: FnOnce() -> TagResult<Option<T>>,
    {
        let generation = self.generation.load(Ordering::SeqCst);
        let started = Instant::now();
        let loaded = loader();
        self.record(&self.loads, 1);
        self.record(&self.load_nanos, started.elapsed().as_nanos() as u64);

        let loaded = loaded?;
        if let Some(value) = &loaded {
            if self.generation.load(Ordering::SeqCst) != generation {
                debug!(key = %key, "Load overlapped an invalidation, not cached");
                return Ok(loaded);
            }
            self.put(key.clone(), value.clone(), ttl);
            // An invalidation between the check and the insert may have
            // missed the new entry
            if self.generation.load(Ordering::SeqCst) != generation {
                self.entries.remove(&key);
            }
        }
        Ok(loaded)
    }

    /// Store a value, replacing any previous entry.
    pub fn put<T: Cacheable>(&self, key: CacheKey, value: T, ttl: Option<Duration>) {
        if !self.config.enabled {
            return;
        }
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "Cache set");
        self.entries
            .insert(key, CacheEntry::new(value.into_cached(), ttl));
    }

    // ========================================================================
    // INVALIDATION
    // ========================================================================

    /// Remove one entry.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.advance_generation();
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.invalidated.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove every entry that could observe the tag `name`: its display and
    /// whole-tag entries, any display-to-name entry pointing at it, every
    /// filtered list, and the owner's count when the name encodes an owner.
    pub fn invalidate_tag(&self, name: &str) -> usize {
        self.advance_generation();
        let mut removed = 0usize;

        if let Some((_, entry)) = self.entries.remove(&CacheKey::tag_display(name)) {
            removed += 1;
            if let CachedValue::Text(display) = entry.value() {
                removed += self.entries.remove(&CacheKey::tag_name(display)).is_some() as usize;
            }
        }
        if let Some((_, entry)) = self.entries.remove(&CacheKey::tag(name)) {
            removed += 1;
            if let CachedValue::Tag(tag) = entry.value() {
                removed += self.entries.remove(&CacheKey::tag_name(&tag.display)).is_some() as usize;
            }
        }

        // Lists, and reverse entries whose display we could not learn above
        self.entries.retain(|key, entry| {
            let stale = match key.category() {
                CacheCategory::TagList => true,
                CacheCategory::TagName => {
                    matches!(entry.value(), CachedValue::Text(cached) if cached == name)
                }
                _ => false,
            };
            if stale {
                removed += 1;
            }
            !stale
        });

        if let Some(owner) = owner_of(name) {
            removed += self.entries.remove(&CacheKey::owner_count(owner)).is_some() as usize;
        }

        self.invalidated.fetch_add(removed as u64, Ordering::Relaxed);
        debug!(tag = name, removed, "Invalidated tag cache entries");
        removed
    }

    /// Remove the cached request list.
    pub fn invalidate_requests(&self) -> bool {
        self.invalidate(&CacheKey::request_list())
    }

    /// Remove every entry.
    pub fn invalidate_all(&self) -> usize {
        self.advance_generation();
        let count = self.entries.len();
        self.entries.clear();
        self.invalidated.fetch_add(count as u64, Ordering::Relaxed);
        info!(count, "Cache cleared");
        count
    }

    /// Bumped before any entry is removed, so a load that stores after the
    /// removal still sees the change.
    fn advance_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Remove expired entries.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0usize;
        self.entries.retain(|_, entry| {
            let expired = entry.is_expired_at(now);
            if expired {
                removed += 1;
            }
            !expired
        });

        if removed > 0 {
            self.expired_swept
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(count = removed, "Swept expired cache entries");
        }
        removed
    }

    // ========================================================================
    // STATISTICS
    // ========================================================================

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            collected: self.config.stats_enabled,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_time: Duration::from_nanos(self.load_nanos.load(Ordering::Relaxed)),
            entries: self.entries.len() as u64,
            expired_swept: self.expired_swept.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
        }
    }

    /// Human-readable statistics summary.
    pub fn summary(&self) -> String {
        self.stats().to_string()
    }

    fn record(&self, counter: &AtomicU64, amount: u64) {
        if self.config.stats_enabled {
            counter.fetch_add(amount, Ordering::Relaxed);
        }
    }
}
