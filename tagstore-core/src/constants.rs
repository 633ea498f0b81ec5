//! Constants for tagstore
//!
//! Default values for the configuration surface. Centralizing them keeps the
//! config loaders, the builder and the tests in agreement.

// ============================================================================
// CACHE
// ============================================================================

/// Default time-to-live for cached entries in seconds (5 minutes)
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Longest accepted time-to-live in seconds (30 days)
pub const MAX_CACHE_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Whether the cache is enabled by default
pub const DEFAULT_CACHE_ENABLED: bool = true;

/// Whether hit/miss statistics are collected by default
pub const DEFAULT_CACHE_STATS_ENABLED: bool = false;

// ============================================================================
// BATCHING
// ============================================================================

/// Whether writes are batched by default
pub const DEFAULT_BATCH_ENABLED: bool = true;

/// Default number of queued writes drained into one batch
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Default interval between scheduled flushes in seconds
pub const DEFAULT_BATCH_INTERVAL_SECS: u64 = 5;

/// Longest accepted flush interval in seconds (1 hour)
pub const MAX_BATCH_INTERVAL_SECS: u64 = 60 * 60;

/// Whether crossing the batch size on enqueue triggers an immediate flush
pub const DEFAULT_BATCH_AUTO_FLUSH: bool = true;

// ============================================================================
// WORKERS
// ============================================================================

/// Default size of the worker pool serving reads and immediate writes
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Default bounded wait when stopping the worker pool, in seconds
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Longest accepted shutdown wait in seconds
pub const MAX_SHUTDOWN_TIMEOUT_SECS: u64 = 600;
