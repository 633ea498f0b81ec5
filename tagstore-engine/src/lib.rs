//! tagstore Engine - Cached Reads and Batched Writes
//!
//! The performance layer between application code and a [`Persistence`]
//! backend for tags and tag requests:
//!
//! - Reads go through a TTL cache; misses load on a worker pool.
//! - Writes are queued per operation kind and committed in batches, one
//!   transaction per batch, with per-item retry when a batch rolls back.
//! - Completion callbacks are delivered through the host's callback context.
//!
//! Everything is wired explicitly by [`EngineBuilder`].
//!
//! [`Persistence`]: tagstore_storage::Persistence

pub mod batch;
pub mod builder;
pub mod engine;
pub mod host;
pub mod pool;
pub mod queue;
pub mod stats;
pub mod telemetry;

pub use batch::{BatchMetrics, BatchMetricsSnapshot, BatchProcessor, BatchState, FlushReport};
pub use builder::EngineBuilder;
pub use engine::{completion, TagEngine};
pub use host::{Host, RepeatingTask, ScheduledTask, Task, TokioHost};
pub use pool::{PoolFuture, WorkerPool};
pub use queue::{OperationKind, QueueItem, QueuedWrite, WriteCallback, WriteQueues};
pub use stats::{EngineStatistics, OperationCounters, OperationSnapshot};
pub use telemetry::{init_tracing, init_tracing_with, LogFormat};
