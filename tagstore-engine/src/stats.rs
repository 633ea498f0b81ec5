//! Engine statistics.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tagstore_storage::CacheStats;

use crate::batch::BatchMetricsSnapshot;

/// Façade operation counters.
#[derive(Debug, Default)]
pub struct OperationCounters {
    pub reads: AtomicU64,
    /// Reads answered from the cache without touching the pool
    pub cache_served: AtomicU64,
    pub failed_reads: AtomicU64,
    pub queued_writes: AtomicU64,
    pub immediate_writes: AtomicU64,
    /// Immediate writes that failed in persistence
    pub failed_writes: AtomicU64,
}

impl OperationCounters {
    pub fn snapshot(&self) -> OperationSnapshot {
        OperationSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            cache_served: self.cache_served.load(Ordering::Relaxed),
            failed_reads: self.failed_reads.load(Ordering::Relaxed),
            queued_writes: self.queued_writes.load(Ordering::Relaxed),
            immediate_writes: self.immediate_writes.load(Ordering::Relaxed),
            failed_writes: self.failed_writes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OperationSnapshot {
    pub reads: u64,
    pub cache_served: u64,
    pub failed_reads: u64,
    pub queued_writes: u64,
    pub immediate_writes: u64,
    pub failed_writes: u64,
}

/// Point-in-time view of the whole engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatistics {
    pub cache_enabled: bool,
    pub batching_enabled: bool,
    pub cache: CacheStats,
    pub batches: BatchMetricsSnapshot,
    pub operations: OperationSnapshot,
    /// Pending writes per queue
    pub queue_depths: BTreeMap<String, usize>,
}

impl EngineStatistics {
    pub fn pending_writes(&self) -> usize {
        self.queue_depths.values().sum()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for EngineStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cache_enabled {
            writeln!(f, "{}", self.cache)?;
        } else {
            writeln!(f, "cache: disabled")?;
        }

        let b = &self.batches;
        if self.batching_enabled {
            writeln!(
                f,
                "batches: {} committed, {} rolled back; items: {} committed, {} recovered, {} dropped",
                b.batches_committed,
                b.batches_rolled_back,
                b.items_committed,
                b.items_recovered,
                b.items_dropped
            )?;
        } else {
            writeln!(f, "batches: disabled")?;
        }

        let o = &self.operations;
        writeln!(
            f,
            "operations: {} reads ({} from cache, {} failed), {} queued writes, {} immediate writes ({} failed)",
            o.reads, o.cache_served, o.failed_reads, o.queued_writes, o.immediate_writes, o.failed_writes
        )?;

        let depths: Vec<String> = self
            .queue_depths
            .iter()
            .map(|(queue, depth)| format!("{}={}", queue, depth))
            .collect();
        write!(f, "queues: {}", depths.join(", "))
    }
}
