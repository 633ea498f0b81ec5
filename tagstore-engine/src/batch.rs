//! Batch processing: drain a queue, commit it as one transaction, invalidate.
//!
//! A flush of one queue moves through [`BatchState`]s:
//!
//! ```text
//! Idle -> Draining -> Committing -> Committed  -> Idle
//!                               \-> RolledBack -> Idle
//! ```
//!
//! A rolled-back batch is retried one item at a time, each in its own
//! transaction. Items that still fail are logged and dropped; their callbacks
//! receive the error.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tagstore_core::TagResult;
use tagstore_storage::{CacheService, Persistence, WriteStatement};

use crate::host::{lock, Host};
use crate::queue::{OperationKind, QueuedWrite, WriteCallback, WriteQueues};

// ============================================================================
// STATE
// ============================================================================

/// Lifecycle of one queue's current flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Idle,
    Draining,
    Committing,
    Committed,
    RolledBack,
}

impl BatchState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Draining,
            2 => Self::Committing,
            3 => Self::Committed,
            4 => Self::RolledBack,
            _ => Self::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Draining => 1,
            Self::Committing => 2,
            Self::Committed => 3,
            Self::RolledBack => 4,
        }
    }
}

// ============================================================================
// REPORTS & METRICS
// ============================================================================

/// Outcome of one or more flushes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Non-empty batches drained
    pub batches: u64,
    /// Items committed as part of a batch transaction
    pub committed: u64,
    /// Items committed individually after their batch rolled back
    pub retried: u64,
    /// Items dropped after failing their individual retry
    pub failed: u64,
}

impl FlushReport {
    pub fn merge(&mut self, other: FlushReport) {
        self.batches += other.batches;
        self.committed += other.committed;
        self.retried += other.retried;
        self.failed += other.failed;
    }

    /// Items that left a queue.
    pub fn processed(&self) -> u64 {
        self.committed + self.retried + self.failed
    }

    pub fn is_empty(&self) -> bool {
        self.batches == 0
    }
}

/// Counters for batch processing since startup.
#[derive(Debug, Default)]
pub struct BatchMetrics {
    pub batches_committed: AtomicU64,
    pub batches_rolled_back: AtomicU64,
    pub items_committed: AtomicU64,
    /// Items that succeeded on individual retry
    pub items_recovered: AtomicU64,
    pub items_dropped: AtomicU64,
    /// Scheduled drain-and-commit cycles
    pub flush_cycles: AtomicU64,
}

impl BatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> BatchMetricsSnapshot {
        BatchMetricsSnapshot {
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            batches_rolled_back: self.batches_rolled_back.load(Ordering::Relaxed),
            items_committed: self.items_committed.load(Ordering::Relaxed),
            items_recovered: self.items_recovered.load(Ordering::Relaxed),
            items_dropped: self.items_dropped.load(Ordering::Relaxed),
            flush_cycles: self.flush_cycles.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of batch metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchMetricsSnapshot {
    pub batches_committed: u64,
    pub batches_rolled_back: u64,
    pub items_committed: u64,
    pub items_recovered: u64,
    pub items_dropped: u64,
    pub flush_cycles: u64,
}

// ============================================================================
// PROCESSOR
// ============================================================================

/// Remove every cache entry a committed statement could have made stale.
pub(crate) fn invalidate_for(cache: &CacheService, statement: &WriteStatement) {
    if let Some(name) = statement.touched_tag() {
        cache.invalidate_tag(name);
    }
    if statement.touches_requests() {
        cache.invalidate_requests();
    }
}

/// Drains write queues into persistence transactions.
pub struct BatchProcessor {
    storage: Arc<dyn Persistence>,
    cache: Arc<CacheService>,
    host: Arc<dyn Host>,
    queues: Arc<WriteQueues>,
    batch_size: usize,
    guards: [Mutex<()>; 5],
    states: [AtomicU8; 5],
    metrics: BatchMetrics,
}

impl BatchProcessor {
    pub fn new(
        storage: Arc<dyn Persistence>,
        cache: Arc<CacheService>,
        host: Arc<dyn Host>,
        queues: Arc<WriteQueues>,
        batch_size: usize,
    ) -> Self {
        Self {
            storage,
            cache,
            host,
            queues,
            batch_size: batch_size.max(1),
            guards: std::array::from_fn(|_| Mutex::new(())),
            states: std::array::from_fn(|_| AtomicU8::new(BatchState::Idle.as_u8())),
            metrics: BatchMetrics::new(),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn queues(&self) -> &WriteQueues {
        &self.queues
    }

    pub fn state(&self, kind: OperationKind) -> BatchState {
        BatchState::from_u8(self.states[kind.index()].load(Ordering::SeqCst))
    }

    pub fn metrics(&self) -> BatchMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Drain and commit at most one batch of `kind`.
    pub fn flush_kind(&self, kind: OperationKind) -> FlushReport {
        // One consumer per queue at a time
        let _guard = lock(&self.guards[kind.index()]);

        self.set_state(kind, BatchState::Draining);
        let batch = self.queues.drain(kind, self.batch_size);
        if batch.is_empty() {
            self.set_state(kind, BatchState::Idle);
            return FlushReport::default();
        }

        tracing::debug!(
            queue = %kind,
            batch_size = batch.len(),
            oldest_wait_ms = batch[0].enqueued_at.elapsed().as_millis() as u64,
            "Committing batch"
        );
        self.set_state(kind, BatchState::Committing);

        let report = match self.commit(&batch) {
            Ok(()) => {
                self.set_state(kind, BatchState::Committed);
                self.on_committed(kind, batch)
            }
            Err(e) => {
                self.set_state(kind, BatchState::RolledBack);
                tracing::warn!(
                    queue = %kind,
                    batch_size = batch.len(),
                    error = %e,
                    "Batch rolled back, retrying items individually"
                );
                self.metrics
                    .batches_rolled_back
                    .fetch_add(1, Ordering::Relaxed);
                self.retry_individually(kind, batch)
            }
        };

        self.set_state(kind, BatchState::Idle);
        report
    }

    /// One scheduled cycle: one batch from every queue in turn.
    pub fn run_cycle(&self) -> FlushReport {
        self.metrics.flush_cycles.fetch_add(1, Ordering::Relaxed);

        let mut report = FlushReport::default();
        for kind in OperationKind::ALL {
            report.merge(self.flush_kind(kind));
        }

        if report.is_empty() {
            tracing::trace!("Flush cycle completed with nothing queued");
        } else {
            tracing::debug!(
                batches = report.batches,
                committed = report.committed,
                retried = report.retried,
                failed = report.failed,
                "Flush cycle completed"
            );
        }
        report
    }

    /// Drain every queue until empty.
    pub fn flush_all(&self) -> FlushReport {
        let mut total = FlushReport::default();
        loop {
            let mut cycle = FlushReport::default();
            for kind in OperationKind::ALL {
                cycle.merge(self.flush_kind(kind));
            }
            if cycle.is_empty() {
                break;
            }
            total.merge(cycle);
        }

        tracing::info!(
            batches = total.batches,
            committed = total.committed,
            retried = total.retried,
            failed = total.failed,
            "Flushed all write queues"
        );
        total
    }

    fn set_state(&self, kind: OperationKind, state: BatchState) {
        self.states[kind.index()].store(state.as_u8(), Ordering::SeqCst);
    }

    /// Apply the whole batch in FIFO order inside one transaction.
    fn commit(&self, batch: &[QueuedWrite]) -> TagResult<()> {
        let mut tx = self.storage.begin()?;
        for write in batch {
            if let Err(e) = tx.apply(&write.statement) {
                if let Err(rollback_err) = tx.rollback() {
                    tracing::error!(error = %rollback_err, "Rollback failed");
                }
                return Err(e);
            }
        }
        tx.commit()
    }

    fn on_committed(&self, kind: OperationKind, batch: Vec<QueuedWrite>) -> FlushReport {
        let count = batch.len() as u64;
        self.metrics.batches_committed.fetch_add(1, Ordering::Relaxed);
        self.metrics.items_committed.fetch_add(count, Ordering::Relaxed);

        for write in batch {
            invalidate_for(&self.cache, &write.statement);
            self.deliver(write.callback, Ok(()));
        }

        tracing::debug!(queue = %kind, items = count, "Batch committed");
        FlushReport {
            batches: 1,
            committed: count,
            ..Default::default()
        }
    }

    fn retry_individually(&self, kind: OperationKind, batch: Vec<QueuedWrite>) -> FlushReport {
        let mut report = FlushReport {
            batches: 1,
            ..Default::default()
        };

        for write in batch {
            match self.storage.execute(&write.statement) {
                Ok(()) => {
                    report.retried += 1;
                    self.metrics.items_recovered.fetch_add(1, Ordering::Relaxed);
                    invalidate_for(&self.cache, &write.statement);
                    self.deliver(write.callback, Ok(()));
                }
                Err(e) => {
                    report.failed += 1;
                    self.metrics.items_dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        queue = %kind,
                        statement = ?write.statement,
                        error = %e,
                        "Write dropped after individual retry failed"
                    );
                    self.deliver(write.callback, Err(e));
                }
            }
        }
        report
    }

    fn deliver(&self, callback: Option<WriteCallback>, result: TagResult<()>) {
        if let Some(callback) = callback {
            self.host
                .run_on_callback_context(Box::new(move || callback(result)));
        }
    }
}

impl std::fmt::Debug for BatchProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("batch_size", &self.batch_size)
            .field("pending", &self.queues.total_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{RepeatingTask, ScheduledTask, Task};
    use crate::queue::QueueItem;
    use std::time::Duration;
    use tagstore_core::{StorageError, Tag, TagKind, TagRequest, TagstoreError};
    use tagstore_storage::{CacheConfig, CacheKey, MockStorage};
    use uuid::Uuid;

    /// Runs callbacks inline; nothing is scheduled.
    struct InlineHost;

    impl Host for InlineHost {
        fn schedule_repeating(&self, name: &str, _: Duration, _: RepeatingTask) -> ScheduledTask {
            ScheduledTask::new(name)
        }
        fn schedule_once(&self, task: Task) {
            task();
        }
        fn run_on_callback_context(&self, task: Task) {
            task();
        }
        fn shutdown(&self) {}
    }

    struct Fixture {
        storage: Arc<MockStorage>,
        cache: Arc<CacheService>,
        queues: Arc<WriteQueues>,
        processor: BatchProcessor,
    }

    fn fixture(batch_size: usize) -> Fixture {
        let storage = Arc::new(MockStorage::new());
        let cache = Arc::new(CacheService::new(CacheConfig::new()));
        let queues = Arc::new(WriteQueues::new(batch_size));
        let processor = BatchProcessor::new(
            storage.clone(),
            cache.clone(),
            Arc::new(InlineHost),
            queues.clone(),
            batch_size,
        );
        Fixture {
            storage,
            cache,
            queues,
            processor,
        }
    }

    type Outcomes = Arc<Mutex<Vec<(String, TagResult<()>)>>>;

    fn add(queues: &WriteQueues, name: &str, outcomes: &Outcomes) {
        let outcomes = Arc::clone(outcomes);
        let label = name.to_string();
        queues.enqueue(QueuedWrite::new(
            QueueItem::AddTag(Tag::new(name, format!("[{}]", name), TagKind::Prefix)),
            Some(Box::new(move |result: TagResult<()>| {
                outcomes.lock().unwrap().push((label, result))
            })),
        ));
    }

    #[test]
    fn test_batch_commits_in_one_transaction() {
        let f = fixture(10);
        let outcomes: Outcomes = Arc::default();
        for name in ["a", "b", "c"] {
            add(&f.queues, name, &outcomes);
        }

        let report = f.processor.flush_kind(OperationKind::AddTag);

        assert_eq!(report, FlushReport { batches: 1, committed: 3, retried: 0, failed: 0 });
        assert_eq!(f.storage.commit_count(), 1);
        assert_eq!(f.storage.tag_count(), 3);
        assert_eq!(f.processor.state(OperationKind::AddTag), BatchState::Idle);

        let outcomes = outcomes.lock().unwrap();
        let names: Vec<_> = outcomes.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert!(outcomes.iter().all(|(_, r)| r.is_ok()));
    }

    #[test]
    fn test_flush_kind_takes_one_batch() {
        let f = fixture(2);
        let outcomes: Outcomes = Arc::default();
        for name in ["a", "b", "c", "d", "e"] {
            add(&f.queues, name, &outcomes);
        }

        let report = f.processor.flush_kind(OperationKind::AddTag);
        assert_eq!(report.committed, 2);
        assert_eq!(f.queues.len(OperationKind::AddTag), 3);
    }

    #[test]
    fn test_failed_batch_retries_each_item() {
        let f = fixture(10);
        let outcomes: Outcomes = Arc::default();
        for name in ["a", "bad", "c"] {
            add(&f.queues, name, &outcomes);
        }
        f.storage.fail_tag("bad");

        let report = f.processor.flush_kind(OperationKind::AddTag);

        assert_eq!(report, FlushReport { batches: 1, committed: 0, retried: 2, failed: 1 });
        assert_eq!(f.storage.tag_count(), 2);
        assert!(f.storage.tag_get("a").unwrap().is_some());
        assert!(f.storage.tag_get("bad").unwrap().is_none());
        assert!(f.storage.tag_get("c").unwrap().is_some());

        let metrics = f.processor.metrics();
        assert_eq!(metrics.batches_rolled_back, 1);
        assert_eq!(metrics.items_recovered, 2);
        assert_eq!(metrics.items_dropped, 1);

        let outcomes = outcomes.lock().unwrap();
        let failed: Vec<_> = outcomes.iter().filter(|(_, r)| r.is_err()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "bad");
        assert!(matches!(failed[0].1, Err(TagstoreError::Storage(_))));
    }

    #[test]
    fn test_failed_commit_recovers_every_item() {
        let f = fixture(10);
        let outcomes: Outcomes = Arc::default();
        for name in ["a", "b"] {
            add(&f.queues, name, &outcomes);
        }
        f.storage.fail_next_commits(1);

        let report = f.processor.flush_kind(OperationKind::AddTag);

        assert_eq!(report.retried, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(f.storage.tag_count(), 2);
    }

    #[test]
    fn test_commit_invalidates_touched_entries() {
        let f = fixture(10);
        let outcomes: Outcomes = Arc::default();
        f.cache.put(CacheKey::tag_display("a"), "[old]".to_string(), None);
        f.cache.put(CacheKey::tag_display("untouched"), "[u]".to_string(), None);
        f.cache.put(CacheKey::request_list(), Vec::<TagRequest>::new(), None);

        add(&f.queues, "a", &outcomes);
        f.processor.flush_kind(OperationKind::AddTag);

        assert!(!f.cache.contains(&CacheKey::tag_display("a")));
        assert!(f.cache.contains(&CacheKey::tag_display("untouched")));
        assert!(f.cache.contains(&CacheKey::request_list()));

        f.queues.enqueue(QueuedWrite::new(
            QueueItem::AddRequest(TagRequest::new(1, Uuid::new_v4(), "owner", "[R]")),
            None,
        ));
        f.processor.flush_kind(OperationKind::AddRequest);
        assert!(!f.cache.contains(&CacheKey::request_list()));
    }

    #[test]
    fn test_failed_item_keeps_cache() {
        let f = fixture(10);
        let outcomes: Outcomes = Arc::default();
        f.cache.put(CacheKey::tag_display("bad"), "[cached]".to_string(), None);
        f.storage.fail_tag("bad");

        add(&f.queues, "bad", &outcomes);
        f.processor.flush_kind(OperationKind::AddTag);

        assert!(f.cache.contains(&CacheKey::tag_display("bad")));
    }

    #[test]
    fn test_flush_all_drains_every_queue() {
        let f = fixture(2);
        let outcomes: Outcomes = Arc::default();
        for i in 0..5 {
            add(&f.queues, &format!("t{}", i), &outcomes);
        }
        f.queues.enqueue(QueuedWrite::new(
            QueueItem::AddRequest(TagRequest::new(1, Uuid::new_v4(), "owner", "[R]")),
            None,
        ));

        let report = f.processor.flush_all();

        assert_eq!(report.batches, 4);
        assert_eq!(report.processed(), 6);
        assert!(f.queues.is_empty());
        assert_eq!(f.storage.tag_count(), 5);
        assert_eq!(f.storage.request_count(), 1);
    }

    #[test]
    fn test_run_cycle_takes_one_batch_per_kind() {
        let f = fixture(2);
        let outcomes: Outcomes = Arc::default();
        for i in 0..5 {
            add(&f.queues, &format!("t{}", i), &outcomes);
        }
        f.queues.enqueue(QueuedWrite::new(QueueItem::DeleteTag("t0".into()), None));

        let report = f.processor.run_cycle();

        assert_eq!(report.batches, 2);
        assert_eq!(f.queues.len(OperationKind::AddTag), 3);
        assert_eq!(f.queues.len(OperationKind::DeleteTag), 0);
        assert_eq!(f.processor.metrics().flush_cycles, 1);
    }

    #[test]
    fn test_empty_flush_is_noop() {
        let f = fixture(2);
        assert!(f.processor.flush_kind(OperationKind::DeleteRequest).is_empty());
        assert_eq!(f.storage.commit_count(), 0);
    }

    #[test]
    fn test_delete_missing_tag_fails_on_retry() {
        let f = fixture(10);
        let result: Arc<Mutex<Option<TagResult<()>>>> = Arc::default();
        let slot = Arc::clone(&result);
        f.queues.enqueue(QueuedWrite::new(
            QueueItem::DeleteTag("ghost".into()),
            Some(Box::new(move |r: TagResult<()>| *slot.lock().unwrap() = Some(r))),
        ));

        let report = f.processor.flush_kind(OperationKind::DeleteTag);

        assert_eq!(report.failed, 1);
        assert!(matches!(
            result.lock().unwrap().take(),
            Some(Err(TagstoreError::Storage(StorageError::NotFound { .. })))
        ));
    }
}
