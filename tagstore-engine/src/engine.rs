//! The engine façade: cached asynchronous reads and queued or immediate writes.
//!
//! Reads return futures. A cache hit resolves immediately; a miss loads from
//! persistence on the worker pool and stores the result before resolving.
//!
//! Writes are validated on the caller's thread, then either queued for the
//! batch processor or executed immediately on the worker pool, depending on
//! `batching.enabled`. The caller's callback receives the final outcome on
//! the host's callback context. Validation failures are returned directly and
//! never reach a queue or the pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures_util::future::{self, BoxFuture, FutureExt};
use tagstore_core::{
    validate_name, AttributeValue, EngineError, Tag, TagAttribute, TagFilter, TagRequest,
    TagResult, TagstoreConfig,
};
use tagstore_storage::{CacheKey, CacheService, Cacheable, Persistence, WriteStatement};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::batch::{invalidate_for, BatchProcessor, FlushReport};
use crate::host::{lock, Host, ScheduledTask};
use crate::pool::{run_guarded, WorkerPool};
use crate::queue::{QueueItem, QueuedWrite, WriteCallback, WriteQueues};
use crate::stats::{EngineStatistics, OperationCounters};

/// Cached reads and batched writes over a [`Persistence`] backend.
///
/// Built with [`EngineBuilder`](crate::EngineBuilder).
pub struct TagEngine {
    config: TagstoreConfig,
    storage: Arc<dyn Persistence>,
    cache: Arc<CacheService>,
    host: Arc<dyn Host>,
    pool: WorkerPool,
    queues: Arc<WriteQueues>,
    processor: Arc<BatchProcessor>,
    scheduled: Mutex<Vec<ScheduledTask>>,
    counters: Arc<OperationCounters>,
    /// Writers hold it shared from the open check to the enqueue; shutdown
    /// takes it exclusively to close intake.
    intake: RwLock<()>,
    closed: AtomicBool,
}

impl TagEngine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        config: TagstoreConfig,
        storage: Arc<dyn Persistence>,
        cache: Arc<CacheService>,
        host: Arc<dyn Host>,
        pool: WorkerPool,
        queues: Arc<WriteQueues>,
        processor: Arc<BatchProcessor>,
        scheduled: Vec<ScheduledTask>,
    ) -> Self {
        Self {
            config,
            storage,
            cache,
            host,
            pool,
            queues,
            processor,
            scheduled: Mutex::new(scheduled),
            counters: Arc::new(OperationCounters::default()),
            intake: RwLock::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &TagstoreConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheService {
        &self.cache
    }

    pub fn processor(&self) -> &BatchProcessor {
        &self.processor
    }

    /// Writes waiting in any queue.
    pub fn pending_writes(&self) -> usize {
        self.queues.total_len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Display text of the tag called `name`.
    pub fn get_display_by_name(&self, name: &str) -> BoxFuture<'static, TagResult<Option<String>>> {
        let owned = name.to_string();
        self.read(CacheKey::tag_display(name), move |storage| {
            Ok(storage.tag_get(&owned)?.map(|tag| tag.display))
        })
    }

    /// Name of the tag whose display text is `display`.
    pub fn get_name_by_display(&self, display: &str) -> BoxFuture<'static, TagResult<Option<String>>> {
        let owned = display.to_string();
        self.read(CacheKey::tag_name(display), move |storage| {
            Ok(storage.tag_get_by_display(&owned)?.map(|tag| tag.name))
        })
    }

    pub fn get_tag(&self, name: &str) -> BoxFuture<'static, TagResult<Option<Tag>>> {
        let owned = name.to_string();
        self.read(CacheKey::tag(name), move |storage| storage.tag_get(&owned))
    }

    /// Tags matching `filter`, heaviest first.
    pub fn list_tags(&self, filter: TagFilter) -> BoxFuture<'static, TagResult<Vec<Tag>>> {
        self.read(CacheKey::tag_list(filter), move |storage| {
            storage.tag_list(filter).map(Some)
        })
        .map(|result| result.map(Option::unwrap_or_default))
        .boxed()
    }

    pub fn list_requests(&self) -> BoxFuture<'static, TagResult<Vec<TagRequest>>> {
        self.read(CacheKey::request_list(), |storage| {
            storage.request_list().map(Some)
        })
        .map(|result| result.map(Option::unwrap_or_default))
        .boxed()
    }

    /// Number of owner-slot tags held by `owner`.
    pub fn count_owned_tags(&self, owner: Uuid) -> BoxFuture<'static, TagResult<u64>> {
        self.read(CacheKey::owner_count(owner), move |storage| {
            storage.tag_count_by_owner(owner).map(Some)
        })
        .map(|result| result.map(Option::unwrap_or_default))
        .boxed()
    }

    fn read<T, F>(&self, key: CacheKey, load: F) -> BoxFuture<'static, TagResult<Option<T>>>
    where
        T: Cacheable,
        F: FnOnce(&dyn Persistence) -> TagResult<Option<T>> + Send + 'static,
    {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);

        if let Some(value) = self.cache.get::<T>(&key) {
            self.counters.cache_served.fetch_add(1, Ordering::Relaxed);
            return future::ready(Ok(Some(value))).boxed();
        }

        let storage = Arc::clone(&self.storage);
        let cache = Arc::clone(&self.cache);
        let counters = Arc::clone(&self.counters);
        self.pool.submit(move || {
            let loaded = cache.load_into(key, || load(&*storage), None);
            if let Err(e) = &loaded {
                counters.failed_reads.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %e, "Read from persistence failed");
            }
            loaded
        })
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Create or replace a tag.
    pub fn add_tag<F>(&self, tag: Tag, callback: F) -> TagResult<()>
    where
        F: FnOnce(TagResult<()>) + Send + 'static,
    {
        tag.validate()?;
        self.submit_write(QueueItem::AddTag(tag), Box::new(callback))
    }

    pub fn delete_tag<F>(&self, name: &str, callback: F) -> TagResult<()>
    where
        F: FnOnce(TagResult<()>) + Send + 'static,
    {
        validate_name(name)?;
        self.submit_write(QueueItem::DeleteTag(name.to_string()), Box::new(callback))
    }

    /// Update one attribute, named case-insensitively (`"display"`,
    /// `"kind"`, `"visible"`, `"color"`, `"icon"`, `"weight"`).
    pub fn update_attribute<F>(
        &self,
        name: &str,
        attribute: &str,
        value: AttributeValue,
        callback: F,
    ) -> TagResult<()>
    where
        F: FnOnce(TagResult<()>) + Send + 'static,
    {
        validate_name(name)?;
        let attribute: TagAttribute = attribute.parse()?;
        attribute.check_value(&value)?;
        self.submit_write(
            QueueItem::UpdateAttribute {
                name: name.to_string(),
                attribute,
                value,
            },
            Box::new(callback),
        )
    }

    pub fn add_request<F>(&self, request: TagRequest, callback: F) -> TagResult<()>
    where
        F: FnOnce(TagResult<()>) + Send + 'static,
    {
        request.validate()?;
        self.submit_write(QueueItem::AddRequest(request), Box::new(callback))
    }

    pub fn delete_request<F>(&self, id: i64, callback: F) -> TagResult<()>
    where
        F: FnOnce(TagResult<()>) + Send + 'static,
    {
        self.submit_write(QueueItem::DeleteRequest(id), Box::new(callback))
    }

    /// Delete every tag and request, then clear the cache. Runs on the
    /// caller's thread. Queued writes are left in their queues.
    pub fn purge_all(&self) -> TagResult<()> {
        self.ensure_open()?;
        self.storage.purge_all()?;
        let cleared = self.cache.invalidate_all();
        tracing::info!(cleared, "Purged all tags and requests");
        Ok(())
    }

    /// Drain every queue now, on the caller's thread.
    pub fn flush(&self) -> FlushReport {
        self.processor.flush_all()
    }

    fn submit_write(&self, item: QueueItem, callback: WriteCallback) -> TagResult<()> {
        let _intake = self.intake.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.ensure_open()?;

        if self.config.batching.enabled {
            let kind = item.kind();
            let full = self.queues.enqueue(QueuedWrite::new(item, Some(callback)));
            self.counters.queued_writes.fetch_add(1, Ordering::Relaxed);

            if full && self.config.batching.auto_flush {
                tracing::debug!(queue = %kind, "Batch threshold reached, flushing");
                let processor = Arc::clone(&self.processor);
                self.host.schedule_once(Box::new(move || {
                    processor.flush_kind(kind);
                }));
            }
            return Ok(());
        }

        self.counters.immediate_writes.fetch_add(1, Ordering::Relaxed);
        let statement = WriteStatement::from(item);
        let storage = Arc::clone(&self.storage);
        let cache = Arc::clone(&self.cache);
        let host = Arc::clone(&self.host);
        let counters = Arc::clone(&self.counters);
        self.pool.execute(move || {
            let result = run_guarded(|| storage.execute(&statement));
            match &result {
                Ok(()) => invalidate_for(&cache, &statement),
                Err(e) => {
                    counters.failed_writes.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(statement = ?statement, error = %e, "Immediate write failed");
                }
            }
            host.run_on_callback_context(Box::new(move || callback(result)));
        })
    }

    fn ensure_open(&self) -> TagResult<()> {
        if self.is_shut_down() {
            return Err(EngineError::ShutDown.into());
        }
        Ok(())
    }

    // ========================================================================
    // OBSERVABILITY
    // ========================================================================

    pub fn statistics(&self) -> EngineStatistics {
        EngineStatistics {
            cache_enabled: self.cache.is_enabled(),
            batching_enabled: self.config.batching.enabled,
            cache: self.cache.stats(),
            batches: self.processor.metrics(),
            operations: self.counters.snapshot(),
            queue_depths: self
                .queues
                .depths()
                .into_iter()
                .map(|(kind, depth)| (kind.as_str().to_string(), depth))
                .collect(),
        }
    }

    /// Human-readable statistics.
    pub fn get_statistics(&self) -> String {
        self.statistics().to_string()
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Stop intake, flush every queue, cancel periodic work, then stop the
    /// worker pool (bounded wait) and the host. Idempotent.
    pub fn shutdown(&self) -> FlushReport {
        {
            // Waits for writers already past the open check to finish enqueueing
            let _intake = self.intake.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            if self.closed.swap(true, Ordering::SeqCst) {
                return FlushReport::default();
            }
        }
        tracing::info!(pending = self.queues.total_len(), "Tag engine shutting down");

        for task in lock(&self.scheduled).drain(..) {
            task.cancel();
        }

        let report = self.processor.flush_all();
        self.pool.shutdown(self.config.workers.shutdown_timeout());
        self.host.shutdown();

        tracing::info!(
            committed = report.committed,
            retried = report.retried,
            failed = report.failed,
            "Tag engine stopped"
        );
        report
    }
}

impl Drop for TagEngine {
    fn drop(&mut self) {
        if !self.is_shut_down() {
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for TagEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagEngine")
            .field("config", &self.config)
            .field("pending_writes", &self.pending_writes())
            .field("closed", &self.is_shut_down())
            .finish()
    }
}

/// A callback paired with a future that resolves to the result it receives.
///
/// ```ignore
/// let (callback, done) = completion();
/// engine.add_tag(tag, callback)?;
/// done.await?;
/// ```
///
/// If the callback is dropped without being called the future resolves to
/// [`EngineError::CallbackDropped`].
pub fn completion() -> (WriteCallback, BoxFuture<'static, TagResult<()>>) {
    let (tx, rx) = oneshot::channel();
    let callback: WriteCallback = Box::new(move |result| {
        let _ = tx.send(result);
    });
    let done = rx
        .map(|received| received.unwrap_or_else(|_| Err(EngineError::CallbackDropped.into())))
        .boxed();
    (callback, done)
}
