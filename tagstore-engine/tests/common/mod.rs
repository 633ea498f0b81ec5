//! Shared helpers for engine integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tagstore_core::{Tag, TagFilter, TagRequest, TagResult};
use tagstore_storage::{MockStorage, Persistence, Transaction};
use uuid::Uuid;

/// Delegates to [`MockStorage`] and counts read calls, so tests can tell a
/// cache hit from a load.
#[derive(Default)]
pub struct CountingStorage {
    pub inner: MockStorage,
    reads: AtomicU64,
}

impl CountingStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    fn count(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }
}

impl Persistence for CountingStorage {
    fn tag_get(&self, name: &str) -> TagResult<Option<Tag>> {
        self.count();
        self.inner.tag_get(name)
    }

    fn tag_get_by_display(&self, display: &str) -> TagResult<Option<Tag>> {
        self.count();
        self.inner.tag_get_by_display(display)
    }

    fn tag_list(&self, filter: TagFilter) -> TagResult<Vec<Tag>> {
        self.count();
        self.inner.tag_list(filter)
    }

    fn request_list(&self) -> TagResult<Vec<TagRequest>> {
        self.count();
        self.inner.request_list()
    }

    fn tag_count_by_owner(&self, owner: Uuid) -> TagResult<u64> {
        self.count();
        self.inner.tag_count_by_owner(owner)
    }

    fn begin(&self) -> TagResult<Box<dyn Transaction + '_>> {
        self.inner.begin()
    }

    fn purge_all(&self) -> TagResult<()> {
        self.inner.purge_all()
    }
}

/// Drive a future to completion on a throwaway runtime.
pub fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("test runtime")
        .block_on(future)
}
