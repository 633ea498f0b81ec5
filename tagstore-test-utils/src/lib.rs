//! tagstore Test Utilities
//!
//! Shared test infrastructure for the tagstore workspace:
//! - A manually driven [`Host`] for deterministic scheduling
//! - A recorder for write completion callbacks
//! - Proptest generators for the data model
//! - Fixtures for common scenarios
//! - Assertions on tagstore results

// Re-export mock storage from its source crate
pub use tagstore_storage::MockStorage;

// Re-export core types for convenience
pub use tagstore_core::{
    owner_slot_name, AttributeValue, EngineError, StorageError, Tag, TagAttribute, TagFilter,
    TagKind, TagRequest, TagResult, TagstoreConfig, TagstoreError, ValidationError,
};
pub use tagstore_engine::{Host, RepeatingTask, ScheduledTask, Task};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

// ============================================================================
// MANUAL HOST
// ============================================================================

struct Repeating {
    handle: ScheduledTask,
    interval: Duration,
    task: RepeatingTask,
}

/// Host whose scheduled work only runs when the test says so.
///
/// Repeating tasks run on [`tick`](Self::tick), one-shot tasks on
/// [`run_pending`](Self::run_pending). Callbacks run inline on the thread
/// that delivers them.
#[derive(Default)]
pub struct ManualHost {
    repeating: Mutex<Vec<Repeating>>,
    once: Mutex<VecDeque<Task>>,
    callbacks_run: AtomicUsize,
    shut_down: AtomicBool,
}

impl ManualHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every live repeating task once. Returns how many ran.
    pub fn tick(&self) -> usize {
        let tasks: Vec<RepeatingTask> = self
            .repeating
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !r.handle.is_cancelled())
            .map(|r| Arc::clone(&r.task))
            .collect();
        for task in &tasks {
            task();
        }
        tasks.len()
    }

    /// Run the live repeating task registered under `name`.
    pub fn tick_named(&self, name: &str) -> bool {
        let task = self
            .repeating
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.handle.name() == name && !r.handle.is_cancelled())
            .map(|r| Arc::clone(&r.task));
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run queued one-shot tasks, including any they schedule, until none
    /// remain. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.once.lock().unwrap().pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    pub fn pending_once(&self) -> usize {
        self.once.lock().unwrap().len()
    }

    /// Names and intervals of live repeating tasks.
    pub fn scheduled(&self) -> Vec<(String, Duration)> {
        self.repeating
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !r.handle.is_cancelled())
            .map(|r| (r.handle.name().to_string(), r.interval))
            .collect()
    }

    pub fn callbacks_run(&self) -> usize {
        self.callbacks_run.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl Host for ManualHost {
    fn schedule_repeating(&self, name: &str, interval: Duration, task: RepeatingTask) -> ScheduledTask {
        let handle = ScheduledTask::new(name);
        self.repeating.lock().unwrap().push(Repeating {
            handle: handle.clone(),
            interval,
            task,
        });
        handle
    }

    fn schedule_once(&self, task: Task) {
        self.once.lock().unwrap().push_back(task);
    }

    fn run_on_callback_context(&self, task: Task) {
        self.callbacks_run.fetch_add(1, Ordering::SeqCst);
        task();
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        for repeating in self.repeating.lock().unwrap().iter() {
            repeating.handle.cancel();
        }
    }
}

// ============================================================================
// CALLBACK RECORDER
// ============================================================================

/// Collects write outcomes delivered to callbacks, tagged by label.
#[derive(Clone, Default)]
pub struct CallbackRecorder {
    inner: Arc<(Mutex<Vec<(String, TagResult<()>)>>, Condvar)>,
}

impl CallbackRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback that records its outcome under `label`.
    pub fn callback(&self, label: impl Into<String>) -> impl FnOnce(TagResult<()>) + Send + 'static {
        let inner = Arc::clone(&self.inner);
        let label = label.into();
        move |result| {
            let (outcomes, ready) = &*inner;
            outcomes.lock().unwrap().push((label, result));
            ready.notify_all();
        }
    }

    pub fn outcomes(&self) -> Vec<(String, TagResult<()>)> {
        self.inner.0.lock().unwrap().clone()
    }

    /// Labels in delivery order.
    pub fn labels(&self) -> Vec<String> {
        self.outcomes().into_iter().map(|(label, _)| label).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn successes(&self) -> usize {
        self.outcomes().iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failures(&self) -> Vec<(String, TagstoreError)> {
        self.outcomes()
            .into_iter()
            .filter_map(|(label, r)| r.err().map(|e| (label, e)))
            .collect()
    }

    /// Block until at least `count` outcomes arrived. Returns false on timeout.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (outcomes, ready) = &*self.inner;
        let mut guard = outcomes.lock().unwrap();
        while guard.len() < count {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = ready.wait_timeout(guard, deadline - now).unwrap().0;
        }
        true
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating tagstore entity types.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    pub fn arb_tag_kind() -> impl Strategy<Value = TagKind> {
        prop_oneof![Just(TagKind::Prefix), Just(TagKind::Suffix), Just(TagKind::Both)]
    }

    /// Valid tag name: non-empty, no whitespace.
    pub fn arb_tag_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_-]{0,15}"
    }

    pub fn arb_display() -> impl Strategy<Value = String> {
        "\\[[A-Za-z0-9 ]{1,10}\\]"
    }

    /// Generate a valid tag.
    pub fn arb_tag() -> impl Strategy<Value = Tag> {
        (
            arb_tag_name(),
            arb_display(),
            arb_tag_kind(),
            any::<bool>(),
            any::<bool>(),
            -100i32..100,
        )
            .prop_map(|(name, display, kind, visible, color_flag, weight)| {
                Tag::new(name, display, kind)
                    .with_visible(visible)
                    .with_color_flag(color_flag)
                    .with_weight(weight)
            })
    }

    /// Generate a tag named by the owner-slot convention.
    pub fn arb_owner_tag() -> impl Strategy<Value = Tag> {
        (arb_uuid(), 1u32..10, arb_display(), arb_tag_kind())
            .prop_map(|(owner, slot, display, kind)| Tag::new(owner_slot_name(owner, slot), display, kind))
    }

    pub fn arb_request() -> impl Strategy<Value = TagRequest> {
        (1i64..10_000, arb_uuid(), "[a-zA-Z]{3,12}", arb_display())
            .prop_map(|(id, owner, owner_name, display)| TagRequest::new(id, owner, owner_name, display))
    }

    pub fn arb_filter() -> impl Strategy<Value = TagFilter> {
        prop_oneof![
            Just(TagFilter::All),
            Just(TagFilter::Visible),
            arb_tag_kind().prop_map(TagFilter::Kind),
        ]
    }

    /// An attribute together with a value of the matching shape.
    pub fn arb_attribute_update() -> impl Strategy<Value = (TagAttribute, AttributeValue)> {
        prop_oneof![
            arb_display().prop_map(|d| (TagAttribute::Display, AttributeValue::Text(d))),
            arb_tag_kind().prop_map(|k| (TagAttribute::Kind, AttributeValue::Kind(k))),
            any::<bool>().prop_map(|b| (TagAttribute::Visible, AttributeValue::Flag(b))),
            any::<bool>().prop_map(|b| (TagAttribute::ColorFlag, AttributeValue::Flag(b))),
            "[a-z_]{1,12}".prop_map(|i| (TagAttribute::Icon, AttributeValue::Text(i))),
            (-100i32..100).prop_map(|w| (TagAttribute::Weight, AttributeValue::Int(w))),
        ]
    }

    /// Distinct tag names.
    pub fn arb_distinct_names(max: usize) -> impl Strategy<Value = Vec<String>> {
        prop::collection::hash_set(arb_tag_name(), 1..=max).prop_map(|set| set.into_iter().collect())
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use uuid::Uuid;

    /// Config with the given batch size and every other setting at default.
    pub fn batching_config(batch_size: usize) -> TagstoreConfig {
        let mut config = TagstoreConfig::default();
        config.batching.size = batch_size;
        config.cache.stats_enabled = true;
        config.workers.threads = 2;
        config.workers.shutdown_timeout_seconds = 2;
        config
    }

    /// Config with batching off; every write executes immediately.
    pub fn immediate_config() -> TagstoreConfig {
        let mut config = batching_config(1);
        config.batching.enabled = false;
        config
    }

    /// Config with cache and batching off.
    pub fn pass_through_config() -> TagstoreConfig {
        let mut config = TagstoreConfig::pass_through();
        config.workers.threads = 2;
        config.workers.shutdown_timeout_seconds = 2;
        config
    }

    /// Prefix tag whose display is the name in brackets.
    pub fn tag(name: &str) -> Tag {
        Tag::new(name, format!("[{}]", name.to_uppercase()), TagKind::Prefix)
    }

    pub fn owner_tag(owner: Uuid, slot: u32) -> Tag {
        Tag::new(owner_slot_name(owner, slot), format!("[slot {}]", slot), TagKind::Both)
    }

    pub fn request(id: i64) -> TagRequest {
        TagRequest::new(id, Uuid::new_v4(), "requester", format!("[REQ{}]", id))
    }

    /// Storage pre-populated with `names` as tags.
    pub fn seeded_storage(names: &[&str]) -> Arc<MockStorage> {
        use tagstore_storage::Persistence;

        let storage = Arc::new(MockStorage::new());
        for name in names {
            storage
                .tag_upsert(&tag(name))
                .expect("seeding mock storage");
        }
        storage
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on tagstore results.

    use super::*;

    /// Assert that a TagResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &TagResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a TagResult is a Storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &TagResult<T>) {
        match result {
            Err(TagstoreError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that a TagResult is a Validation error.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &TagResult<T>) {
        match result {
            Err(TagstoreError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that a TagResult is EngineError::ShutDown.
    #[track_caller]
    pub fn assert_shut_down<T: std::fmt::Debug>(result: &TagResult<T>) {
        match result {
            Err(TagstoreError::Engine(EngineError::ShutDown)) => {}
            other => panic!("Expected ShutDown error, got: {:?}", other),
        }
    }
}
