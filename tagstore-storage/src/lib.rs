//! tagstore Storage - Persistence Trait, Mock Implementation and Cache
//!
//! Defines the synchronous persistence contract the engine talks to, an
//! in-memory implementation with transaction staging and failure injection,
//! and the TTL cache that fronts persistence reads.

pub mod cache;

pub use cache::{
    CacheCategory, CacheConfig, CacheEntry, CacheKey, CacheService, CacheStats, Cacheable,
    CachedValue,
};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};
use tagstore_core::{
    AttributeValue, EntityKind, StorageError, Tag, TagAttribute, TagFilter, TagRequest,
    TagResult,
};
use tracing::debug;
use uuid::Uuid;

// ============================================================================
// WRITE STATEMENTS
// ============================================================================

/// One write applied inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStatement {
    /// Create or replace a tag.
    UpsertTag(Tag),
    /// Delete a tag by name.
    DeleteTag(String),
    /// Update one named attribute on a tag.
    UpdateAttribute {
        name: String,
        attribute: TagAttribute,
        value: AttributeValue,
    },
    /// Create a request.
    InsertRequest(TagRequest),
    /// Delete a request by id.
    DeleteRequest(i64),
}

impl WriteStatement {
    /// Name of the tag this statement writes, if any.
    pub fn touched_tag(&self) -> Option<&str> {
        match self {
            Self::UpsertTag(tag) => Some(&tag.name),
            Self::DeleteTag(name) | Self::UpdateAttribute { name, .. } => Some(name),
            Self::InsertRequest(_) | Self::DeleteRequest(_) => None,
        }
    }

    /// True if this statement writes the request table.
    pub fn touches_requests(&self) -> bool {
        matches!(self, Self::InsertRequest(_) | Self::DeleteRequest(_))
    }
}

// ============================================================================
// PERSISTENCE TRAIT
// ============================================================================

/// A unit of work against persistence with explicit commit and rollback.
///
/// Statements are applied in call order. Nothing becomes visible to readers
/// until `commit` succeeds; dropping a transaction without committing rolls
/// it back.
pub trait Transaction {
    /// Apply one statement to the transaction.
    fn apply(&mut self, statement: &WriteStatement) -> TagResult<()>;

    /// Publish every applied statement atomically.
    fn commit(self: Box<Self>) -> TagResult<()>;

    /// Discard every applied statement.
    fn rollback(self: Box<Self>) -> TagResult<()>;
}

/// Persistence contract for tags and tag requests.
///
/// All calls are synchronous and may block; the engine only calls them from
/// its worker pool or scheduler thread.
pub trait Persistence: Send + Sync {
    // === Reads ===

    /// Get a tag by name.
    fn tag_get(&self, name: &str) -> TagResult<Option<Tag>>;

    /// Get a tag by its display text.
    fn tag_get_by_display(&self, display: &str) -> TagResult<Option<Tag>>;

    /// List tags matching a filter.
    fn tag_list(&self, filter: TagFilter) -> TagResult<Vec<Tag>>;

    /// List every pending request.
    fn request_list(&self) -> TagResult<Vec<TagRequest>>;

    /// Count the tags owned by `owner` under the owner-slot naming convention.
    fn tag_count_by_owner(&self, owner: Uuid) -> TagResult<u64>;

    // === Writes ===

    /// Begin a transaction.
    fn begin(&self) -> TagResult<Box<dyn Transaction + '_>>;

    /// Remove every tag and request.
    fn purge_all(&self) -> TagResult<()>;

    /// Execute one statement in its own transaction.
    fn execute(&self, statement: &WriteStatement) -> TagResult<()> {
        let mut tx = self.begin()?;
        if let Err(e) = tx.apply(statement) {
            // The statement error is what the caller needs to see.
            let _ = tx.rollback();
            return Err(e);
        }
        tx.commit()
    }

    /// Create or replace a tag.
    fn tag_upsert(&self, tag: &Tag) -> TagResult<()> {
        self.execute(&WriteStatement::UpsertTag(tag.clone()))
    }

    /// Delete a tag by name.
    fn tag_delete(&self, name: &str) -> TagResult<()> {
        self.execute(&WriteStatement::DeleteTag(name.to_string()))
    }

    /// Update one attribute on a tag.
    fn tag_update_attribute(
        &self,
        name: &str,
        attribute: TagAttribute,
        value: AttributeValue,
    ) -> TagResult<()> {
        self.execute(&WriteStatement::UpdateAttribute {
            name: name.to_string(),
            attribute,
            value,
        })
    }

    /// Create a request.
    fn request_insert(&self, request: &TagRequest) -> TagResult<()> {
        self.execute(&WriteStatement::InsertRequest(request.clone()))
    }

    /// Delete a request by id.
    fn request_delete(&self, id: i64) -> TagResult<()> {
        self.execute(&WriteStatement::DeleteRequest(id))
    }
}

// ============================================================================
// MOCK STORAGE
// ============================================================================

#[derive(Debug, Clone, Default)]
struct Tables {
    tags: HashMap<String, Tag>,
    requests: BTreeMap<i64, TagRequest>,
}

impl Tables {
    fn apply(&mut self, statement: &WriteStatement) -> TagResult<()> {
        match statement {
            WriteStatement::UpsertTag(tag) => {
                self.tags.insert(tag.name.clone(), tag.clone());
            }
            WriteStatement::DeleteTag(name) => {
                self.tags.remove(name).ok_or_else(|| StorageError::NotFound {
                    entity: EntityKind::Tag,
                    key: name.clone(),
                })?;
            }
            WriteStatement::UpdateAttribute {
                name,
                attribute,
                value,
            } => {
                let tag = self.tags.get_mut(name).ok_or_else(|| StorageError::NotFound {
                    entity: EntityKind::Tag,
                    key: name.clone(),
                })?;
                tag.apply(*attribute, value)?;
            }
            WriteStatement::InsertRequest(request) => {
                if self.requests.contains_key(&request.id) {
                    return Err(StorageError::InsertFailed {
                        entity: EntityKind::Request,
                        reason: format!("request {} already exists", request.id),
                    }
                    .into());
                }
                self.requests.insert(request.id, request.clone());
            }
            WriteStatement::DeleteRequest(id) => {
                self.requests.remove(id).ok_or_else(|| StorageError::NotFound {
                    entity: EntityKind::Request,
                    key: id.to_string(),
                })?;
            }
        }
        Ok(())
    }
}

/// In-memory storage for tests and for hosts without a database.
///
/// Transactions stage their statements against a private snapshot and publish
/// it on commit. A single writer lock serialises transactions; readers never
/// block on it.
#[derive(Debug, Default)]
pub struct MockStorage {
    tables: RwLock<Tables>,
    writer: Mutex<()>,
    failing_tags: RwLock<HashSet<String>>,
    failing_commits: AtomicU32,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    statements: AtomicU64,
}

impl MockStorage {
    /// Create a new mock storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get count of stored tags.
    pub fn tag_count(&self) -> usize {
        self.tables.read().map(|t| t.tags.len()).unwrap_or(0)
    }

    /// Get count of stored requests.
    pub fn request_count(&self) -> usize {
        self.tables.read().map(|t| t.requests.len()).unwrap_or(0)
    }

    /// Number of committed transactions.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Number of rolled back transactions, including failed commits.
    pub fn rollback_count(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    /// Number of statements published by committed transactions.
    pub fn statement_count(&self) -> u64 {
        self.statements.load(Ordering::Relaxed)
    }

    /// Make every statement touching `name` fail until cleared.
    pub fn fail_tag(&self, name: impl Into<String>) {
        if let Ok(mut failing) = self.failing_tags.write() {
            failing.insert(name.into());
        }
    }

    /// Make the next `count` commits fail.
    pub fn fail_next_commits(&self, count: u32) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        if let Ok(mut failing) = self.failing_tags.write() {
            failing.clear();
        }
        self.failing_commits.store(0, Ordering::SeqCst);
    }

    fn tables(&self) -> TagResult<std::sync::RwLockReadGuard<'_, Tables>> {
        Ok(self.tables.read().map_err(|_| StorageError::LockPoisoned)?)
    }

    fn check_injected(&self, statement: &WriteStatement) -> TagResult<()> {
        if let Some(name) = statement.touched_tag() {
            let failing = self.failing_tags.read().map_err(|_| StorageError::LockPoisoned)?;
            if failing.contains(name) {
                return Err(StorageError::Unavailable {
                    reason: format!("injected failure for tag '{}'", name),
                }
                .into());
            }
        }
        Ok(())
    }

    fn take_commit_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Persistence for MockStorage {
    fn tag_get(&self, name: &str) -> TagResult<Option<Tag>> {
        Ok(self.tables()?.tags.get(name).cloned())
    }

    fn tag_get_by_display(&self, display: &str) -> TagResult<Option<Tag>> {
        Ok(self
            .tables()?
            .tags
            .values()
            .find(|t| t.display == display)
            .cloned())
    }

    fn tag_list(&self, filter: TagFilter) -> TagResult<Vec<Tag>> {
        let mut tags: Vec<Tag> = self
            .tables()?
            .tags
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tags.sort_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.name.cmp(&b.name)));
        Ok(tags)
    }

    fn request_list(&self) -> TagResult<Vec<TagRequest>> {
        Ok(self.tables()?.requests.values().cloned().collect())
    }

    fn tag_count_by_owner(&self, owner: Uuid) -> TagResult<u64> {
        Ok(self
            .tables()?
            .tags
            .values()
            .filter(|t| t.owner() == Some(owner))
            .count() as u64)
    }

    fn begin(&self) -> TagResult<Box<dyn Transaction + '_>> {
        let writer = self.writer.lock().map_err(|_| StorageError::LockPoisoned)?;
        let staged = self.tables()?.clone();
        Ok(Box::new(MockTransaction {
            storage: self,
            _writer: writer,
            staged,
            applied: 0,
        }))
    }

    fn purge_all(&self) -> TagResult<()> {
        let _writer = self.writer.lock().map_err(|_| StorageError::LockPoisoned)?;
        let mut tables = self.tables.write().map_err(|_| StorageError::LockPoisoned)?;
        *tables = Tables::default();
        Ok(())
    }
}

/// Transaction over [`MockStorage`]; holds the writer lock until it ends.
struct MockTransaction<'a> {
    storage: &'a MockStorage,
    _writer: MutexGuard<'a, ()>,
    staged: Tables,
    applied: u64,
}

impl Transaction for MockTransaction<'_> {
    fn apply(&mut self, statement: &WriteStatement) -> TagResult<()> {
        self.storage.check_injected(statement)?;
        self.staged.apply(statement)?;
        self.applied += 1;
        Ok(())
    }

    fn commit(self: Box<Self>) -> TagResult<()> {
        if self.storage.take_commit_failure() {
            self.storage.rollbacks.fetch_add(1, Ordering::Relaxed);
            return Err(StorageError::TransactionFailed {
                reason: "injected commit failure".to_string(),
            }
            .into());
        }
        let this = *self;
        let mut tables = this
            .storage
            .tables
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        *tables = this.staged;
        this.storage.commits.fetch_add(1, Ordering::Relaxed);
        this.storage
            .statements
            .fetch_add(this.applied, Ordering::Relaxed);
        debug!(statements = this.applied, "Mock transaction committed");
        Ok(())
    }

    fn rollback(self: Box<Self>) -> TagResult<()> {
        self.storage.rollbacks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagstore_core::{owner_slot_name, TagKind, TagstoreError};

    fn make_test_tag(name: &str) -> Tag {
        Tag::new(name, format!("[{}]", name.to_uppercase()), TagKind::Prefix)
    }

    #[test]
    fn test_tag_upsert_get() {
        let storage = MockStorage::new();
        let tag = make_test_tag("vip");

        storage.tag_upsert(&tag).unwrap();
        assert_eq!(storage.tag_get("vip").unwrap(), Some(tag.clone()));
        assert_eq!(storage.tag_get_by_display("[VIP]").unwrap(), Some(tag));
        assert_eq!(storage.tag_count(), 1);
        assert_eq!(storage.commit_count(), 1);
    }

    #[test]
    fn test_tag_upsert_replaces() {
        let storage = MockStorage::new();
        storage.tag_upsert(&make_test_tag("vip")).unwrap();
        storage
            .tag_upsert(&make_test_tag("vip").with_weight(9))
            .unwrap();
        assert_eq!(storage.tag_count(), 1);
        assert_eq!(storage.tag_get("vip").unwrap().unwrap().weight, 9);
    }

    #[test]
    fn test_tag_delete_missing_is_not_found() {
        let storage = MockStorage::new();
        let err = storage.tag_delete("ghost").unwrap_err();
        assert!(matches!(
            err,
            TagstoreError::Storage(StorageError::NotFound { entity: EntityKind::Tag, .. })
        ));
        assert_eq!(storage.rollback_count(), 1);
    }

    #[test]
    fn test_tag_update_attribute() {
        let storage = MockStorage::new();
        storage.tag_upsert(&make_test_tag("vip")).unwrap();
        storage
            .tag_update_attribute("vip", TagAttribute::Visible, AttributeValue::Flag(false))
            .unwrap();
        assert!(!storage.tag_get("vip").unwrap().unwrap().visible);
    }

    #[test]
    fn test_tag_list_filter_and_order() {
        let storage = MockStorage::new();
        storage.tag_upsert(&make_test_tag("a").with_weight(1)).unwrap();
        storage.tag_upsert(&make_test_tag("b").with_weight(5)).unwrap();
        storage
            .tag_upsert(&make_test_tag("c").with_visible(false))
            .unwrap();

        let all = storage.tag_list(TagFilter::All).unwrap();
        let names: Vec<_> = all.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);

        let visible = storage.tag_list(TagFilter::Visible).unwrap();
        assert_eq!(visible.len(), 2);
    }

    #[test]
    fn test_request_insert_duplicate() {
        let storage = MockStorage::new();
        let request = TagRequest::new(1, Uuid::new_v4(), "steve", "[Builder]");
        storage.request_insert(&request).unwrap();
        assert!(storage.request_insert(&request).is_err());
        assert_eq!(storage.request_list().unwrap(), vec![request]);

        storage.request_delete(1).unwrap();
        assert_eq!(storage.request_count(), 0);
        assert!(storage.request_delete(1).is_err());
    }

    #[test]
    fn test_count_by_owner() {
        let storage = MockStorage::new();
        let owner = Uuid::new_v4();
        storage
            .tag_upsert(&make_test_tag(&owner_slot_name(owner, 1)))
            .unwrap();
        storage
            .tag_upsert(&make_test_tag(&owner_slot_name(owner, 2)))
            .unwrap();
        storage
            .tag_upsert(&make_test_tag(&owner_slot_name(Uuid::new_v4(), 1)))
            .unwrap();
        storage.tag_upsert(&make_test_tag("vip")).unwrap();

        assert_eq!(storage.tag_count_by_owner(owner).unwrap(), 2);
    }

    #[test]
    fn test_transaction_is_atomic() {
        let storage = MockStorage::new();
        let mut tx = storage.begin().unwrap();
        tx.apply(&WriteStatement::UpsertTag(make_test_tag("a"))).unwrap();
        tx.apply(&WriteStatement::UpsertTag(make_test_tag("b"))).unwrap();
        // Not visible before commit
        assert_eq!(storage.tag_count(), 0);
        tx.commit().unwrap();
        assert_eq!(storage.tag_count(), 2);
        assert_eq!(storage.statement_count(), 2);
    }

    #[test]
    fn test_transaction_rollback_discards() {
        let storage = MockStorage::new();
        let mut tx = storage.begin().unwrap();
        tx.apply(&WriteStatement::UpsertTag(make_test_tag("a"))).unwrap();
        tx.rollback().unwrap();
        assert_eq!(storage.tag_count(), 0);
        assert_eq!(storage.rollback_count(), 1);
    }

    #[test]
    fn test_injected_tag_failure() {
        let storage = MockStorage::new();
        storage.fail_tag("bad");
        assert!(storage.tag_upsert(&make_test_tag("bad")).is_err());
        assert!(storage.tag_upsert(&make_test_tag("good")).is_ok());

        storage.clear_failures();
        assert!(storage.tag_upsert(&make_test_tag("bad")).is_ok());
    }

    #[test]
    fn test_injected_commit_failure() {
        let storage = MockStorage::new();
        storage.fail_next_commits(1);
        let err = storage.tag_upsert(&make_test_tag("a")).unwrap_err();
        assert!(matches!(
            err,
            TagstoreError::Storage(StorageError::TransactionFailed { .. })
        ));
        assert_eq!(storage.tag_count(), 0);
        storage.tag_upsert(&make_test_tag("a")).unwrap();
        assert_eq!(storage.tag_count(), 1);
    }

    #[test]
    fn test_purge_all() {
        let storage = MockStorage::new();
        storage.tag_upsert(&make_test_tag("a")).unwrap();
        storage
            .request_insert(&TagRequest::new(1, Uuid::new_v4(), "steve", "[B]"))
            .unwrap();
        storage.purge_all().unwrap();
        assert_eq!(storage.tag_count(), 0);
        assert_eq!(storage.request_count(), 0);
    }

    #[test]
    fn test_statement_touched_tag() {
        assert_eq!(
            WriteStatement::DeleteTag("vip".into()).touched_tag(),
            Some("vip")
        );
        assert_eq!(WriteStatement::DeleteRequest(3).touched_tag(), None);
        assert!(WriteStatement::DeleteRequest(3).touches_requests());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use tagstore_core::TagKind;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Get of a name never written returns None.
        #[test]
        fn prop_storage_not_found_returns_none(name in "[a-z]{1,16}") {
            let storage = MockStorage::new();
            prop_assert!(storage.tag_get(&name).unwrap().is_none());
            prop_assert!(storage.tag_get_by_display(&name).unwrap().is_none());
        }

        /// A failed statement inside a transaction leaves storage untouched
        /// once the transaction is rolled back.
        #[test]
        fn prop_failed_transaction_publishes_nothing(
            names in prop::collection::hash_set("[a-z]{1,8}", 1..10)
        ) {
            let storage = MockStorage::new();
            let mut tx = storage.begin().unwrap();
            for name in &names {
                tx.apply(&WriteStatement::UpsertTag(Tag::new(name.clone(), "X", TagKind::Both))).unwrap();
            }
            let missing = WriteStatement::DeleteTag("MISSING".into());
            prop_assert!(tx.apply(&missing).is_err());
            tx.rollback().unwrap();
            prop_assert_eq!(storage.tag_count(), 0);
        }
    }
}
