//! Per-operation write queues.
//!
//! Each operation kind has its own lock-free FIFO. Producers never block;
//! the batch processor is the only consumer and removes items before it
//! executes them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_queue::SegQueue;
use serde::Serialize;
use tagstore_core::{AttributeValue, Tag, TagAttribute, TagRequest, TagResult};
use tagstore_storage::WriteStatement;

/// Completion callback for a write. Receives the final outcome exactly once.
pub type WriteCallback = Box<dyn FnOnce(TagResult<()>) + Send + 'static>;

/// Write operation kinds, one queue each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    AddTag,
    DeleteTag,
    UpdateAttribute,
    AddRequest,
    DeleteRequest,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        OperationKind::AddTag,
        OperationKind::DeleteTag,
        OperationKind::UpdateAttribute,
        OperationKind::AddRequest,
        OperationKind::DeleteRequest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddTag => "add_tag",
            Self::DeleteTag => "delete_tag",
            Self::UpdateAttribute => "update_attribute",
            Self::AddRequest => "add_request",
            Self::DeleteRequest => "delete_request",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Self::AddTag => 0,
            Self::DeleteTag => 1,
            Self::UpdateAttribute => 2,
            Self::AddRequest => 3,
            Self::DeleteRequest => 4,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueItem {
    AddTag(Tag),
    DeleteTag(String),
    UpdateAttribute {
        name: String,
        attribute: TagAttribute,
        value: AttributeValue,
    },
    AddRequest(TagRequest),
    DeleteRequest(i64),
}

impl QueueItem {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::AddTag(_) => OperationKind::AddTag,
            Self::DeleteTag(_) => OperationKind::DeleteTag,
            Self::UpdateAttribute { .. } => OperationKind::UpdateAttribute,
            Self::AddRequest(_) => OperationKind::AddRequest,
            Self::DeleteRequest(_) => OperationKind::DeleteRequest,
        }
    }
}

impl From<QueueItem> for WriteStatement {
    fn from(item: QueueItem) -> Self {
        match item {
            QueueItem::AddTag(tag) => WriteStatement::UpsertTag(tag),
            QueueItem::DeleteTag(name) => WriteStatement::DeleteTag(name),
            QueueItem::UpdateAttribute {
                name,
                attribute,
                value,
            } => WriteStatement::UpdateAttribute {
                name,
                attribute,
                value,
            },
            QueueItem::AddRequest(request) => WriteStatement::InsertRequest(request),
            QueueItem::DeleteRequest(id) => WriteStatement::DeleteRequest(id),
        }
    }
}

/// A queued write with its completion callback.
pub struct QueuedWrite {
    pub kind: OperationKind,
    pub statement: WriteStatement,
    pub callback: Option<WriteCallback>,
    pub enqueued_at: Instant,
}

impl QueuedWrite {
    pub fn new(item: QueueItem, callback: Option<WriteCallback>) -> Self {
        Self {
            kind: item.kind(),
            statement: item.into(),
            callback,
            enqueued_at: Instant::now(),
        }
    }
}

impl fmt::Debug for QueuedWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedWrite")
            .field("kind", &self.kind)
            .field("statement", &self.statement)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Unbounded FIFO queues, one per [`OperationKind`].
#[derive(Debug)]
pub struct WriteQueues {
    queues: [SegQueue<QueuedWrite>; 5],
    enqueued: [AtomicU64; 5],
    threshold: usize,
}

impl WriteQueues {
    /// `threshold` is the queue length at which an enqueue reports that a
    /// batch is ready.
    pub fn new(threshold: usize) -> Self {
        Self {
            queues: std::array::from_fn(|_| SegQueue::new()),
            enqueued: std::array::from_fn(|_| AtomicU64::new(0)),
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Append a write. Returns true when the queue holds at least a full
    /// batch afterwards.
    pub fn enqueue(&self, write: QueuedWrite) -> bool {
        let i = write.kind.index();
        self.queues[i].push(write);
        self.enqueued[i].fetch_add(1, Ordering::Relaxed);
        self.queues[i].len() >= self.threshold
    }

    /// Remove up to `max` writes of one kind in FIFO order.
    pub fn drain(&self, kind: OperationKind, max: usize) -> Vec<QueuedWrite> {
        let queue = &self.queues[kind.index()];
        let mut batch = Vec::with_capacity(max.min(queue.len()));
        while batch.len() < max {
            match queue.pop() {
                Some(write) => batch.push(write),
                None => break,
            }
        }
        batch
    }

    pub fn len(&self, kind: OperationKind) -> usize {
        self.queues[kind.index()].len()
    }

    pub fn total_len(&self) -> usize {
        self.queues.iter().map(SegQueue::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(SegQueue::is_empty)
    }

    /// Writes ever enqueued for `kind`.
    pub fn enqueued_total(&self, kind: OperationKind) -> u64 {
        self.enqueued[kind.index()].load(Ordering::Relaxed)
    }

    /// Current depth of every queue.
    pub fn depths(&self) -> Vec<(OperationKind, usize)> {
        OperationKind::ALL
            .iter()
            .map(|kind| (*kind, self.len(*kind)))
            .collect()
    }
}
