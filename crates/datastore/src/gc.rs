//! Hand-off of recyclable slots to the external garbage collector.
//!
//! The transaction manager produces the entries at commit and abort but
//! performs no reclamation itself. The collector pops entries and, once
//! [`min_active_begin_cid`](crate::manager::TimestampOrderingTransactionManager::min_active_begin_cid)
//! has passed the version's end, may reuse the slot (and drop the primary
//! index entry when `delete_from_index` is set).

use crossbeam_queue::SegQueue;
use mica_primitives::ItemPointer;

/// One slot ready for recycling.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RecycledVersion {
    pub location: ItemPointer,
    /// Whether the collector must also remove the primary index entry.
    /// Set exactly once per logical tuple removal.
    pub delete_from_index: bool,
}

/// Lock-free queue between transaction ends and the collector.
#[derive(Default)]
pub struct GcQueue {
    queue: SegQueue<RecycledVersion>,
}

impl GcQueue {
    pub(crate) fn push(&self, version: RecycledVersion) {
        self.queue.push(version);
    }

    pub fn pop(&self) -> Option<RecycledVersion> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Pops everything currently queued.
    pub fn drain(&self) -> Vec<RecycledVersion> {
        std::iter::from_fn(|| self.pop()).collect()
    }
}
