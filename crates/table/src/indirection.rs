//! The indirection layer between primary indexes and version chains.
//!
//! An index entry points at a *cell*, not at a tuple slot. The cell's single
//! atomic word holds the packed [`ItemPointer`] of the chain's current head,
//! so swinging the head (update publish, abort unlink) is one CAS and
//! readers never observe a half-written pointer.

use mica_primitives::{IndirectionArrayId, IndirectionPointer, ItemPointer, Oid};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Cells per indirection array. A table rotates to a fresh array when the
/// active one fills up, mirroring tilegroup rollover.
pub const INDIRECTION_ARRAY_CAPACITY: usize = 1024;

/// A dense array of atomic version-chain head pointers.
#[derive(Debug)]
pub struct IndirectionArray {
    id: IndirectionArrayId,
    cells: Box<[AtomicU64]>,
    next_cell: AtomicU32,
}

impl IndirectionArray {
    pub fn new(id: IndirectionArrayId) -> Self {
        Self::with_capacity(id, INDIRECTION_ARRAY_CAPACITY)
    }

    pub fn with_capacity(id: IndirectionArrayId, capacity: usize) -> Self {
        Self {
            id,
            cells: (0..capacity)
                .map(|_| AtomicU64::new(ItemPointer::NULL.to_packed()))
                .collect(),
            next_cell: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> IndirectionArrayId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// Claims the next unused cell, initializing it to `head`. `None` when
    /// the array is full and the caller must install a new one.
    pub fn allocate_cell(&self, head: ItemPointer) -> Option<IndirectionPointer> {
        let cell = self.next_cell.fetch_add(1, Ordering::Relaxed);
        if cell as usize >= self.cells.len() {
            return None;
        }
        self.cells[cell as usize].store(head.to_packed(), Ordering::Release);
        Some(IndirectionPointer::new(self.id, cell))
    }

    /// Atomically loads the chain head stored in `cell`.
    pub fn head(&self, cell: Oid) -> ItemPointer {
        ItemPointer::from_packed(self.cells[cell as usize].load(Ordering::Acquire))
    }

    /// Atomically swings `cell` from `expected` to `new`; `true` on success.
    ///
    /// Head swings happen only while holding the write lock on the versions
    /// involved, so contention here indicates a protocol violation in the
    /// caller rather than an expected race.
    pub fn cas_head(&self, cell: Oid, expected: ItemPointer, new: ItemPointer) -> bool {
        self.cells[cell as usize]
            .compare_exchange(
                expected.to_packed(),
                new.to_packed(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}
