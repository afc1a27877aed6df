//! Per-slot MVCC metadata.
//!
//! Every tuple slot of a tilegroup has one [`SlotHeader`]: the owning txn-id,
//! the `[begin, end)` commit interval, the doubly linked version-chain
//! pointers (`prev` = newer, `next` = older), the backpointer to the
//! indirection cell whose head this slot is, and a reserved area holding the
//! slot spinlock and the last-reader commit id.
//!
//! Synchronization contract: the txn-id is the publication word. Writers
//! finish populating commit ids and chain links, issue a release, and only
//! then store the txn-id; readers load the txn-id with acquire before
//! dereferencing anything else. All other fields use relaxed atomics, with
//! the transaction manager placing explicit release fences at the points
//! where a half-linked version must not become observable.

use mica_primitives::{
    static_assert_size, Cid, IndirectionPointer, ItemPointer, Oid, TxnId, INITIAL_TXN_ID,
    INVALID_TXN_ID, MAX_CID,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// MVCC metadata for one tuple slot.
#[derive(Debug)]
struct SlotHeader {
    txn_id: AtomicU64,
    begin_cid: AtomicU64,
    end_cid: AtomicU64,
    /// Packed [`ItemPointer`] to the next *newer* version.
    prev: AtomicU64,
    /// Packed [`ItemPointer`] to the next *older* version.
    next: AtomicU64,
    /// Packed [`IndirectionPointer`] backpointer; meaningful while this slot
    /// is the chain head.
    indirection: AtomicU64,
    /// The slot spinlock guarding the last-reader commit id.
    reserved: Mutex<Cid>,
}

static_assert_size!(SlotHeader, 64);

impl SlotHeader {
    fn fresh() -> Self {
        Self {
            txn_id: AtomicU64::new(INVALID_TXN_ID),
            begin_cid: AtomicU64::new(MAX_CID),
            end_cid: AtomicU64::new(MAX_CID),
            prev: AtomicU64::new(ItemPointer::NULL.to_packed()),
            next: AtomicU64::new(ItemPointer::NULL.to_packed()),
            indirection: AtomicU64::new(IndirectionPointer::NULL.to_packed()),
            reserved: Mutex::new(0),
        }
    }
}

/// The header block of one tilegroup: slot metadata plus the append-only
/// slot allocator.
#[derive(Debug)]
pub struct TileGroupHeader {
    slots: Box<[SlotHeader]>,
    next_tuple_slot: AtomicU32,
}

impl TileGroupHeader {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| SlotHeader::fresh()).collect(),
            next_tuple_slot: AtomicU32::new(0),
        }
    }

    /// Capacity in slots.
    pub fn allocated_tuple_count(&self) -> Oid {
        self.slots.len() as Oid
    }

    /// Number of slots handed out so far (may exceed capacity transiently
    /// under allocation races; clamp when displaying).
    pub fn current_next_tuple_slot(&self) -> Oid {
        self.next_tuple_slot.load(Ordering::Relaxed)
    }

    /// Reserves the next unused slot index, or `None` when the tilegroup is
    /// full and the caller must rotate to a fresh one.
    pub fn next_empty_tuple_slot(&self) -> Option<Oid> {
        let slot = self.next_tuple_slot.fetch_add(1, Ordering::Relaxed);
        (slot < self.allocated_tuple_count()).then_some(slot)
    }

    fn slot(&self, offset: Oid) -> &SlotHeader {
        &self.slots[offset as usize]
    }

    // Owner word. The acquire/release pair here is the one cross-thread
    // synchronization point of the whole header.

    pub fn transaction_id(&self, offset: Oid) -> TxnId {
        self.slot(offset).txn_id.load(Ordering::Acquire)
    }

    pub fn set_transaction_id(&self, offset: Oid, txn_id: TxnId) {
        self.slot(offset).txn_id.store(txn_id, Ordering::Release);
    }

    /// Compare-and-swap on the owner word; `true` on success.
    pub fn cas_transaction_id(&self, offset: Oid, expected: TxnId, new: TxnId) -> bool {
        self.slot(offset)
            .txn_id
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Takes the write lock for `txn_id` if the slot is unowned and no
    /// reader with a timestamp above `begin_cid` has observed it.
    ///
    /// The slot spinlock is held across the check and the CAS, so a racing
    /// reader cannot stamp a later timestamp in between: it either stamped
    /// before (we refuse) or blocks until we own the slot (it refuses).
    pub fn try_acquire_ownership(&self, offset: Oid, txn_id: TxnId, begin_cid: Cid) -> bool {
        let last_reader = self.slot(offset).reserved.lock();
        if *last_reader > begin_cid {
            return false;
        }
        self.cas_transaction_id(offset, INITIAL_TXN_ID, txn_id)
    }

    // Commit interval.

    pub fn begin_commit_id(&self, offset: Oid) -> Cid {
        self.slot(offset).begin_cid.load(Ordering::Relaxed)
    }

    pub fn set_begin_commit_id(&self, offset: Oid, cid: Cid) {
        self.slot(offset).begin_cid.store(cid, Ordering::Relaxed);
    }

    pub fn end_commit_id(&self, offset: Oid) -> Cid {
        self.slot(offset).end_cid.load(Ordering::Relaxed)
    }

    pub fn set_end_commit_id(&self, offset: Oid, cid: Cid) {
        self.slot(offset).end_cid.store(cid, Ordering::Relaxed);
    }

    // Version-chain links.

    pub fn prev_item_pointer(&self, offset: Oid) -> ItemPointer {
        ItemPointer::from_packed(self.slot(offset).prev.load(Ordering::Relaxed))
    }

    pub fn set_prev_item_pointer(&self, offset: Oid, ptr: ItemPointer) {
        self.slot(offset).prev.store(ptr.to_packed(), Ordering::Relaxed);
    }

    pub fn next_item_pointer(&self, offset: Oid) -> ItemPointer {
        ItemPointer::from_packed(self.slot(offset).next.load(Ordering::Relaxed))
    }

    pub fn set_next_item_pointer(&self, offset: Oid, ptr: ItemPointer) {
        self.slot(offset).next.store(ptr.to_packed(), Ordering::Relaxed);
    }

    // Indirection backpointer.

    pub fn indirection(&self, offset: Oid) -> IndirectionPointer {
        IndirectionPointer::from_packed(self.slot(offset).indirection.load(Ordering::Relaxed))
    }

    pub fn set_indirection(&self, offset: Oid, ptr: IndirectionPointer) {
        self.slot(offset)
            .indirection
            .store(ptr.to_packed(), Ordering::Relaxed);
    }

    // Reserved area: slot spinlock + last-reader commit id.

    /// (Re-)initializes the reserved area when the slot is handed out.
    /// Idempotent, so a slot recycled by the GC can be initialized again.
    pub fn init_tuple_reserved(&self, offset: Oid) {
        *self.slot(offset).reserved.lock() = 0;
    }

    /// Raises the last-reader commit id to `cid` under the slot spinlock.
    ///
    /// Fails (without writing) when the slot is write-locked by a
    /// transaction other than `reader`; the last-reader value never
    /// decreases.
    pub fn set_last_reader_commit_id(&self, offset: Oid, cid: Cid, reader: TxnId) -> bool {
        let mut last_reader = self.slot(offset).reserved.lock();
        let owner = self.transaction_id(offset);
        if owner != INITIAL_TXN_ID && owner != reader {
            return false;
        }
        *last_reader = (*last_reader).max(cid);
        true
    }

    pub fn last_reader_commit_id(&self, offset: Oid) -> Cid {
        *self.slot(offset).reserved.lock()
    }

    /// Copies every slot's metadata (and the allocator position) from
    /// `other`. Used by layout transformation, which rebuilds a tilegroup's
    /// value storage but must preserve all MVCC state bit-for-bit.
    pub fn copy_from(&self, other: &TileGroupHeader) {
        assert_eq!(self.slots.len(), other.slots.len());
        for offset in 0..other.slots.len() as Oid {
            let src = other.slot(offset);
            let dst = self.slot(offset);
            dst.begin_cid
                .store(src.begin_cid.load(Ordering::Relaxed), Ordering::Relaxed);
            dst.end_cid
                .store(src.end_cid.load(Ordering::Relaxed), Ordering::Relaxed);
            dst.prev.store(src.prev.load(Ordering::Relaxed), Ordering::Relaxed);
            dst.next.store(src.next.load(Ordering::Relaxed), Ordering::Relaxed);
            dst.indirection
                .store(src.indirection.load(Ordering::Relaxed), Ordering::Relaxed);
            *dst.reserved.lock() = *src.reserved.lock();
            dst.txn_id
                .store(src.txn_id.load(Ordering::Acquire), Ordering::Release);
        }
        self.next_tuple_slot
            .store(other.next_tuple_slot.load(Ordering::Relaxed), Ordering::Relaxed);
    }
}
