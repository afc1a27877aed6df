//! The timestamp-ordering transaction manager.
//!
//! Optimistic, single-timestamp TSO: a transaction's begin commit id doubles
//! as its commit timestamp. Writers serialize on a slot through a
//! compare-and-swap on the header's txn-id; readers stamp the slot's
//! last-reader commit id under the slot spinlock so a writer that would
//! invalidate an already-observed version fails fast. Every conflict
//! surfaces as `false` and the executor decides whether to abort; nothing
//! in here blocks or retries.

use crate::gc::{GcQueue, RecycledVersion};
use crate::stats::StatsSink;
use crate::tx::{RwType, TransactionContext, TxnResult};
use crate::wal::WriteAheadLog;
use enum_as_inner::EnumAsInner;
use mica_primitives::{
    Cid, IndirectionPointer, ItemPointer, Oid, TileGroupId, TxnId, INITIAL_TXN_ID, INVALID_CID,
    INVALID_TXN_ID, MAX_CID, START_CID, START_TXN_ID,
};
use mica_table::{CatalogManager, TileGroup, TileGroupHeader};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::sync::Arc;

/// How a version relates to a reading transaction.
#[derive(Clone, Copy, PartialEq, Eq, Debug, EnumAsInner)]
pub enum Visibility {
    /// Not visible: uncommitted by another transaction, already expired, or
    /// a dead slot.
    Invisible,
    /// Committed after the reader began; an older version may still apply.
    InvisibleFuture,
    /// The reader's own tombstone: this transaction deleted the tuple.
    Deleted,
    Visible,
}

pub struct TimestampOrderingTransactionManager {
    catalog: Arc<CatalogManager>,
    wal: Arc<dyn WriteAheadLog>,
    stats: Arc<dyn StatsSink>,
    gc_queue: Arc<GcQueue>,

    next_txn_id: AtomicU64,
    next_cid: AtomicU64,

    /// begin commit ids of live transactions, for the GC's lower bound.
    active_txns: Mutex<BTreeMap<TxnId, Cid>>,
    /// Monotonic cache of [`Self::min_active_begin_cid`].
    watermark: AtomicU64,
}

impl TimestampOrderingTransactionManager {
    pub fn new(
        catalog: Arc<CatalogManager>,
        wal: Arc<dyn WriteAheadLog>,
        stats: Arc<dyn StatsSink>,
        gc_queue: Arc<GcQueue>,
    ) -> Self {
        Self {
            catalog,
            wal,
            stats,
            gc_queue,
            next_txn_id: AtomicU64::new(START_TXN_ID),
            next_cid: AtomicU64::new(START_CID),
            active_txns: Mutex::new(BTreeMap::new()),
            watermark: AtomicU64::new(START_CID),
        }
    }

    pub fn catalog(&self) -> &Arc<CatalogManager> {
        &self.catalog
    }

    fn tile_group(&self, id: TileGroupId) -> Arc<TileGroup> {
        self.catalog
            .tile_group(id)
            .expect("tilegroup must stay registered while transactions reference it")
    }

    // Lifecycle.

    pub fn begin_transaction(&self, read_only: bool) -> TransactionContext {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::Relaxed);
        let begin_cid = self.next_cid.fetch_add(1, Ordering::Relaxed);
        self.active_txns.lock().insert(txn_id, begin_cid);
        log::trace!("beginning txn {txn_id} (begin cid {begin_cid}, read_only {read_only})");
        TransactionContext::new(txn_id, begin_cid, read_only)
    }

    /// Releases the transaction: hands its GC set to the collector queue and
    /// drops it from the active set.
    pub fn end_transaction(&self, mut txn: TransactionContext) {
        for (tile_group_id, slots) in txn.take_gc_set() {
            for (offset, delete_from_index) in slots {
                self.gc_queue.push(RecycledVersion {
                    location: ItemPointer::new(tile_group_id, offset),
                    delete_from_index,
                });
            }
        }
        self.active_txns.lock().remove(&txn.txn_id());
    }

    /// A monotonic lower bound on the begin commit id of every active
    /// transaction. The GC must not recycle a version whose end commit id is
    /// at or above this bound.
    pub fn min_active_begin_cid(&self) -> Cid {
        let candidate = {
            let active = self.active_txns.lock();
            active
                .values()
                .copied()
                .min()
                .unwrap_or_else(|| self.next_cid.load(Ordering::Relaxed))
        };
        let previous = self.watermark.fetch_max(candidate, Ordering::AcqRel);
        previous.max(candidate)
    }

    // Ownership predicates.

    pub fn is_owner(&self, txn: &TransactionContext, header: &TileGroupHeader, offset: Oid) -> bool {
        header.transaction_id(offset) == txn.txn_id()
    }

    /// Whether the slot is the latest committed version and unlocked, i.e.
    /// this transaction could take ownership of it.
    pub fn is_ownable(&self, _txn: &TransactionContext, header: &TileGroupHeader, offset: Oid) -> bool {
        header.transaction_id(offset) == INITIAL_TXN_ID && header.end_commit_id(offset) == MAX_CID
    }

    /// Takes the write lock on the slot. Fails when another transaction beat
    /// us to it, or when a reader with a later timestamp already observed
    /// this version (writing under it would break timestamp ordering). The
    /// caller converts the failure into an abort.
    pub fn acquire_ownership(
        &self,
        txn: &TransactionContext,
        header: &TileGroupHeader,
        offset: Oid,
    ) -> bool {
        header.try_acquire_ownership(offset, txn.txn_id(), txn.begin_cid())
    }

    /// Releases a write lock taken by [`Self::acquire_ownership`] without
    /// having written anything.
    pub fn yield_ownership(&self, txn: &TransactionContext, header: &TileGroupHeader, offset: Oid) {
        let released = header.cas_transaction_id(offset, txn.txn_id(), INITIAL_TXN_ID);
        assert!(released, "yielded a slot this transaction did not own");
    }

    // Visibility.

    /// Classifies the version at `offset` for `txn`.
    ///
    /// The txn-id is loaded with acquire ordering first, so once a released
    /// (committed) version is observed, its commit ids and chain links are
    /// fully populated.
    pub fn visibility(
        &self,
        txn: &TransactionContext,
        header: &TileGroupHeader,
        offset: Oid,
    ) -> Visibility {
        let slot_txn = header.transaction_id(offset);
        let begin = header.begin_commit_id(offset);
        let end = header.end_commit_id(offset);

        if slot_txn == txn.txn_id() {
            // Our own version.
            if end == INVALID_CID {
                Visibility::Deleted
            } else if begin == MAX_CID || begin <= txn.begin_cid() {
                Visibility::Visible
            } else {
                Visibility::InvisibleFuture
            }
        } else if slot_txn == INVALID_TXN_ID {
            // Empty slot, aborted version, or committed tombstone. A
            // committed delete manifests as "no visible version" once the
            // walk runs past it.
            Visibility::Invisible
        } else if begin == MAX_CID {
            // Uncommitted write of another transaction.
            Visibility::Invisible
        } else if begin > txn.begin_cid() {
            Visibility::InvisibleFuture
        } else if txn.begin_cid() < end {
            Visibility::Visible
        } else {
            Visibility::Invisible
        }
    }

    // Tuple operations.

    /// Reads the version at `location`; with `acquire_ownership` the read
    /// also takes the write lock (select-for-update).
    ///
    /// `false` means a conflict: the slot is locked by another transaction,
    /// or its last-reader stamp could not be raised.
    #[must_use]
    pub fn perform_read(
        &self,
        txn: &mut TransactionContext,
        location: ItemPointer,
        acquire_ownership: bool,
    ) -> bool {
        debug_assert!(
            !(acquire_ownership && txn.is_read_only()),
            "select-for-update inside a read-only transaction"
        );
        let tile_group = self.tile_group(location.block);
        let header = tile_group.header();
        let offset = location.offset;

        if txn.is_read_only() {
            // Read-only transactions never block writers and leave no
            // last-reader trace; their begin cid is already protected by the
            // GC watermark.
            self.stats.record_table_read(location.block);
            return true;
        }

        if acquire_ownership && !self.is_owner(txn, header, offset) {
            if !self.is_ownable(txn, header, offset) {
                return false;
            }
            if !self.acquire_ownership(txn, header, offset) {
                return false;
            }
            txn.record_read_own(location);
        }

        if self.is_owner(txn, header, offset) {
            // Never read a version a later reader already observed.
            assert!(header.last_reader_commit_id(offset) <= txn.begin_cid());
            self.stats.record_table_read(location.block);
            return true;
        }

        if header.set_last_reader_commit_id(offset, txn.begin_cid(), txn.txn_id()) {
            txn.record_read(location);
            self.stats.record_table_read(location.block);
            true
        } else {
            // Write-locked by a concurrent transaction.
            false
        }
    }

    /// Registers a freshly inserted tuple: initializes the slot's reserved
    /// area, stores the indirection backpointer and records the insert.
    ///
    /// The slot's txn-id was already set to `txn` when the slot was claimed
    /// from the table.
    pub fn perform_insert(
        &self,
        txn: &mut TransactionContext,
        location: ItemPointer,
        index_entry: Option<IndirectionPointer>,
    ) {
        assert!(!txn.is_read_only());
        let tile_group = self.tile_group(location.block);
        let header = tile_group.header();
        debug_assert_eq!(header.transaction_id(location.offset), txn.txn_id());

        header.init_tuple_reserved(location.offset);
        if let Some(entry) = index_entry {
            header.set_indirection(location.offset, entry);
        }
        txn.record_insert(location);
        self.stats.record_table_insert(location.block);
    }

    /// Links `new_location` as the successor version of `old_location`,
    /// newest-first, and swings the indirection head when the old version
    /// was the chain head.
    ///
    /// `false` means this transaction does not own the old version
    /// (ownership denied); nothing is linked in that case.
    #[must_use]
    pub fn perform_update(
        &self,
        txn: &mut TransactionContext,
        old_location: ItemPointer,
        new_location: ItemPointer,
    ) -> bool {
        assert!(!txn.is_read_only());
        log::trace!(
            "txn {}: update ({}, {}) -> ({}, {})",
            txn.txn_id(),
            old_location.block,
            old_location.offset,
            new_location.block,
            new_location.offset
        );

        let tile_group = self.tile_group(old_location.block);
        let header = tile_group.header();
        if !self.is_owner(txn, header, old_location.offset) {
            return false;
        }

        let new_tile_group = self.tile_group(new_location.block);
        let new_header = new_tile_group.header();
        debug_assert_eq!(new_header.transaction_id(new_location.offset), INVALID_TXN_ID);
        debug_assert_eq!(new_header.begin_commit_id(new_location.offset), MAX_CID);
        debug_assert_eq!(new_header.end_commit_id(new_location.offset), MAX_CID);

        self.link_new_version(txn, (header, old_location), (new_header, new_location));

        txn.record_update(old_location);
        self.stats.record_table_update(new_location.block);
        true
    }

    /// The in-place variant: the executor already mutated the owned slot's
    /// payload directly, so only the read-write set needs updating.
    pub fn perform_update_in_place(&self, txn: &mut TransactionContext, location: ItemPointer) {
        assert!(!txn.is_read_only());
        let tile_group = self.tile_group(location.block);
        let header = tile_group.header();
        debug_assert_eq!(header.transaction_id(location.offset), txn.txn_id());
        debug_assert_eq!(header.begin_commit_id(location.offset), MAX_CID);
        debug_assert_eq!(header.end_commit_id(location.offset), MAX_CID);

        // An in-place update of a version this transaction just created:
        // the update set tracks the *old* version, which is the next link.
        let old_location = header.next_item_pointer(location.offset);
        if !old_location.is_null() {
            txn.record_update(old_location);
        }
        self.stats.record_table_update(location.block);
    }

    /// Like [`Self::perform_update`], but the new version is an empty
    /// tombstone: its end commit id is the `INVALID_CID` marker.
    #[must_use]
    pub fn perform_delete(
        &self,
        txn: &mut TransactionContext,
        old_location: ItemPointer,
        new_location: ItemPointer,
    ) -> bool {
        assert!(!txn.is_read_only());
        log::trace!(
            "txn {}: delete ({}, {})",
            txn.txn_id(),
            old_location.block,
            old_location.offset
        );

        let tile_group = self.tile_group(old_location.block);
        let header = tile_group.header();
        if !self.is_owner(txn, header, old_location.offset) {
            return false;
        }
        debug_assert!(header.last_reader_commit_id(old_location.offset) <= txn.begin_cid());

        let new_tile_group = self.tile_group(new_location.block);
        let new_header = new_tile_group.header();
        debug_assert_eq!(new_header.transaction_id(new_location.offset), INVALID_TXN_ID);
        debug_assert_eq!(new_header.begin_commit_id(new_location.offset), MAX_CID);
        debug_assert_eq!(new_header.end_commit_id(new_location.offset), MAX_CID);

        new_header.set_end_commit_id(new_location.offset, INVALID_CID);
        self.link_new_version(txn, (header, old_location), (new_header, new_location));

        txn.record_delete(old_location);
        self.stats.record_table_delete(old_location.block);
        true
    }

    /// The in-place variant: tombstones a version this transaction created
    /// itself (an own insert, or the new version of an own update).
    pub fn perform_delete_in_place(&self, txn: &mut TransactionContext, location: ItemPointer) {
        assert!(!txn.is_read_only());
        let tile_group = self.tile_group(location.block);
        let header = tile_group.header();
        debug_assert_eq!(header.transaction_id(location.offset), txn.txn_id());
        debug_assert_eq!(header.begin_commit_id(location.offset), MAX_CID);

        header.set_end_commit_id(location.offset, INVALID_CID);

        let old_location = header.next_item_pointer(location.offset);
        if !old_location.is_null() {
            // Deleting the new version of an own update: the delete set
            // tracks the old version.
            txn.record_delete(old_location);
        } else {
            // Deleting an own insert.
            txn.record_delete(location);
        }
        self.stats.record_table_delete(location.block);
    }

    /// Splices `(new_header, new_location)` in on the newer side of
    /// `(header, old_location)` and publishes the head swing.
    fn link_new_version(
        &self,
        txn: &TransactionContext,
        (header, old_location): (&TileGroupHeader, ItemPointer),
        (new_header, new_location): (&TileGroupHeader, ItemPointer),
    ) {
        // old_prev is the version *newer* than the old version, if any.
        let old_prev = header.prev_item_pointer(old_location.offset);

        header.set_prev_item_pointer(old_location.offset, new_location);
        new_header.set_prev_item_pointer(new_location.offset, old_prev);
        new_header.set_next_item_pointer(new_location.offset, old_location);
        new_header.set_transaction_id(new_location.offset, txn.txn_id());

        // The new version must be fully linked before any thread can reach
        // it through the chain or the indirection head.
        fence(Ordering::Release);

        if !old_prev.is_null() {
            // Mid-chain splice: route the newer version's next link at us.
            let prev_tile_group = self.tile_group(old_prev.block);
            prev_tile_group
                .header()
                .set_next_item_pointer(old_prev.offset, new_location);
        }

        new_header.init_tuple_reserved(new_location.offset);

        if old_prev.is_null() {
            // We replaced the chain head: carry the indirection backpointer
            // over and swing the cell. Tables without a primary index have
            // no cell to swing.
            let index_entry = header.indirection(old_location.offset);
            if !index_entry.is_null() {
                new_header.set_indirection(new_location.offset, index_entry);
                let swung = self
                    .catalog
                    .cas_indirection_head(index_entry, old_location, new_location)
                    .expect("indirection array must stay registered while the chain lives");
                // We hold the write lock on the old version, so nothing else
                // can move the head.
                assert!(swung, "indirection head moved while the version was write-locked");
            }
        }
    }

    // Commit & abort.

    /// Installs every write of `txn` at its begin commit id, emits the log
    /// records, releases ownership and ends the transaction.
    pub fn commit_transaction(&self, mut txn: TransactionContext) -> TxnResult {
        log::trace!("committing txn {}", txn.txn_id());

        if txn.is_read_only() {
            self.end_transaction(txn);
            return TxnResult::Success;
        }

        // Single-timestamp optimistic TSO: commit at the begin timestamp.
        let end_commit_cid = txn.begin_cid();
        self.wal.log_begin_transaction(end_commit_cid);

        let rw_set = txn.take_rw_set();
        for (tile_group_id, slots) in rw_set {
            let tile_group = self.tile_group(tile_group_id);
            let header = tile_group.header();
            for (offset, rw) in slots {
                match rw {
                    RwType::Read => {}
                    RwType::ReadOwn => {
                        // Ownership acquired but never written: just unlock.
                        self.yield_ownership(&txn, header, offset);
                    }
                    RwType::Update => {
                        // Only one version may be visible at any instant:
                        // finish the new version, close the old one, then
                        // release both locks.
                        let new_version = header.prev_item_pointer(offset);
                        assert!(!new_version.is_null());
                        let inherited_end = header.end_commit_id(offset);
                        assert!(inherited_end > end_commit_cid);

                        let new_tile_group = self.tile_group(new_version.block);
                        let new_header = new_tile_group.header();
                        new_header.set_begin_commit_id(new_version.offset, end_commit_cid);
                        new_header.set_end_commit_id(new_version.offset, inherited_end);

                        fence(Ordering::Release);

                        header.set_end_commit_id(offset, end_commit_cid);

                        fence(Ordering::Release);

                        new_header.set_transaction_id(new_version.offset, INITIAL_TXN_ID);
                        header.set_transaction_id(offset, INITIAL_TXN_ID);

                        let old_location = ItemPointer::new(tile_group_id, offset);
                        txn.record_gc(old_location, false);
                        self.wal.log_update(end_commit_cid, old_location, new_version);
                    }
                    RwType::Delete => {
                        let new_version = header.prev_item_pointer(offset);
                        assert!(!new_version.is_null());
                        let inherited_end = header.end_commit_id(offset);
                        assert!(inherited_end > end_commit_cid);

                        let new_tile_group = self.tile_group(new_version.block);
                        let new_header = new_tile_group.header();
                        new_header.set_begin_commit_id(new_version.offset, end_commit_cid);
                        new_header.set_end_commit_id(new_version.offset, inherited_end);

                        fence(Ordering::Release);

                        header.set_end_commit_id(offset, end_commit_cid);

                        fence(Ordering::Release);

                        // The tombstone is dead on arrival; the old version
                        // is the one the GC must unindex.
                        new_header.set_transaction_id(new_version.offset, INVALID_TXN_ID);
                        header.set_transaction_id(offset, INITIAL_TXN_ID);

                        let old_location = ItemPointer::new(tile_group_id, offset);
                        txn.record_gc(old_location, true);
                        txn.record_gc(new_version, false);
                        self.wal.log_delete(end_commit_cid, old_location);
                    }
                    RwType::Insert => {
                        debug_assert_eq!(header.transaction_id(offset), txn.txn_id());
                        header.set_begin_commit_id(offset, end_commit_cid);
                        header.set_end_commit_id(offset, MAX_CID);

                        fence(Ordering::Release);

                        header.set_transaction_id(offset, INITIAL_TXN_ID);
                        self.wal
                            .log_insert(end_commit_cid, ItemPointer::new(tile_group_id, offset));
                    }
                    RwType::InsDel => {
                        debug_assert_eq!(header.transaction_id(offset), txn.txn_id());
                        header.set_begin_commit_id(offset, MAX_CID);
                        header.set_end_commit_id(offset, MAX_CID);

                        fence(Ordering::Release);

                        header.set_transaction_id(offset, INVALID_TXN_ID);
                        // The tuple never existed outside this transaction;
                        // no log record, but the index entry must go.
                        txn.record_gc(ItemPointer::new(tile_group_id, offset), true);
                    }
                }
            }
        }

        let result = txn.result();
        self.stats.record_txn_committed();
        self.end_transaction(txn);
        result
    }

    /// Rolls every write of `txn` back, unlinking the versions it installed,
    /// and ends the transaction.
    pub fn abort_transaction(&self, mut txn: TransactionContext) -> TxnResult {
        // A declared read-only transaction has nothing to abort.
        assert!(!txn.is_read_only());
        log::trace!("aborting txn {}", txn.txn_id());

        let rw_set = txn.take_rw_set();
        for (tile_group_id, slots) in rw_set {
            let tile_group = self.tile_group(tile_group_id);
            let header = tile_group.header();
            for (offset, rw) in slots {
                match rw {
                    RwType::Read => {}
                    RwType::ReadOwn => {
                        self.yield_ownership(&txn, header, offset);
                    }
                    RwType::Update | RwType::Delete => {
                        let new_version = header.prev_item_pointer(offset);
                        let new_tile_group = self.tile_group(new_version.block);
                        let new_header = new_tile_group.header();

                        new_header.set_begin_commit_id(new_version.offset, MAX_CID);
                        new_header.set_end_commit_id(new_version.offset, MAX_CID);

                        fence(Ordering::Release);

                        // The aborted version is already spliced in; unlink
                        // it. If it became the chain head, the indirection
                        // cell must point back at the old version *before*
                        // the splice is undone.
                        let old_location = ItemPointer::new(tile_group_id, offset);
                        let old_prev = new_header.prev_item_pointer(new_version.offset);

                        if old_prev.is_null() {
                            debug_assert_eq!(header.end_commit_id(offset), MAX_CID);
                            let index_entry = header.indirection(offset);
                            if !index_entry.is_null() {
                                let swung = self
                                    .catalog
                                    .cas_indirection_head(index_entry, new_version, old_location)
                                    .expect("indirection array must stay registered while the chain lives");
                                assert!(swung, "indirection head moved during abort");
                            }
                        }

                        fence(Ordering::Release);

                        new_header.set_transaction_id(new_version.offset, INVALID_TXN_ID);

                        if !old_prev.is_null() {
                            let prev_tile_group = self.tile_group(old_prev.block);
                            prev_tile_group
                                .header()
                                .set_next_item_pointer(old_prev.offset, old_location);
                        }
                        header.set_prev_item_pointer(offset, old_prev);

                        fence(Ordering::Release);

                        header.set_transaction_id(offset, INITIAL_TXN_ID);
                        txn.record_gc(new_version, false);
                    }
                    RwType::Insert | RwType::InsDel => {
                        header.set_begin_commit_id(offset, MAX_CID);
                        header.set_end_commit_id(offset, MAX_CID);

                        fence(Ordering::Release);

                        header.set_transaction_id(offset, INVALID_TXN_ID);
                        txn.record_gc(ItemPointer::new(tile_group_id, offset), true);
                    }
                }
            }
        }

        txn.set_result(TxnResult::Aborted);
        self.stats.record_txn_aborted();
        self.end_transaction(txn);
        TxnResult::Aborted
    }
}
