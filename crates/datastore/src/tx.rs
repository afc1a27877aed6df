//! Per-transaction bookkeeping: the read-write set and the GC set.

use mica_primitives::{Cid, ItemPointer, Oid, TileGroupId, TxnId};
use std::collections::HashMap;

/// What a transaction has done to a slot so far.
///
/// The variants accumulate: a read can be promoted to `ReadOwn`, an owned
/// read to `Update` or `Delete`, and an insert deleted in the same
/// transaction collapses to `InsDel`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RwType {
    Read,
    /// Read with ownership acquired (select-for-update) but no write yet.
    ReadOwn,
    Update,
    Delete,
    Insert,
    /// Inserted and deleted by the same transaction; commits to nothing.
    InsDel,
}

/// Final status of a transaction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TxnResult {
    Success,
    Failure,
    Aborted,
}

/// The per-slot sets of a transaction, keyed tilegroup-first like the
/// physical layout so commit and abort touch each tilegroup once.
pub(crate) type SlotSet<T> = HashMap<TileGroupId, HashMap<Oid, T>>;

/// Everything the transaction manager tracks for one transaction.
///
/// The context is owned by the executing thread and handed back to the
/// manager at commit or abort; nothing in here is shared or locked.
pub struct TransactionContext {
    txn_id: TxnId,
    begin_cid: Cid,
    read_only: bool,
    rw_set: SlotSet<RwType>,
    /// Slots to hand to the GC; the flag is "also delete from index".
    gc_set: SlotSet<bool>,
    result: TxnResult,
}

impl TransactionContext {
    pub(crate) fn new(txn_id: TxnId, begin_cid: Cid, read_only: bool) -> Self {
        Self {
            txn_id,
            begin_cid,
            read_only,
            rw_set: HashMap::new(),
            gc_set: HashMap::new(),
            result: TxnResult::Success,
        }
    }

    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    pub fn begin_cid(&self) -> Cid {
        self.begin_cid
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn result(&self) -> TxnResult {
        self.result
    }

    pub(crate) fn set_result(&mut self, result: TxnResult) {
        self.result = result;
    }

    /// The operation recorded for a slot, if any.
    pub fn rw_entry(&self, location: ItemPointer) -> Option<RwType> {
        self.rw_set.get(&location.block)?.get(&location.offset).copied()
    }

    fn entry(&mut self, location: ItemPointer) -> &mut HashMap<Oid, RwType> {
        self.rw_set.entry(location.block).or_default()
    }

    pub(crate) fn record_read(&mut self, location: ItemPointer) {
        let slots = self.entry(location);
        match slots.get(&location.offset) {
            None => {
                slots.insert(location.offset, RwType::Read);
            }
            Some(RwType::Delete | RwType::InsDel) => {
                unreachable!("read of a slot this transaction already deleted")
            }
            // Already at least a read; nothing to do.
            Some(_) => {}
        }
    }

    pub(crate) fn record_read_own(&mut self, location: ItemPointer) {
        let slots = self.entry(location);
        match slots.get(&location.offset) {
            None | Some(RwType::Read) => {
                slots.insert(location.offset, RwType::ReadOwn);
            }
            Some(RwType::Delete | RwType::InsDel) => {
                unreachable!("ownership re-acquired on a slot this transaction deleted")
            }
            // ReadOwn, Update, Insert already imply ownership.
            Some(_) => {}
        }
    }

    pub(crate) fn record_update(&mut self, location: ItemPointer) {
        let slots = self.entry(location);
        match slots.get(&location.offset) {
            None | Some(RwType::Read | RwType::ReadOwn) => {
                slots.insert(location.offset, RwType::Update);
            }
            // Updating our own insert (or updating again) changes nothing:
            // the version is still the one this transaction will publish.
            Some(RwType::Update | RwType::Insert) => {}
            Some(RwType::Delete | RwType::InsDel) => {
                unreachable!("update of a slot this transaction already deleted")
            }
        }
    }

    pub(crate) fn record_delete(&mut self, location: ItemPointer) {
        let slots = self.entry(location);
        match slots.get(&location.offset) {
            None | Some(RwType::Read | RwType::ReadOwn | RwType::Update) => {
                slots.insert(location.offset, RwType::Delete);
            }
            Some(RwType::Insert) => {
                slots.insert(location.offset, RwType::InsDel);
            }
            Some(RwType::Delete | RwType::InsDel) => {
                unreachable!("double delete of one slot in one transaction")
            }
        }
    }

    pub(crate) fn record_insert(&mut self, location: ItemPointer) {
        let slots = self.entry(location);
        let previous = slots.insert(location.offset, RwType::Insert);
        debug_assert!(previous.is_none(), "insert into an already-tracked slot");
    }

    pub(crate) fn record_gc(&mut self, location: ItemPointer, delete_from_index: bool) {
        self.gc_set
            .entry(location.block)
            .or_default()
            .insert(location.offset, delete_from_index);
    }

    pub(crate) fn take_rw_set(&mut self) -> SlotSet<RwType> {
        std::mem::take(&mut self.rw_set)
    }

    pub(crate) fn take_gc_set(&mut self) -> SlotSet<bool> {
        std::mem::take(&mut self.gc_set)
    }
}
