//! End-to-end MVCC scenarios, driven the way an executor drives the core:
//! a primary index maps keys to indirection cells, lookups resolve the cell
//! through the version chain, and writes go through ownership acquisition.

use mica_datastore::{
    resolve_visible, CounterStats, Db, RecordingWal, RecycledVersion, StatsSink, TransactionContext,
    TxnResult, WalRecord, WriteAheadLog,
};
use mica_primitives::{
    Cid, IndirectionPointer, ItemPointer, TileGroupId, TxnId, INITIAL_TXN_ID, INVALID_TXN_ID,
    MAX_CID, START_CID,
};
use mica_table::data_table::{DataTable, DataTableOptions};
use mica_table::schema::{Column, ColumnType, Schema};
use mica_table::tuple::{Tuple, Value};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const TUPLES_PER_TILEGROUP: usize = 4;

/// A table plus the executor-side machinery the core leaves external: a
/// primary index from key to indirection cell.
struct Harness {
    db: Db,
    table: Arc<DataTable>,
    index: Mutex<HashMap<i64, IndirectionPointer>>,
}

impl Harness {
    fn new() -> Self {
        Self::with_db(Db::new())
    }

    fn with_db(db: Db) -> Self {
        let schema = Schema::new(vec![
            Column::new("k", ColumnType::Int),
            Column::new("v", ColumnType::Text),
        ]);
        let table = db.create_table(
            mica_primitives::TableId(1),
            "pairs",
            schema,
            DataTableOptions {
                tuples_per_tilegroup: TUPLES_PER_TILEGROUP,
                ..Default::default()
            },
        );
        Self {
            db,
            table,
            index: Mutex::new(HashMap::new()),
        }
    }

    fn begin(&self, read_only: bool) -> TransactionContext {
        self.db.txn_manager().begin_transaction(read_only)
    }

    fn row(key: i64, value: &str) -> Tuple {
        Tuple::new(vec![Value::Int(key), Value::Text(value.to_owned())])
    }

    fn insert(&self, txn: &mut TransactionContext, key: i64, value: &str) -> ItemPointer {
        let tuple = Self::row(key, value);
        let location = self.table.insert_tuple(&tuple, txn.txn_id()).unwrap();
        let cell = self.table.allocate_indirection_cell(location).unwrap();
        self.db.txn_manager().perform_insert(txn, location, Some(cell));
        self.index.lock().unwrap().insert(key, cell);
        location
    }

    /// Resolves `key` to the version visible to `txn`, without reading.
    fn lookup(&self, txn: &TransactionContext, key: i64) -> Option<ItemPointer> {
        let cell = *self.index.lock().unwrap().get(&key)?;
        resolve_visible(self.db.txn_manager(), txn, cell)
    }

    /// Point read: `None` when the key is invisible or deleted; panics on a
    /// read conflict (the scenarios that want conflicts use writes).
    fn read(&self, txn: &mut TransactionContext, key: i64) -> Option<String> {
        let location = self.lookup(txn, key)?;
        assert!(self.db.txn_manager().perform_read(txn, location, false));
        let tile_group = self.db.catalog().tile_group(location.block).unwrap();
        // SAFETY: the version was resolved as visible, so it was published
        // with a release of its txn-id which `visibility` observed.
        let tuple = unsafe { tile_group.materialize(location.offset) };
        match tuple.value(mica_primitives::ColId(1)) {
            Value::Text(s) => Some(s.clone()),
            other => panic!("unexpected value {other:?}"),
        }
    }

    /// Update through the full ownership protocol. `false` = conflict.
    fn try_update(&self, txn: &mut TransactionContext, key: i64, value: &str) -> bool {
        let manager = self.db.txn_manager();
        let Some(location) = self.lookup(txn, key) else {
            return false;
        };
        let tile_group = self.db.catalog().tile_group(location.block).unwrap();

        if manager.is_owner(txn, tile_group.header(), location.offset) {
            // Our own uncommitted version: mutate it in place.
            // SAFETY: we own the slot.
            unsafe { tile_group.copy_tuple(&Self::row(key, value), location.offset) };
            manager.perform_update_in_place(txn, location);
            return true;
        }

        if !manager.perform_read(txn, location, true) {
            return false;
        }
        let new_location = self.table.acquire_version().unwrap();
        if !manager.perform_update(txn, location, new_location) {
            return false;
        }
        let new_tile_group = self.db.catalog().tile_group(new_location.block).unwrap();
        // SAFETY: we own the freshly linked version; readers cannot see it
        // until our commit releases it.
        unsafe { new_tile_group.copy_tuple(&Self::row(key, value), new_location.offset) };
        true
    }

    /// Delete through the full ownership protocol. `false` = conflict.
    fn try_delete(&self, txn: &mut TransactionContext, key: i64) -> bool {
        let manager = self.db.txn_manager();
        let Some(location) = self.lookup(txn, key) else {
            return false;
        };
        let tile_group = self.db.catalog().tile_group(location.block).unwrap();

        if manager.is_owner(txn, tile_group.header(), location.offset) {
            manager.perform_delete_in_place(txn, location);
            return true;
        }

        if !manager.perform_read(txn, location, true) {
            return false;
        }
        let new_location = self.table.insert_empty_version().unwrap();
        manager.perform_delete(txn, location, new_location)
    }

    fn head_of(&self, key: i64) -> ItemPointer {
        let cell = self.index.lock().unwrap()[&key];
        self.db.catalog().indirection_head(cell).unwrap()
    }

    fn header_snapshot(&self, location: ItemPointer) -> (TxnId, Cid, Cid, ItemPointer, ItemPointer) {
        let tile_group = self.db.catalog().tile_group(location.block).unwrap();
        let header = tile_group.header();
        (
            header.transaction_id(location.offset),
            header.begin_commit_id(location.offset),
            header.end_commit_id(location.offset),
            header.prev_item_pointer(location.offset),
            header.next_item_pointer(location.offset),
        )
    }
}

// S1: insert then read across transactions.
#[test]
fn insert_then_read() {
    let h = Harness::new();

    let mut t1 = h.begin(false);
    assert_eq!(t1.begin_cid(), START_CID);
    let location = h.insert(&mut t1, 10, "a");
    assert_eq!(location, ItemPointer::new(TileGroupId(1), 0));
    assert_eq!(h.db.txn_manager().commit_transaction(t1), TxnResult::Success);

    let mut t2 = h.begin(false);
    assert_eq!(t2.begin_cid(), START_CID + 1);
    assert_eq!(h.read(&mut t2, 10).as_deref(), Some("a"));
    h.db.txn_manager().end_transaction(t2);

    let (txn_id, begin, end, _, _) = h.header_snapshot(location);
    assert_eq!(txn_id, INITIAL_TXN_ID);
    assert_eq!(begin, 1);
    assert_eq!(end, MAX_CID);
}

// S2: write-write conflict surfaces as OwnershipDenied and the loser aborts.
#[test]
fn write_write_conflict() {
    let h = Harness::new();

    let mut t0 = h.begin(false);
    let location = h.insert(&mut t0, 10, "a");
    h.db.txn_manager().commit_transaction(t0);

    // T1 takes ownership of the only version.
    let mut t1 = h.begin(false);
    assert!(h.try_update(&mut t1, 10, "b"));

    // T2 cannot update a version T1 owns.
    let mut t2 = h.begin(false);
    let before = h.header_snapshot(location);
    assert!(!h.try_update(&mut t2, 10, "c"));
    assert_eq!(h.db.txn_manager().abort_transaction(t2), TxnResult::Aborted);

    // T2 left the contended header untouched.
    assert_eq!(h.header_snapshot(location), before);

    assert_eq!(h.db.txn_manager().commit_transaction(t1), TxnResult::Success);
    let (txn_id, _, end, _, _) = h.header_snapshot(location);
    assert_eq!(txn_id, INITIAL_TXN_ID);
    assert_ne!(end, MAX_CID, "end_cid must reflect T1's update");

    let mut t3 = h.begin(false);
    assert_eq!(h.read(&mut t3, 10).as_deref(), Some("b"));
    h.db.txn_manager().end_transaction(t3);
}

// S3: update chain visibility, including time travel.
#[test]
fn update_chain_visibility() {
    let h = Harness::new();

    let mut t1 = h.begin(false);
    let old_location = h.insert(&mut t1, 1, "a");
    h.db.txn_manager().commit_transaction(t1);

    // Begins before the update commits: must keep seeing "a".
    let mut time_traveler = h.begin(false);

    let mut t2 = h.begin(false);
    assert!(h.try_update(&mut t2, 1, "b"));
    let commit_cid = t2.begin_cid();
    h.db.txn_manager().commit_transaction(t2);

    let mut t3 = h.begin(false);
    assert_eq!(h.read(&mut t3, 1).as_deref(), Some("b"));
    h.db.txn_manager().end_transaction(t3);

    assert_eq!(h.read(&mut time_traveler, 1).as_deref(), Some("a"));
    h.db.txn_manager().end_transaction(time_traveler);

    // P1: the committed intervals tile exactly.
    let new_location = h.head_of(1);
    let (_, new_begin, new_end, new_prev, new_next) = h.header_snapshot(new_location);
    let (_, old_begin, old_end, old_prev, _) = h.header_snapshot(old_location);
    assert_eq!(new_begin, commit_cid);
    assert_eq!(new_end, MAX_CID);
    assert_eq!(old_end, new_begin, "intervals must be contiguous");
    assert_eq!(old_begin, 1);
    // I1/P3: head has a null prev and points at the old version.
    assert!(new_prev.is_null());
    assert_eq!(new_next, old_location);
    assert_eq!(old_prev, new_location);
}

// S4 / B3: abort unlinks the new head and restores the indirection cell.
#[test]
fn abort_unlinks_new_head() {
    let h = Harness::new();

    let mut t1 = h.begin(false);
    let old_location = h.insert(&mut t1, 5, "x");
    h.db.txn_manager().commit_transaction(t1);
    let before = h.header_snapshot(old_location);

    let mut t2 = h.begin(false);
    assert!(h.try_update(&mut t2, 5, "y"));
    let new_location = h.head_of(5);
    assert_ne!(new_location, old_location);
    h.db.txn_manager().abort_transaction(t2);

    // The cell points back at the exact old address.
    assert_eq!(h.head_of(5), old_location);
    let (new_txn, _, _, _, _) = h.header_snapshot(new_location);
    assert_eq!(new_txn, INVALID_TXN_ID);
    let (old_txn, _, _, old_prev, _) = h.header_snapshot(old_location);
    assert_eq!(old_txn, INITIAL_TXN_ID);
    assert!(old_prev.is_null());
    // R-style: apart from the transient ownership, the old header is intact.
    assert_eq!(h.header_snapshot(old_location), before);

    // The aborted version is queued for recycling, without index deletion.
    let recycled = h.db.gc_queue().drain();
    assert!(recycled.contains(&RecycledVersion {
        location: new_location,
        delete_from_index: false,
    }));

    let mut t3 = h.begin(false);
    assert_eq!(h.read(&mut t3, 5).as_deref(), Some("x"));
    h.db.txn_manager().end_transaction(t3);
}

// S5 / R2: insert + delete inside one transaction commits to nothing.
#[test]
fn insert_delete_same_transaction() {
    let wal = Arc::new(RecordingWal::default());
    let stats = Arc::new(CounterStats::default());
    let h = Harness::with_db(Db::with_hooks(wal.clone(), stats.clone() as Arc<dyn StatsSink>));

    let mut t1 = h.begin(false);
    let location = h.insert(&mut t1, 7, "gone");
    // The inserting transaction still sees its own write (R1).
    assert_eq!(h.read(&mut t1, 7).as_deref(), Some("gone"));
    assert!(h.try_delete(&mut t1, 7));
    // And now its own tombstone.
    assert_eq!(h.read(&mut t1, 7), None);
    h.db.txn_manager().commit_transaction(t1);

    // No version survives for later transactions.
    let mut t2 = h.begin(false);
    assert_eq!(h.read(&mut t2, 7), None);
    h.db.txn_manager().end_transaction(t2);

    // The slot goes to the GC with index-delete set.
    let recycled = h.db.gc_queue().drain();
    assert_eq!(
        recycled,
        vec![RecycledVersion {
            location,
            delete_from_index: true,
        }]
    );

    // INS_DEL emits no insert/delete records.
    assert_eq!(wal.records(), vec![WalRecord::Begin(START_CID)]);
    assert_eq!(stats.committed(), 1);
}

// S6 / B1: tilegroup rollover at exactly the capacity boundary.
#[test]
fn tilegroup_rollover() {
    let h = Harness::new();
    let mut blocks = Vec::new();

    for i in 0..5 {
        let mut txn = h.begin(false);
        let location = h.insert(&mut txn, i, "v");
        h.db.txn_manager().commit_transaction(txn);
        blocks.push(location.block);
        let expected = if i < 3 { 1 } else { 2 };
        assert_eq!(h.table.tile_group_count(), expected, "after insert {i}");
    }

    assert!(blocks[..4].iter().all(|b| *b == blocks[0]));
    assert_ne!(blocks[4], blocks[0]);
}

// R3: a no-op transaction's commit and a no-op abort leave headers intact.
#[test]
fn no_op_transactions_leave_headers_untouched() {
    let h = Harness::new();

    let mut t1 = h.begin(false);
    let location = h.insert(&mut t1, 3, "stable");
    h.db.txn_manager().commit_transaction(t1);

    let tile_group = h.db.catalog().tile_group(location.block).unwrap();
    let snapshot: Vec<_> = (0..tile_group.allocated_tuple_count())
        .map(|slot| {
            let header = tile_group.header();
            (
                h.header_snapshot(ItemPointer::new(location.block, slot)),
                header.indirection(slot),
                header.last_reader_commit_id(slot),
            )
        })
        .collect();

    let t2 = h.begin(false);
    h.db.txn_manager().commit_transaction(t2);
    let t3 = h.begin(false);
    h.db.txn_manager().abort_transaction(t3);

    let after: Vec<_> = (0..tile_group.allocated_tuple_count())
        .map(|slot| {
            let header = tile_group.header();
            (
                h.header_snapshot(ItemPointer::new(location.block, slot)),
                header.indirection(slot),
                header.last_reader_commit_id(slot),
            )
        })
        .collect();
    assert_eq!(snapshot, after);
}

// Deletes across transactions: tombstone chain + GC of both versions.
#[test]
fn delete_across_transactions() {
    let wal = Arc::new(RecordingWal::default());
    let h = Harness::with_db(Db::with_hooks(
        wal.clone() as Arc<dyn WriteAheadLog>,
        Arc::new(mica_datastore::NullStats),
    ));

    let mut t1 = h.begin(false);
    let old_location = h.insert(&mut t1, 9, "doomed");
    h.db.txn_manager().commit_transaction(t1);

    let mut t2 = h.begin(false);
    assert!(h.try_delete(&mut t2, 9));
    let delete_cid = t2.begin_cid();
    h.db.txn_manager().commit_transaction(t2);

    // Gone for new transactions.
    let mut t3 = h.begin(false);
    assert_eq!(h.read(&mut t3, 9), None);
    h.db.txn_manager().end_transaction(t3);

    // Old version recycled with index deletion, tombstone without.
    let mut recycled = h.db.gc_queue().drain();
    recycled.sort_by_key(|r| r.location.offset);
    let tombstone = h.head_of(9);
    assert_eq!(
        recycled,
        vec![
            RecycledVersion {
                location: old_location,
                delete_from_index: true
            },
            RecycledVersion {
                location: tombstone,
                delete_from_index: false
            },
        ]
    );

    assert_eq!(
        wal.records(),
        vec![
            WalRecord::Begin(1),
            WalRecord::Insert(1, old_location),
            WalRecord::Begin(delete_cid),
            WalRecord::Delete(delete_cid, old_location),
        ]
    );
}

// The GC lower bound lags the oldest active transaction.
#[test]
fn gc_watermark_respects_active_transactions() {
    let h = Harness::new();
    let manager = h.db.txn_manager();

    let mut t1 = h.begin(false);
    h.insert(&mut t1, 1, "a");
    manager.commit_transaction(t1);

    let old_reader = h.begin(false);
    let old_begin = old_reader.begin_cid();

    let mut t2 = h.begin(false);
    assert!(h.try_delete(&mut t2, 1));
    let delete_cid = t2.begin_cid();
    manager.commit_transaction(t2);

    // The old version's interval ends at delete_cid, but the old reader is
    // still active below it: the GC must hold off.
    assert!(manager.min_active_begin_cid() <= old_begin);
    assert!(manager.min_active_begin_cid() < delete_cid);

    manager.end_transaction(old_reader);
    assert!(manager.min_active_begin_cid() > delete_cid);
}

// Read-only transactions skip the coordination machinery entirely.
#[test]
fn read_only_transactions_leave_no_trace() {
    let h = Harness::new();

    let mut t1 = h.begin(false);
    let location = h.insert(&mut t1, 4, "ro");
    h.db.txn_manager().commit_transaction(t1);

    let mut ro = h.begin(true);
    assert_eq!(h.read(&mut ro, 4).as_deref(), Some("ro"));
    assert_eq!(h.db.txn_manager().commit_transaction(ro), TxnResult::Success);

    // No last-reader stamp was left behind.
    let tile_group = h.db.catalog().tile_group(location.block).unwrap();
    assert_eq!(tile_group.header().last_reader_commit_id(location.offset), 0);
}

// A writer cannot invalidate a version a later reader already observed.
#[test]
fn reader_blocks_older_writer() {
    let h = Harness::new();

    let mut t1 = h.begin(false);
    h.insert(&mut t1, 2, "a");
    h.db.txn_manager().commit_transaction(t1);

    // Writer begins first (lower timestamp), reader second.
    let mut writer = h.begin(false);
    let mut reader = h.begin(false);

    assert_eq!(h.read(&mut reader, 2).as_deref(), Some("a"));

    // The reader stamped its (later) timestamp on the version, so the
    // writer's ownership acquisition is refused: writing under an observed
    // read would break timestamp ordering.
    let location = h.lookup(&writer, 2).unwrap();
    let tile_group = h.db.catalog().tile_group(location.block).unwrap();
    assert_eq!(
        tile_group.header().last_reader_commit_id(location.offset),
        reader.begin_cid()
    );
    assert!(!h.try_delete(&mut writer, 2));
    assert!(!h.try_update(&mut writer, 2, "z"));

    h.db.txn_manager().abort_transaction(writer);
    h.db.txn_manager().end_transaction(reader);
}

// Concurrent inserters: every committed tuple is visible afterwards and all
// slots end up released (P2: no lingering owner).
#[test]
fn concurrent_inserts_commit_cleanly() {
    const THREADS: i64 = 4;
    const PER_THREAD: i64 = 25;

    let h = Arc::new(Harness::new());
    let mut handles = Vec::new();
    for t in 0..THREADS {
        let h = Arc::clone(&h);
        handles.push(std::thread::spawn(move || {
            for i in 0..PER_THREAD {
                let mut txn = h.begin(false);
                h.insert(&mut txn, t * PER_THREAD + i, "w");
                assert_eq!(h.db.txn_manager().commit_transaction(txn), TxnResult::Success);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let mut reader = h.begin(false);
    for key in 0..THREADS * PER_THREAD {
        assert_eq!(h.read(&mut reader, key).as_deref(), Some("w"), "key {key}");
    }
    h.db.txn_manager().end_transaction(reader);

    // Every allocated slot is committed and unowned.
    for offset in 0..h.table.tile_group_count() {
        let tile_group = h.table.tile_group(offset).unwrap();
        let header = tile_group.header();
        let used = header
            .current_next_tuple_slot()
            .min(header.allocated_tuple_count());
        for slot in 0..used {
            assert_eq!(header.transaction_id(slot), INITIAL_TXN_ID);
            assert_ne!(header.begin_commit_id(slot), MAX_CID);
        }
    }
}
