//! The write-ahead-log hook.
//!
//! The core does not define a record layout or persistence; it only promises
//! to emit these calls, in order, before announcing commit success to the
//! caller. A durable logger sequences and flushes them however it likes.

use mica_primitives::{Cid, ItemPointer};
use parking_lot::Mutex;

pub trait WriteAheadLog: Send + Sync {
    fn log_begin_transaction(&self, commit_cid: Cid);
    fn log_insert(&self, commit_cid: Cid, location: ItemPointer);
    fn log_update(&self, commit_cid: Cid, old_location: ItemPointer, new_location: ItemPointer);
    fn log_delete(&self, commit_cid: Cid, old_location: ItemPointer);
}

/// Discards every record. The default for engines running without
/// durability.
#[derive(Default)]
pub struct NullWal;

impl WriteAheadLog for NullWal {
    fn log_begin_transaction(&self, _commit_cid: Cid) {}
    fn log_insert(&self, _commit_cid: Cid, _location: ItemPointer) {}
    fn log_update(&self, _commit_cid: Cid, _old_location: ItemPointer, _new_location: ItemPointer) {}
    fn log_delete(&self, _commit_cid: Cid, _old_location: ItemPointer) {}
}

/// One emitted log record, as captured by [`RecordingWal`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WalRecord {
    Begin(Cid),
    Insert(Cid, ItemPointer),
    Update(Cid, ItemPointer, ItemPointer),
    Delete(Cid, ItemPointer),
}

/// Captures records in emission order. Used by tests asserting on what a
/// commit logged (and did not log).
#[derive(Default)]
pub struct RecordingWal {
    records: Mutex<Vec<WalRecord>>,
}

impl RecordingWal {
    pub fn records(&self) -> Vec<WalRecord> {
        self.records.lock().clone()
    }
}

impl WriteAheadLog for RecordingWal {
    fn log_begin_transaction(&self, commit_cid: Cid) {
        self.records.lock().push(WalRecord::Begin(commit_cid));
    }

    fn log_insert(&self, commit_cid: Cid, location: ItemPointer) {
        self.records.lock().push(WalRecord::Insert(commit_cid, location));
    }

    fn log_update(&self, commit_cid: Cid, old_location: ItemPointer, new_location: ItemPointer) {
        self.records
            .lock()
            .push(WalRecord::Update(commit_cid, old_location, new_location));
    }

    fn log_delete(&self, commit_cid: Cid, old_location: ItemPointer) {
        self.records.lock().push(WalRecord::Delete(commit_cid, old_location));
    }
}
