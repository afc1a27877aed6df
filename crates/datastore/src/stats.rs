//! The statistics hook.
//!
//! Aggregation, per-backend contexts and exposition formats live outside the
//! core; the transaction manager only increments counters at well-defined
//! points.

use mica_primitives::TileGroupId;
use std::sync::atomic::{AtomicU64, Ordering};

pub trait StatsSink: Send + Sync {
    fn record_table_read(&self, tile_group: TileGroupId);
    fn record_table_insert(&self, tile_group: TileGroupId);
    fn record_table_update(&self, tile_group: TileGroupId);
    fn record_table_delete(&self, tile_group: TileGroupId);
    fn record_txn_committed(&self);
    fn record_txn_aborted(&self);
}

/// Ignores everything.
#[derive(Default)]
pub struct NullStats;

impl StatsSink for NullStats {
    fn record_table_read(&self, _tile_group: TileGroupId) {}
    fn record_table_insert(&self, _tile_group: TileGroupId) {}
    fn record_table_update(&self, _tile_group: TileGroupId) {}
    fn record_table_delete(&self, _tile_group: TileGroupId) {}
    fn record_txn_committed(&self) {}
    fn record_txn_aborted(&self) {}
}

/// Process-wide totals kept in relaxed atomics. Enough for tests and for
/// feeding a real aggregator.
#[derive(Default)]
pub struct CounterStats {
    reads: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
}

impl CounterStats {
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    pub fn aborted(&self) -> u64 {
        self.aborted.load(Ordering::Relaxed)
    }
}

impl StatsSink for CounterStats {
    fn record_table_read(&self, _tile_group: TileGroupId) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    fn record_table_insert(&self, _tile_group: TileGroupId) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_table_update(&self, _tile_group: TileGroupId) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    fn record_table_delete(&self, _tile_group: TileGroupId) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_txn_committed(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_txn_aborted(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }
}
