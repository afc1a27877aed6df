//! Column-wise value storage inside a tilegroup.
//!
//! A [`Tile`] holds one column-major slab per column for a fixed number of
//! slots. The tile itself carries **no** synchronization: the MVCC protocol
//! in the tilegroup header is what makes concurrent access sound. A slot's
//! values are written only by the slot's current owner (at insert time before
//! the slot is published, or in place while holding ownership), and read by
//! other threads only after an acquire load of the header's txn-id observed a
//! release by the writer.

use crate::schema::Column;
use crate::tuple::Value;
use mica_primitives::Oid;
use std::cell::UnsafeCell;

/// One column's slots.
struct ColumnSlots {
    cells: Box<[UnsafeCell<Value>]>,
}

// SAFETY: all mutation goes through `Tile::set_value`, whose contract
// restricts writers to the slot's owner and orders reads after the header's
// release/acquire handshake on the owning txn-id.
unsafe impl Send for ColumnSlots {}
unsafe impl Sync for ColumnSlots {}

impl ColumnSlots {
    fn new(capacity: usize) -> Self {
        Self {
            cells: (0..capacity).map(|_| UnsafeCell::new(Value::Null)).collect(),
        }
    }
}

/// A fixed-capacity block of column-major value storage.
pub struct Tile {
    schema: Vec<Column>,
    columns: Vec<ColumnSlots>,
    capacity: usize,
}

impl std::fmt::Debug for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tile")
            .field("schema", &self.schema)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl Tile {
    pub(crate) fn new(schema: Vec<Column>, capacity: usize) -> Self {
        let columns = (0..schema.len()).map(|_| ColumnSlots::new(capacity)).collect();
        Self {
            schema,
            columns,
            capacity,
        }
    }

    pub fn column_count(&self) -> usize {
        self.schema.len()
    }

    pub fn schema(&self) -> &[Column] {
        &self.schema
    }

    /// Writes `value` into `(tile_column, slot)`.
    ///
    /// # Safety
    ///
    /// The caller must be the slot's current owner: either the slot was just
    /// claimed from the allocator and has not been published yet, or the
    /// calling transaction holds the slot's txn-id. No other thread may read
    /// the slot concurrently except through the header handshake described in
    /// the module docs.
    pub unsafe fn set_value(&self, tile_column: u32, slot: Oid, value: Value) {
        assert!((slot as usize) < self.capacity);
        // SAFETY: exclusive access per the caller's ownership contract.
        unsafe { *self.columns[tile_column as usize].cells[slot as usize].get() = value };
    }

    /// Reads the value at `(tile_column, slot)`.
    ///
    /// # Safety
    ///
    /// The caller must either own the slot, or have observed (with acquire
    /// ordering) a header txn-id value proving no concurrent writer: the
    /// slot's version must have been published by a release of the txn-id
    /// after its values were fully written.
    pub unsafe fn value(&self, tile_column: u32, slot: Oid) -> Value {
        assert!((slot as usize) < self.capacity);
        // SAFETY: no concurrent writer per the caller's contract.
        unsafe { (*self.columns[tile_column as usize].cells[slot as usize].get()).clone() }
    }
}
