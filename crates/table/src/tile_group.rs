//! A fixed-capacity block of append-only tuple slots.

use crate::layout::ColumnMap;
use crate::schema::Schema;
use crate::tile::Tile;
use crate::tile_group_header::TileGroupHeader;
use crate::tuple::{Tuple, Value};
use mica_primitives::{ColId, Oid, TileGroupId};

/// A tilegroup: value storage split across one or more [`Tile`]s according
/// to a [`ColumnMap`], plus the per-slot MVCC header.
///
/// Slots are handed out in order by a fetch-and-add allocator and never
/// reused by the tilegroup itself; reuse is mediated externally by the GC.
///
/// After a layout transformation the same [`TileGroupId`] resolves to a
/// *different* `TileGroup` object, so readers must re-look the id up in the
/// catalog for every access rather than caching `&TileGroup` across reads.
#[derive(Debug)]
pub struct TileGroup {
    id: TileGroupId,
    column_map: ColumnMap,
    tiles: Vec<Tile>,
    header: TileGroupHeader,
}

impl TileGroup {
    pub fn new(id: TileGroupId, schema: &Schema, column_map: ColumnMap, capacity: usize) -> Self {
        let tiles = column_map
            .tile_schemas(schema)
            .into_iter()
            .map(|tile_schema| Tile::new(tile_schema, capacity))
            .collect();
        Self {
            id,
            column_map,
            tiles,
            header: TileGroupHeader::new(capacity),
        }
    }

    pub fn id(&self) -> TileGroupId {
        self.id
    }

    pub fn header(&self) -> &TileGroupHeader {
        &self.header
    }

    pub fn column_map(&self) -> &ColumnMap {
        &self.column_map
    }

    pub fn tile(&self, tile_offset: u32) -> &Tile {
        &self.tiles[tile_offset as usize]
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn allocated_tuple_count(&self) -> Oid {
        self.header.allocated_tuple_count()
    }

    /// Reserves the next unused slot and, when `tuple` is given, copies its
    /// values into the slot column-wise. `None` means the tilegroup is full
    /// and the caller must rotate to a new one.
    ///
    /// A `tuple` of `None` leaves the slot's values untouched; update and
    /// delete paths claim such empty versions and never materialize data in
    /// them (updates write the owned slot in place at the executor level).
    pub fn insert_tuple(&self, tuple: Option<&Tuple>) -> Option<Oid> {
        let slot = self.header.next_empty_tuple_slot()?;
        if let Some(tuple) = tuple {
            // SAFETY: `slot` was just claimed and has not been published:
            // no other thread can hold a reference to it.
            unsafe { self.copy_tuple(tuple, slot) };
        }
        Some(slot)
    }

    /// Copies `tuple` into `slot`, one column at a time.
    ///
    /// # Safety
    ///
    /// The caller must own `slot` exclusively (freshly claimed and
    /// unpublished, or write-locked via the header txn-id).
    pub unsafe fn copy_tuple(&self, tuple: &Tuple, slot: Oid) {
        assert_eq!(tuple.column_count(), self.column_map.column_count());
        for (col, value) in tuple.values().iter().enumerate() {
            let tc = self.column_map.locate(ColId(col as u32));
            // SAFETY: forwarded from the caller.
            unsafe { self.tiles[tc.tile as usize].set_value(tc.column, slot, value.clone()) };
        }
    }

    /// Reads logical column `col` of `slot`.
    ///
    /// # Safety
    ///
    /// Same contract as [`Tile::value`]: the caller must own the slot or
    /// have observed its publication through the header txn-id handshake.
    pub unsafe fn value(&self, col: ColId, slot: Oid) -> Value {
        let tc = self.column_map.locate(col);
        // SAFETY: forwarded from the caller.
        unsafe { self.tiles[tc.tile as usize].value(tc.column, slot) }
    }

    /// Writes logical column `col` of `slot` in place.
    ///
    /// # Safety
    ///
    /// Same contract as [`Tile::set_value`].
    pub unsafe fn set_value(&self, col: ColId, slot: Oid, value: Value) {
        let tc = self.column_map.locate(col);
        // SAFETY: forwarded from the caller.
        unsafe { self.tiles[tc.tile as usize].set_value(tc.column, slot, value) };
    }

    /// Materializes the whole row at `slot`.
    ///
    /// # Safety
    ///
    /// Same contract as [`TileGroup::value`].
    pub unsafe fn materialize(&self, slot: Oid) -> Tuple {
        Tuple::new(
            (0..self.column_map.column_count())
                // SAFETY: forwarded from the caller.
                .map(|col| unsafe { self.value(ColId(col as u32), slot) })
                .collect(),
        )
    }
}
