//! Process-wide registry of tilegroups and indirection arrays.
//!
//! There is no hidden singleton: a [`CatalogManager`] is created per engine
//! instance and shared by `Arc`. Tests construct isolated managers and
//! nothing survives teardown.

use crate::error::CatalogError;
use crate::indirection::IndirectionArray;
use crate::tile_group::TileGroup;
use mica_primitives::{IndirectionArrayId, IndirectionPointer, ItemPointer, TileGroupId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Registry mapping ids to live storage objects.
///
/// Lookups vastly outnumber registration and drop, so both maps sit behind
/// `RwLock`s that writers touch only on tilegroup rollover, layout
/// transformation and table teardown.
#[derive(Default, Debug)]
pub struct CatalogManager {
    tile_groups: RwLock<HashMap<TileGroupId, Arc<TileGroup>>>,
    indirection_arrays: RwLock<HashMap<IndirectionArrayId, Arc<IndirectionArray>>>,
    next_tile_group_id: AtomicU32,
    next_indirection_array_id: AtomicU32,
}

impl CatalogManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Allocates a fresh, monotonically increasing tilegroup id.
    pub fn allocate_tile_group_id(&self) -> TileGroupId {
        TileGroupId(self.next_tile_group_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Registers `tile_group` under its own id. Re-registering an id is how
    /// layout transformation swaps a tilegroup's storage object: the old
    /// `Arc` stays alive until the last in-flight reader drops it.
    pub fn register_tile_group(&self, tile_group: Arc<TileGroup>) {
        log::trace!("registering tilegroup {}", tile_group.id());
        self.tile_groups.write().insert(tile_group.id(), tile_group);
    }

    pub fn drop_tile_group(&self, id: TileGroupId) {
        log::trace!("dropping tilegroup {id}");
        self.tile_groups.write().remove(&id);
    }

    pub fn tile_group(&self, id: TileGroupId) -> Result<Arc<TileGroup>, CatalogError> {
        self.tile_groups
            .read()
            .get(&id)
            .cloned()
            .ok_or(CatalogError::UnknownTileGroup(id))
    }

    pub fn allocate_indirection_array_id(&self) -> IndirectionArrayId {
        IndirectionArrayId(self.next_indirection_array_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn register_indirection_array(&self, array: Arc<IndirectionArray>) {
        self.indirection_arrays.write().insert(array.id(), array);
    }

    pub fn drop_indirection_array(&self, id: IndirectionArrayId) {
        self.indirection_arrays.write().remove(&id);
    }

    pub fn indirection_array(
        &self,
        id: IndirectionArrayId,
    ) -> Result<Arc<IndirectionArray>, CatalogError> {
        self.indirection_arrays
            .read()
            .get(&id)
            .cloned()
            .ok_or(CatalogError::UnknownIndirectionArray(id))
    }

    /// Resolves an indirection cell and loads the chain head it holds.
    pub fn indirection_head(&self, ptr: IndirectionPointer) -> Result<ItemPointer, CatalogError> {
        Ok(self.indirection_array(ptr.array)?.head(ptr.cell))
    }

    /// Resolves an indirection cell and CASes its head pointer.
    pub fn cas_indirection_head(
        &self,
        ptr: IndirectionPointer,
        expected: ItemPointer,
        new: ItemPointer,
    ) -> Result<bool, CatalogError> {
        Ok(self.indirection_array(ptr.array)?.cas_head(ptr.cell, expected, new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ColumnMap;
    use crate::schema::{Column, ColumnType, Schema};

    fn tile_group(id: TileGroupId) -> Arc<TileGroup> {
        let schema = Schema::new(vec![Column::new("v", ColumnType::Int)]);
        Arc::new(TileGroup::new(id, &schema, ColumnMap::row(1), 2))
    }

    #[test]
    fn ids_are_monotonic() {
        let catalog = CatalogManager::new();
        let a = catalog.allocate_tile_group_id();
        let b = catalog.allocate_tile_group_id();
        assert!(b.0 > a.0);
    }

    #[test]
    fn dropped_tilegroups_are_unknown() {
        let catalog = CatalogManager::new();
        let id = catalog.allocate_tile_group_id();
        catalog.register_tile_group(tile_group(id));
        assert!(catalog.tile_group(id).is_ok());

        catalog.drop_tile_group(id);
        assert_eq!(
            catalog.tile_group(id).unwrap_err(),
            CatalogError::UnknownTileGroup(id)
        );
    }

    #[test]
    fn re_registration_replaces_the_object() {
        let catalog = CatalogManager::new();
        let id = catalog.allocate_tile_group_id();
        let first = tile_group(id);
        catalog.register_tile_group(first.clone());

        let second = tile_group(id);
        catalog.register_tile_group(second.clone());
        let resolved = catalog.tile_group(id).unwrap();
        assert!(Arc::ptr_eq(&resolved, &second));
        // The old object survives for readers that still hold it.
        assert_eq!(first.id(), id);
    }
}
