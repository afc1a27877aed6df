//! Append-only tables built from tilegroups.

use crate::catalog::CatalogManager;
use crate::error::TableError;
use crate::indirection::IndirectionArray;
use crate::layout::ColumnMap;
use crate::schema::Schema;
use crate::tile_group::TileGroup;
use crate::tuple::Tuple;
use mica_primitives::{ColId, IndirectionPointer, ItemPointer, TableId, TileGroupId, TxnId};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Bound on allocation retries before giving up. A retry only happens when a
/// competing thread consumed an entire freshly installed tilegroup between
/// our re-read and insert, so hitting the bound means the allocator is being
/// starved beyond anything a healthy process produces.
const MAX_SLOT_ALLOCATION_RETRIES: usize = 64;

/// Sizing knobs for a [`DataTable`].
#[derive(Clone, Copy, Debug)]
pub struct DataTableOptions {
    /// Slots per tilegroup.
    pub tuples_per_tilegroup: usize,
    /// Number of active-tilegroup buckets; more buckets spread the
    /// fetch-and-add contention of parallel inserters.
    pub active_tilegroup_count: usize,
    /// Number of active indirection-array buckets.
    pub active_indirection_array_count: usize,
}

impl Default for DataTableOptions {
    fn default() -> Self {
        Self {
            tuples_per_tilegroup: 1000,
            active_tilegroup_count: 1,
            active_indirection_array_count: 1,
        }
    }
}

/// A table: a growable set of tilegroups, the active buckets new slots are
/// carved from, and the indirection arrays backing its primary index.
///
/// The table never reclaims slots itself; recycling is the garbage
/// collector's business. `number_of_tuples` is advisory (maintained with
/// relaxed atomics, eventually consistent) and is used for bucket selection
/// and statistics, never for correctness.
#[derive(Debug)]
pub struct DataTable {
    oid: TableId,
    name: String,
    schema: Schema,
    catalog: Arc<CatalogManager>,
    tuples_per_tilegroup: usize,

    /// The layout newly created tilegroups receive.
    default_partition: RwLock<ColumnMap>,

    /// Every tilegroup id ever added, in creation order.
    tile_group_ids: RwLock<Vec<TileGroupId>>,
    tile_group_count: AtomicUsize,

    active_tile_groups: Vec<RwLock<Arc<TileGroup>>>,
    active_indirection_arrays: Vec<RwLock<Arc<IndirectionArray>>>,

    number_of_tuples: AtomicUsize,
    dirty: AtomicBool,
}

impl DataTable {
    pub fn new(
        oid: TableId,
        name: impl Into<String>,
        schema: Schema,
        catalog: Arc<CatalogManager>,
        options: DataTableOptions,
    ) -> Self {
        assert!(options.tuples_per_tilegroup > 0);
        assert!(options.active_tilegroup_count > 0);
        assert!(options.active_indirection_array_count > 0);

        let default_partition = ColumnMap::row(schema.column_count());
        let mut tile_group_ids = Vec::with_capacity(options.active_tilegroup_count);

        let active_tile_groups = (0..options.active_tilegroup_count)
            .map(|_| {
                let id = catalog.allocate_tile_group_id();
                let tile_group = Arc::new(TileGroup::new(
                    id,
                    &schema,
                    default_partition.clone(),
                    options.tuples_per_tilegroup,
                ));
                catalog.register_tile_group(tile_group.clone());
                tile_group_ids.push(id);
                RwLock::new(tile_group)
            })
            .collect();

        let active_indirection_arrays = (0..options.active_indirection_array_count)
            .map(|_| {
                let array = Arc::new(IndirectionArray::new(catalog.allocate_indirection_array_id()));
                catalog.register_indirection_array(array.clone());
                RwLock::new(array)
            })
            .collect();

        Self {
            oid,
            name: name.into(),
            schema,
            catalog,
            tuples_per_tilegroup: options.tuples_per_tilegroup,
            default_partition: RwLock::new(default_partition),
            tile_group_count: AtomicUsize::new(options.active_tilegroup_count),
            tile_group_ids: RwLock::new(tile_group_ids),
            active_tile_groups,
            active_indirection_arrays,
            number_of_tuples: AtomicUsize::new(0),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn oid(&self) -> TableId {
        self.oid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn catalog(&self) -> &Arc<CatalogManager> {
        &self.catalog
    }

    // Tuple operations.

    /// Claims a slot and copies `tuple` into it, leaving the slot owned by
    /// `owner` with an unbounded commit interval. The caller is expected to
    /// follow up with the transaction manager's insert bookkeeping.
    pub fn insert_tuple(&self, tuple: &Tuple, owner: TxnId) -> Result<ItemPointer, TableError> {
        self.check_constraints(tuple)?;
        let location = self.get_empty_tuple_slot(Some(tuple))?;
        // The slot is unpublished: nothing else can race this plain store.
        let tile_group = self.catalog.tile_group(location.block)?;
        tile_group.header().set_transaction_id(location.offset, owner);
        self.increase_tuple_count(1);
        Ok(location)
    }

    /// Claims an uninitialized slot for the empty version a delete installs.
    pub fn insert_empty_version(&self) -> Result<ItemPointer, TableError> {
        let location = self.get_empty_tuple_slot(None)?;
        self.increase_tuple_count(1);
        Ok(location)
    }

    /// Claims an uninitialized slot for the new version an update installs.
    /// The executor copies data in place later, minimizing copy overhead.
    pub fn acquire_version(&self) -> Result<ItemPointer, TableError> {
        let location = self.get_empty_tuple_slot(None)?;
        self.increase_tuple_count(1);
        Ok(location)
    }

    /// Reserves the next unused slot in the bucket's active tilegroup.
    ///
    /// When the active tilegroup is exhausted a new one is installed into
    /// the bucket; a single installer wins and losers re-read. Handing out a
    /// tilegroup's *last* slot proactively installs the successor so the
    /// next allocation does not stall behind tilegroup construction.
    pub fn get_empty_tuple_slot(&self, tuple: Option<&Tuple>) -> Result<ItemPointer, TableError> {
        let bucket = self.number_of_tuples.load(Ordering::Relaxed) % self.active_tile_groups.len();

        for _ in 0..MAX_SLOT_ALLOCATION_RETRIES {
            let tile_group = self.active_tile_groups[bucket].read().clone();
            match tile_group.insert_tuple(tuple) {
                Some(slot) => {
                    if slot == tile_group.allocated_tuple_count() - 1 {
                        self.install_tile_group(bucket, &tile_group);
                    }
                    return Ok(ItemPointer::new(tile_group.id(), slot));
                }
                None => self.install_tile_group(bucket, &tile_group),
            }
        }

        log::error!("slot allocation starved in table `{}`", self.name);
        Err(TableError::SlotAllocationFailed {
            table: self.name.clone(),
        })
    }

    /// Replaces `exhausted` in `bucket` with a fresh default tilegroup.
    /// No-op when another thread already swapped the bucket.
    fn install_tile_group(&self, bucket: usize, exhausted: &Arc<TileGroup>) {
        let mut active = self.active_tile_groups[bucket].write();
        if !Arc::ptr_eq(&active, exhausted) {
            return;
        }
        let id = self.catalog.allocate_tile_group_id();
        let tile_group = Arc::new(TileGroup::new(
            id,
            &self.schema,
            self.default_partition.read().clone(),
            self.tuples_per_tilegroup,
        ));
        self.catalog.register_tile_group(tile_group.clone());
        self.tile_group_ids.write().push(id);
        *active = tile_group;
        self.tile_group_count.fetch_add(1, Ordering::Release);
        log::trace!("table `{}`: installed tilegroup {id} in bucket {bucket}", self.name);
    }

    /// Claims an indirection cell initialized to `head`, rotating to a new
    /// array when the bucket's active one fills up.
    pub fn allocate_indirection_cell(
        &self,
        head: ItemPointer,
    ) -> Result<IndirectionPointer, TableError> {
        let bucket =
            self.number_of_tuples.load(Ordering::Relaxed) % self.active_indirection_arrays.len();

        for _ in 0..MAX_SLOT_ALLOCATION_RETRIES {
            let array = self.active_indirection_arrays[bucket].read().clone();
            if let Some(ptr) = array.allocate_cell(head) {
                return Ok(ptr);
            }
            let mut active = self.active_indirection_arrays[bucket].write();
            if Arc::ptr_eq(&active, &array) {
                let fresh = Arc::new(IndirectionArray::new(self.catalog.allocate_indirection_array_id()));
                self.catalog.register_indirection_array(fresh.clone());
                *active = fresh;
            }
        }

        Err(TableError::SlotAllocationFailed {
            table: self.name.clone(),
        })
    }

    fn check_constraints(&self, tuple: &Tuple) -> Result<(), TableError> {
        assert_eq!(tuple.column_count(), self.schema.column_count());
        for (col, column) in self.schema.iter() {
            if tuple.value(col).is_null() && !column.allows_null() {
                log::trace!(
                    "NOT NULL violated by column `{}` of table `{}`",
                    column.name(),
                    self.name
                );
                return Err(TableError::ConstraintViolation {
                    table: self.name.clone(),
                    column: column.name().to_owned(),
                });
            }
        }
        Ok(())
    }

    // Tilegroup access.

    pub fn tile_group_count(&self) -> usize {
        self.tile_group_count.load(Ordering::Acquire)
    }

    pub fn tile_group_id(&self, tile_group_offset: usize) -> Option<TileGroupId> {
        self.tile_group_ids.read().get(tile_group_offset).copied()
    }

    pub fn tile_group(&self, tile_group_offset: usize) -> Result<Arc<TileGroup>, TableError> {
        let id = self
            .tile_group_ids
            .read()
            .get(tile_group_offset)
            .copied()
            .unwrap_or_else(|| panic!("tilegroup offset {tile_group_offset} out of range"));
        Ok(self.catalog.tile_group(id)?)
    }

    // Layout.

    pub fn set_default_layout(&self, layout: ColumnMap) {
        assert_eq!(layout.column_count(), self.schema.column_count());
        *self.default_partition.write() = layout;
    }

    pub fn default_layout(&self) -> ColumnMap {
        self.default_partition.read().clone()
    }

    /// Per-tile column counts of the default partition.
    pub fn column_map_stats(&self) -> BTreeMap<u32, u32> {
        self.default_partition.read().column_map_stats()
    }

    /// Rewrites the tilegroup at `tile_group_offset` into the table's
    /// default partition when its layout diverges by strictly more than
    /// `theta`, re-registering the same tilegroup id to the new object.
    ///
    /// Returns `Ok(None)` when nothing needed to change. Headers are copied
    /// wholesale, so all MVCC state (ownership, intervals, chain links) is
    /// preserved and visibility is unaffected.
    ///
    /// Concurrent *readers* are safe: they resolve the tilegroup id through
    /// the catalog on every access and may finish a read against the old
    /// object, which stays alive until the last `Arc` drops. The caller must
    /// ensure no transaction concurrently *writes* the tilegroup while it is
    /// being transformed.
    pub fn transform_tile_group(
        &self,
        tile_group_offset: usize,
        theta: f64,
    ) -> Result<Option<Arc<TileGroup>>, TableError> {
        let Some(id) = self.tile_group_id(tile_group_offset) else {
            log::error!("tilegroup offset {tile_group_offset} not found in table `{}`", self.name);
            return Ok(None);
        };
        let tile_group = self.catalog.tile_group(id)?;

        let default_partition = self.default_partition.read().clone();
        let diff = tile_group.column_map().divergence(&default_partition);
        if diff <= theta {
            return Ok(None);
        }

        log::trace!("table `{}`: transforming tilegroup {id} (divergence {diff:.3})", self.name);

        let capacity = tile_group.allocated_tuple_count();
        let new_tile_group = Arc::new(TileGroup::new(
            id,
            &self.schema,
            default_partition,
            capacity as usize,
        ));

        // Copy the values column at a time.
        for col in 0..self.schema.column_count() {
            let col = ColId(col as u32);
            for slot in 0..capacity {
                // SAFETY: writers are quiesced per this method's contract, so
                // no slot value is concurrently mutated; the new tilegroup is
                // still private to us.
                unsafe { new_tile_group.set_value(col, slot, tile_group.value(col, slot)) };
            }
        }

        // Copy the header wholesale: the MVCC state moves with the id.
        new_tile_group.header().copy_from(tile_group.header());

        self.catalog.register_tile_group(new_tile_group.clone());
        Ok(Some(new_tile_group))
    }

    // Advisory tuple-count bookkeeping.

    pub fn increase_tuple_count(&self, amount: usize) {
        self.number_of_tuples.fetch_add(amount, Ordering::Relaxed);
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn decrease_tuple_count(&self, amount: usize) {
        self.number_of_tuples.fetch_sub(amount, Ordering::Relaxed);
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn set_tuple_count(&self, count: usize) {
        self.number_of_tuples.store(count, Ordering::Relaxed);
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn tuple_count(&self) -> usize {
        self.number_of_tuples.load(Ordering::Relaxed)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    pub fn reset_dirty(&self) {
        self.dirty.store(false, Ordering::Relaxed);
    }
}

impl Drop for DataTable {
    fn drop(&mut self) {
        for id in self.tile_group_ids.get_mut().drain(..) {
            self.catalog.drop_tile_group(id);
        }
        for array in &self.active_indirection_arrays {
            self.catalog.drop_indirection_array(array.read().id());
        }
    }
}
