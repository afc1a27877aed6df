//! The engine handle.
//!
//! There are no process-wide singletons: a [`Db`] bundles the catalog, the
//! transaction manager, the GC queue and the observer hooks, and every call
//! site reaches them through the handle. Tests construct isolated handles
//! and nothing survives teardown.

use crate::gc::GcQueue;
use crate::manager::TimestampOrderingTransactionManager;
use crate::stats::{NullStats, StatsSink};
use crate::wal::{NullWal, WriteAheadLog};
use mica_primitives::TableId;
use mica_table::{CatalogManager, DataTable, DataTableOptions};
use mica_table::schema::Schema;
use std::sync::Arc;

pub struct Db {
    catalog: Arc<CatalogManager>,
    txn_manager: TimestampOrderingTransactionManager,
    gc_queue: Arc<GcQueue>,
}

impl Db {
    /// An engine with no durability and no statistics.
    pub fn new() -> Self {
        Self::with_hooks(Arc::new(NullWal), Arc::new(NullStats))
    }

    /// An engine emitting into the given WAL and statistics sinks.
    pub fn with_hooks(wal: Arc<dyn WriteAheadLog>, stats: Arc<dyn StatsSink>) -> Self {
        let catalog = CatalogManager::new();
        let gc_queue = Arc::new(GcQueue::default());
        let txn_manager = TimestampOrderingTransactionManager::new(
            catalog.clone(),
            wal,
            stats,
            gc_queue.clone(),
        );
        Self {
            catalog,
            txn_manager,
            gc_queue,
        }
    }

    pub fn catalog(&self) -> &Arc<CatalogManager> {
        &self.catalog
    }

    pub fn txn_manager(&self) -> &TimestampOrderingTransactionManager {
        &self.txn_manager
    }

    pub fn gc_queue(&self) -> &Arc<GcQueue> {
        &self.gc_queue
    }

    /// Creates a table registered against this engine's catalog.
    pub fn create_table(
        &self,
        oid: TableId,
        name: impl Into<String>,
        schema: Schema,
        options: DataTableOptions,
    ) -> Arc<DataTable> {
        Arc::new(DataTable::new(oid, name, schema, self.catalog.clone(), options))
    }
}

impl Default for Db {
    fn default() -> Self {
        Self::new()
    }
}
