//! A database owns its tables.

use crate::data_table::DataTable;
use crate::error::DatabaseError;
use mica_primitives::{DatabaseId, TableId};
use parking_lot::Mutex;
use std::sync::Arc;

/// Container of [`DataTable`]s. Tables are few, so lookups scan the list;
/// mutation is rare and guarded by a mutex.
pub struct Database {
    oid: DatabaseId,
    tables: Mutex<Vec<Arc<DataTable>>>,
}

impl Database {
    pub fn new(oid: DatabaseId) -> Self {
        Self {
            oid,
            tables: Mutex::new(Vec::new()),
        }
    }

    pub fn oid(&self) -> DatabaseId {
        self.oid
    }

    pub fn add_table(&self, table: Arc<DataTable>) {
        self.tables.lock().push(table);
    }

    pub fn table_with_oid(&self, oid: TableId) -> Result<Arc<DataTable>, DatabaseError> {
        self.tables
            .lock()
            .iter()
            .find(|t| t.oid() == oid)
            .cloned()
            .ok_or(DatabaseError::UnknownTable(oid))
    }

    pub fn table_with_name(&self, name: &str) -> Result<Arc<DataTable>, DatabaseError> {
        self.tables
            .lock()
            .iter()
            .find(|t| t.name() == name)
            .cloned()
            .ok_or_else(|| DatabaseError::UnknownTableName(name.to_owned()))
    }

    pub fn drop_table_with_oid(&self, oid: TableId) -> Result<(), DatabaseError> {
        let mut tables = self.tables.lock();
        let idx = tables
            .iter()
            .position(|t| t.oid() == oid)
            .ok_or(DatabaseError::UnknownTable(oid))?;
        tables.swap_remove(idx);
        Ok(())
    }

    pub fn table_count(&self) -> usize {
        self.tables.lock().len()
    }

    /// Snapshot of the current table list.
    pub fn tables(&self) -> Vec<Arc<DataTable>> {
        self.tables.lock().clone()
    }
}
