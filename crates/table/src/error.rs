use mica_primitives::{IndirectionArrayId, TableId, TileGroupId};
use thiserror::Error;

/// Lookup failures against the [`CatalogManager`](crate::catalog::CatalogManager).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown tilegroup {0}: dropped or never registered")]
    UnknownTileGroup(TileGroupId),

    #[error("unknown indirection array {0}: dropped or never registered")]
    UnknownIndirectionArray(IndirectionArrayId),
}

/// Errors surfaced by table-level operations.
///
/// Per-tuple concurrency conflicts are deliberately *not* here; those are
/// `bool` returns from the transaction manager, and the executor decides
/// whether to abort.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("failed to allocate a tuple slot in table `{table}`")]
    SlotAllocationFailed { table: String },

    #[error("NOT NULL constraint violated: column `{column}` of table `{table}`")]
    ConstraintViolation { table: String, column: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Lookup failures against a [`Database`](crate::database::Database).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    #[error("table with oid {0} is not found")]
    UnknownTable(TableId),

    #[error("table with name `{0}` is not found")]
    UnknownTableName(String),
}
