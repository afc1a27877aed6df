//! Tile-group table storage.
//!
//! A [`DataTable`](data_table::DataTable) stores tuples in fixed-capacity
//! [`TileGroup`](tile_group::TileGroup)s. Within a tilegroup, values live
//! column-wise in one or more [`Tile`](tile::Tile)s; per-slot MVCC metadata
//! (owner, commit interval, version-chain links) lives in the
//! [`TileGroupHeader`](tile_group_header::TileGroupHeader). Slots are handed
//! out append-only and addressed by stable `ItemPointer`s.
//!
//! Tilegroups and [`IndirectionArray`](indirection::IndirectionArray)s are
//! registered in a [`CatalogManager`](catalog::CatalogManager) and always
//! resolved by id. This is what makes online layout transformation possible:
//! re-registering a tilegroup id swaps the storage object under readers
//! without invalidating any published address.

pub mod catalog;
pub mod data_table;
pub mod database;
pub mod error;
pub mod indirection;
pub mod layout;
pub mod schema;
pub mod tile;
pub mod tile_group;
pub mod tile_group_header;
pub mod tuple;

pub use catalog::CatalogManager;
pub use data_table::{DataTable, DataTableOptions};
pub use database::Database;
pub use error::{CatalogError, DatabaseError, TableError};
pub use tile_group::TileGroup;
pub use tile_group_header::TileGroupHeader;
