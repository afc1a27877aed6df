//! Resolving an index entry to the visible version.
//!
//! A primary index stores indirection cells, not slot addresses. Lookup is:
//! load the cell's head pointer atomically, then walk the `next` (older)
//! links until a version classifies as visible for the reading transaction.

use crate::manager::{TimestampOrderingTransactionManager, Visibility};
use crate::tx::TransactionContext;
use mica_primitives::{IndirectionPointer, ItemPointer};

/// Walks the version chain behind `entry` and returns the first version
/// visible to `txn`, or `None` when the tuple does not exist for this
/// transaction (never inserted as far as it can see, or deleted).
pub fn resolve_visible(
    manager: &TimestampOrderingTransactionManager,
    txn: &TransactionContext,
    entry: IndirectionPointer,
) -> Option<ItemPointer> {
    let catalog = manager.catalog();
    let mut current = catalog
        .indirection_head(entry)
        .expect("indirection array must stay registered while the index references it");

    while !current.is_null() {
        // Look the tilegroup up by id on every hop: layout transformation
        // may swap the object between accesses.
        let tile_group = catalog
            .tile_group(current.block)
            .expect("tilegroup must stay registered while the version chain references it");
        let header = tile_group.header();

        match manager.visibility(txn, header, current.offset) {
            Visibility::Visible => return Some(current),
            Visibility::Deleted => return None,
            Visibility::Invisible | Visibility::InvisibleFuture => {
                current = header.next_item_pointer(current.offset);
            }
        }
    }
    None
}
