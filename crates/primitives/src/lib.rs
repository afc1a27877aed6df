//! Identifier and address types shared across the storage engine.
//!
//! Everything in here is `Copy` and word-sized (or two words, in the case of
//! an unpacked [`ItemPointer`]). The packed `u64` encodings exist so that a
//! pointer can live inside a single atomic cell and be swung with one CAS.

use derive_more::{Display, From, Into};

/// Asserts that `$ty` is `$size` bytes in `static_assert_size($ty, $size)`.
///
/// Used to statically keep an eye on hot per-slot structures.
#[macro_export]
macro_rules! static_assert_size {
    ($ty:ty, $size:expr) => {
        const _: [(); $size] = [(); ::core::mem::size_of::<$ty>()];
    };
}

/// Object identifiers are 32-bit and allocated monotonically per kind.
pub type Oid = u32;

/// The reserved "no such object" oid.
pub const INVALID_OID: Oid = u32::MAX;

/// A commit id. Allocated from a single monotonic counter, starting at
/// [`START_CID`].
pub type Cid = u64;

/// The tombstone / "empty version" marker on `end_cid`.
pub const INVALID_CID: Cid = 0;
/// The first commit id ever handed out.
pub const START_CID: Cid = 1;
/// "Not yet bounded": a version with `begin_cid == MAX_CID` is uncommitted,
/// one with `end_cid == MAX_CID` is the latest committed version.
pub const MAX_CID: Cid = u64::MAX;

/// A transaction id. Lives in a value space disjoint from [`Cid`]: live ids
/// are allocated from [`START_TXN_ID`] upward.
pub type TxnId = u64;

/// The slot is logically deleted or was aborted; nothing owns it anymore.
pub const INVALID_TXN_ID: TxnId = 0;
/// The slot holds a committed version with no live owner.
pub const INITIAL_TXN_ID: TxnId = 1;
/// Live transaction ids start here, far above any commit id.
pub const START_TXN_ID: TxnId = 1 << 63;

macro_rules! oid_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display, From, Into)]
        pub struct $name(pub Oid);

        impl $name {
            pub const INVALID: Self = Self(INVALID_OID);

            pub const fn is_invalid(self) -> bool {
                self.0 == INVALID_OID
            }

            pub const fn idx(self) -> usize {
                self.0 as usize
            }
        }
    };
}

oid_newtype!(
    /// Identifies a database within the process.
    DatabaseId
);
oid_newtype!(
    /// Identifies a table within a database.
    TableId
);
oid_newtype!(
    /// Identifies a tilegroup process-wide. Tilegroup ids survive layout
    /// transformation: the id is re-registered to the new tilegroup object.
    TileGroupId
);
oid_newtype!(
    /// Identifies an indirection array process-wide.
    IndirectionArrayId
);
oid_newtype!(
    /// A logical column position within a table schema.
    ColId
);

/// The physical address of a tuple slot: `(tilegroup, offset)`.
///
/// Immutable once published; stable for the lifetime of the slot. The null
/// pointer is `(INVALID_OID, INVALID_OID)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ItemPointer {
    pub block: TileGroupId,
    pub offset: Oid,
}

static_assert_size!(ItemPointer, 8);

impl ItemPointer {
    pub const NULL: Self = Self {
        block: TileGroupId::INVALID,
        offset: INVALID_OID,
    };

    pub const fn new(block: TileGroupId, offset: Oid) -> Self {
        Self { block, offset }
    }

    pub const fn is_null(self) -> bool {
        self.block.0 == INVALID_OID && self.offset == INVALID_OID
    }

    /// Packs into a single `u64` (`block` in the high half) so the pointer
    /// fits in one atomic word. [`ItemPointer::NULL`] packs to `u64::MAX`.
    pub const fn to_packed(self) -> u64 {
        (self.block.0 as u64) << 32 | self.offset as u64
    }

    pub const fn from_packed(packed: u64) -> Self {
        Self {
            block: TileGroupId((packed >> 32) as u32),
            offset: packed as u32,
        }
    }
}

/// Names a cell inside an indirection array: `(array, cell)`.
///
/// Primary indexes store these, not `ItemPointer`s; the cell's content is the
/// current head of a version chain. Headers store the backpointer packed, and
/// resolution goes through the catalog by id, so no ownership cycle forms.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct IndirectionPointer {
    pub array: IndirectionArrayId,
    pub cell: Oid,
}

static_assert_size!(IndirectionPointer, 8);

impl IndirectionPointer {
    pub const NULL: Self = Self {
        array: IndirectionArrayId::INVALID,
        cell: INVALID_OID,
    };

    pub const fn new(array: IndirectionArrayId, cell: Oid) -> Self {
        Self { array, cell }
    }

    pub const fn is_null(self) -> bool {
        self.array.0 == INVALID_OID && self.cell == INVALID_OID
    }

    pub const fn to_packed(self) -> u64 {
        (self.array.0 as u64) << 32 | self.cell as u64
    }

    pub const fn from_packed(packed: u64) -> Self {
        Self {
            array: IndirectionArrayId((packed >> 32) as u32),
            cell: packed as u32,
        }
    }
}
