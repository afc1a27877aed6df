//! The transactional layer of the storage engine.
//!
//! Append-only multi-version concurrency control with timestamp-ordering
//! conflict detection. Executors drive the
//! [`TimestampOrderingTransactionManager`](manager::TimestampOrderingTransactionManager)
//! with `ItemPointer`s; commit publishes versions by releasing the header
//! txn-id and swinging indirection heads, abort unlinks them again. The WAL,
//! statistics and garbage collection are observer hooks: the core calls
//! out, never in.

#[allow(clippy::module_inception)]
mod datastore;
pub mod gc;
pub mod manager;
pub mod stats;
pub mod tx;
pub mod version_chain;
pub mod wal;

pub use datastore::Db;
pub use gc::{GcQueue, RecycledVersion};
pub use manager::{TimestampOrderingTransactionManager, Visibility};
pub use stats::{CounterStats, NullStats, StatsSink};
pub use tx::{RwType, TransactionContext, TxnResult};
pub use version_chain::resolve_visible;
pub use wal::{NullWal, RecordingWal, WalRecord, WriteAheadLog};
