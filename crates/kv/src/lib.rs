//! Ordered key-value storage for the stele execution-layer client.
//!
//! Two halves live here: the mutable store (ordered tables behind MVCC
//! transactions, with cursors) and the immutable history side, a compressed
//! segment format with an Elias-Fano offset index for O(1) random access.

mod errors;
pub use errors::KvError;

pub mod keys;

mod mem;
pub use mem::{MemCursor, MemStore, ReadTx, WriteTx};

pub mod segment;

mod tables;
pub use tables::Table;

mod traits;
pub use traits::{DbCursor, DbTx, DbTxMut, PairResult, Store, ValueResult};
