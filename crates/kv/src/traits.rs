//! The storage abstraction the execution core is written against.
//!
//! Read and write capability are split at the type level: a read-only
//! transaction simply has no `put`, so writing through one is a compile-time
//! fault. Read transactions observe a stable snapshot for their entire
//! lifetime; a single writer makes progress concurrently.

use crate::{KvError, Table};

/// A `(key, value)` pair result coming from a cursor.
pub type PairResult = Result<Option<(Vec<u8>, Vec<u8>)>, KvError>;

/// A bare value result coming from a point lookup.
pub type ValueResult = Result<Option<Vec<u8>>, KvError>;

/// An ordered cursor over one table. Pairs are yielded in ascending
/// lexicographic key order, which for the canonical key encodings equals
/// numeric order.
pub trait DbCursor {
    /// Positions at the first entry.
    fn first(&mut self) -> PairResult;

    /// Positions at the last entry.
    fn last(&mut self) -> PairResult;

    /// Advances to the next entry. Starts from the first entry when the
    /// cursor has not been positioned yet.
    fn next(&mut self) -> PairResult;

    /// Steps back to the previous entry.
    fn prev(&mut self) -> PairResult;

    /// Positions at the first entry with key `>= key`.
    fn seek(&mut self, key: &[u8]) -> PairResult;

    /// Positions at the entry with exactly `key`, if present.
    fn seek_exact(&mut self, key: &[u8]) -> PairResult;

    /// Returns the entry the cursor is currently positioned at.
    fn current(&mut self) -> PairResult;
}

/// A read transaction over a stable snapshot.
pub trait DbTx: Send {
    /// The cursor type for this transaction.
    type Cursor<'a>: DbCursor
    where
        Self: 'a;

    /// Point lookup. Absent keys are `Ok(None)`, not an error.
    fn get(&self, table: Table, key: &[u8]) -> ValueResult;

    /// Opens an ordered cursor over `table`.
    fn cursor(&self, table: Table) -> Result<Self::Cursor<'_>, KvError>;
}

/// A write transaction. At most one exists per store at any time.
pub trait DbTxMut: DbTx {
    /// Inserts or overwrites `key`.
    fn put(&mut self, table: Table, key: &[u8], value: &[u8]) -> Result<(), KvError>;

    /// Deletes `key` if present.
    fn delete(&mut self, table: Table, key: &[u8]) -> Result<(), KvError>;

    /// Removes every entry of `table`.
    fn clear(&mut self, table: Table) -> Result<(), KvError>;

    /// Atomically publishes all writes. Readers opened before the commit
    /// keep their snapshot.
    fn commit(self) -> Result<(), KvError>;

    /// Discards all writes.
    fn abort(self);
}

/// A store that can be opened at a path and hands out transactions.
pub trait Store: Clone + Send + Sync + 'static {
    /// Read transaction type.
    type Tx: DbTx + Sync;
    /// Write transaction type.
    type TxMut: DbTxMut + Send + Sync;

    /// Begins a read-only transaction pinned to the current snapshot.
    fn tx(&self) -> Result<Self::Tx, KvError>;

    /// Begins the write transaction, blocking while another is active.
    fn tx_mut(&self) -> Result<Self::TxMut, KvError>;

    /// Runs `f` inside a read transaction.
    fn view<T>(&self, f: impl FnOnce(&Self::Tx) -> Result<T, KvError>) -> Result<T, KvError> {
        let tx = self.tx()?;
        f(&tx)
    }

    /// Runs `f` inside a write transaction and commits on success.
    fn update<T>(
        &self,
        f: impl FnOnce(&mut Self::TxMut) -> Result<T, KvError>,
    ) -> Result<T, KvError> {
        let mut tx = self.tx_mut()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                tx.abort();
                Err(err)
            }
        }
    }
}
