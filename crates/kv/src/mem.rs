//! The in-memory MVCC store.
//!
//! Committed state lives in an immutable [Snapshot] behind an `Arc`. Read
//! transactions pin the snapshot that was current when they began, so they
//! never block the writer and never observe its in-flight writes. The single
//! write transaction keeps a tombstone overlay on top of its base snapshot;
//! commit materialises a new snapshot and swaps the `Arc`, making all writes
//! visible atomically.

use crate::{
    traits::{DbCursor, DbTx, DbTxMut, PairResult, Store, ValueResult},
    KvError, Table,
};
use parking_lot::{Condvar, Mutex, RwLock};
use std::{
    collections::BTreeMap,
    ops::Bound,
    path::{Path, PathBuf},
    sync::Arc,
};

type TableMap = BTreeMap<Vec<u8>, Vec<u8>>;
type OverlayMap = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// One immutable version of the whole store.
#[derive(Debug, Default)]
struct Snapshot {
    tables: [TableMap; Table::COUNT],
}

#[derive(Debug, Default)]
struct WriterSlot {
    busy: Mutex<bool>,
    released: Condvar,
}

#[derive(Debug)]
struct Inner {
    committed: RwLock<Arc<Snapshot>>,
    writer: WriterSlot,
    path: Option<PathBuf>,
}

/// The in-memory MVCC store.
#[derive(Debug, Clone)]
pub struct MemStore {
    inner: Arc<Inner>,
}

impl MemStore {
    /// Creates a store with no backing directory.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Inner {
                committed: RwLock::new(Arc::new(Snapshot::default())),
                writer: WriterSlot::default(),
                path: None,
            }),
        }
    }

    /// Opens a store rooted at `path`, creating the directory if needed.
    /// Immutable segment files live underneath it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        Ok(Self {
            inner: Arc::new(Inner {
                committed: RwLock::new(Arc::new(Snapshot::default())),
                writer: WriterSlot::default(),
                path: Some(path),
            }),
        })
    }

    /// The directory holding immutable segment files, when the store was
    /// opened at a path.
    pub fn segments_dir(&self) -> Option<PathBuf> {
        self.inner.path.as_ref().map(|path| path.join("segments"))
    }
}

impl Store for MemStore {
    type Tx = ReadTx;
    type TxMut = WriteTx;

    fn tx(&self) -> Result<ReadTx, KvError> {
        Ok(ReadTx { snapshot: Arc::clone(&self.inner.committed.read()) })
    }

    fn tx_mut(&self) -> Result<WriteTx, KvError> {
        let mut busy = self.inner.writer.busy.lock();
        while *busy {
            self.inner.writer.released.wait(&mut busy);
        }
        *busy = true;
        drop(busy);

        let base = Arc::clone(&self.inner.committed.read());
        Ok(WriteTx {
            inner: Arc::clone(&self.inner),
            base,
            overlay: std::array::from_fn(|_| OverlayMap::new()),
            cleared: [false; Table::COUNT],
            finished: false,
        })
    }
}

/// A read transaction pinned to one snapshot.
#[derive(Debug)]
pub struct ReadTx {
    snapshot: Arc<Snapshot>,
}

impl DbTx for ReadTx {
    type Cursor<'a> = MemCursor<'a>;

    fn get(&self, table: Table, key: &[u8]) -> ValueResult {
        Ok(self.snapshot.tables[table.index()].get(key).cloned())
    }

    fn cursor(&self, table: Table) -> Result<MemCursor<'_>, KvError> {
        Ok(MemCursor::new(&self.snapshot.tables[table.index()], None, false))
    }
}

/// The write transaction: a tombstone overlay over its base snapshot.
#[derive(Debug)]
pub struct WriteTx {
    inner: Arc<Inner>,
    base: Arc<Snapshot>,
    overlay: [OverlayMap; Table::COUNT],
    cleared: [bool; Table::COUNT],
    finished: bool,
}

impl WriteTx {
    fn release_writer(&self) {
        let mut busy = self.inner.writer.busy.lock();
        *busy = false;
        self.inner.writer.released.notify_one();
    }
}

impl DbTx for WriteTx {
    type Cursor<'a> = MemCursor<'a>;

    fn get(&self, table: Table, key: &[u8]) -> ValueResult {
        let index = table.index();
        if let Some(entry) = self.overlay[index].get(key) {
            return Ok(entry.clone());
        }
        if self.cleared[index] {
            return Ok(None);
        }
        Ok(self.base.tables[index].get(key).cloned())
    }

    fn cursor(&self, table: Table) -> Result<MemCursor<'_>, KvError> {
        let index = table.index();
        Ok(MemCursor::new(
            &self.base.tables[index],
            Some(&self.overlay[index]),
            self.cleared[index],
        ))
    }
}

impl DbTxMut for WriteTx {
    fn put(&mut self, table: Table, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.overlay[table.index()].insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, table: Table, key: &[u8]) -> Result<(), KvError> {
        self.overlay[table.index()].insert(key.to_vec(), None);
        Ok(())
    }

    fn clear(&mut self, table: Table) -> Result<(), KvError> {
        let index = table.index();
        self.overlay[index].clear();
        self.cleared[index] = true;
        Ok(())
    }

    fn commit(mut self) -> Result<(), KvError> {
        let mut snapshot = Snapshot::default();
        for table in Table::ALL {
            let index = table.index();
            let mut map =
                if self.cleared[index] { TableMap::new() } else { self.base.tables[index].clone() };
            for (key, entry) in std::mem::take(&mut self.overlay[index]) {
                match entry {
                    Some(value) => {
                        map.insert(key, value);
                    }
                    None => {
                        map.remove(&key);
                    }
                }
            }
            snapshot.tables[index] = map;
        }
        *self.inner.committed.write() = Arc::new(snapshot);
        self.release_writer();
        self.finished = true;
        Ok(())
    }

    fn abort(mut self) {
        self.release_writer();
        self.finished = true;
    }
}

impl Drop for WriteTx {
    fn drop(&mut self) {
        if !self.finished {
            self.release_writer();
        }
    }
}

/// An ordered cursor merging a base table with a write overlay.
///
/// Navigation is stateless against the underlying maps: every step is a pair
/// of range queries from the current key, so the cursor stays coherent
/// regardless of interleaved reads.
#[derive(Debug)]
pub struct MemCursor<'tx> {
    base: &'tx TableMap,
    overlay: Option<&'tx OverlayMap>,
    base_cleared: bool,
    position: Option<Vec<u8>>,
}

impl<'tx> MemCursor<'tx> {
    fn new(base: &'tx TableMap, overlay: Option<&'tx OverlayMap>, base_cleared: bool) -> Self {
        Self { base, overlay, base_cleared, position: None }
    }

    fn base_range_next(&self, lower: &Bound<Vec<u8>>) -> Option<(&'tx Vec<u8>, &'tx Vec<u8>)> {
        if self.base_cleared {
            return None;
        }
        self.base.range((lower.clone(), Bound::Unbounded)).next()
    }

    fn base_range_prev(&self, upper: &Bound<Vec<u8>>) -> Option<(&'tx Vec<u8>, &'tx Vec<u8>)> {
        if self.base_cleared {
            return None;
        }
        self.base.range((Bound::Unbounded, upper.clone())).next_back()
    }

    /// The smallest live entry with key within `(lower, ..]`.
    fn next_live(&self, mut lower: Bound<Vec<u8>>) -> Option<(Vec<u8>, Vec<u8>)> {
        loop {
            let base = self.base_range_next(&lower);
            let overlay = self
                .overlay
                .and_then(|map| map.range((lower.clone(), Bound::Unbounded)).next());

            let key = match (base, overlay) {
                (None, None) => return None,
                (Some((key, value)), None) => return Some((key.clone(), value.clone())),
                (None, Some((key, entry))) | (Some((_, _)), Some((key, entry)))
                    if base.is_none() || key <= base.unwrap().0 =>
                {
                    match entry {
                        Some(value) => return Some((key.clone(), value.clone())),
                        None => key.clone(),
                    }
                }
                (Some((key, value)), Some(_)) => return Some((key.clone(), value.clone())),
                (None, Some((_, _))) => unreachable!("guard above is exhaustive when base is None"),
            };
            // The overlay entry was a tombstone: resume past it.
            lower = Bound::Excluded(key);
        }
    }

    /// The largest live entry with key within `[.., upper)`.
    fn prev_live(&self, mut upper: Bound<Vec<u8>>) -> Option<(Vec<u8>, Vec<u8>)> {
        loop {
            let base = self.base_range_prev(&upper);
            let overlay = self
                .overlay
                .and_then(|map| map.range((Bound::Unbounded, upper.clone())).next_back());

            let key = match (base, overlay) {
                (None, None) => return None,
                (Some((key, value)), None) => return Some((key.clone(), value.clone())),
                (None, Some((key, entry))) | (Some((_, _)), Some((key, entry)))
                    if base.is_none() || key >= base.unwrap().0 =>
                {
                    match entry {
                        Some(value) => return Some((key.clone(), value.clone())),
                        None => key.clone(),
                    }
                }
                (Some((key, value)), Some(_)) => return Some((key.clone(), value.clone())),
                (None, Some((_, _))) => unreachable!("guard above is exhaustive when base is None"),
            };
            upper = Bound::Excluded(key);
        }
    }

    fn lookup(&self, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(entry) = self.overlay.and_then(|map| map.get(key)) {
            return entry.clone();
        }
        if self.base_cleared {
            return None;
        }
        self.base.get(key).cloned()
    }

    fn settle(&mut self, entry: Option<(Vec<u8>, Vec<u8>)>) -> PairResult {
        self.position = entry.as_ref().map(|(key, _)| key.clone());
        Ok(entry)
    }
}

impl DbCursor for MemCursor<'_> {
    fn first(&mut self) -> PairResult {
        let entry = self.next_live(Bound::Unbounded);
        self.settle(entry)
    }

    fn last(&mut self) -> PairResult {
        let entry = self.prev_live(Bound::Unbounded);
        self.settle(entry)
    }

    fn next(&mut self) -> PairResult {
        let entry = match self.position.take() {
            None => self.next_live(Bound::Unbounded),
            Some(position) => self.next_live(Bound::Excluded(position)),
        };
        self.settle(entry)
    }

    fn prev(&mut self) -> PairResult {
        let entry = match self.position.take() {
            None => self.prev_live(Bound::Unbounded),
            Some(position) => self.prev_live(Bound::Excluded(position)),
        };
        self.settle(entry)
    }

    fn seek(&mut self, key: &[u8]) -> PairResult {
        let entry = self.next_live(Bound::Included(key.to_vec()));
        self.settle(entry)
    }

    fn seek_exact(&mut self, key: &[u8]) -> PairResult {
        let entry = self.lookup(key).map(|value| (key.to_vec(), value));
        self.settle(entry)
    }

    fn current(&mut self) -> PairResult {
        match self.position.clone() {
            None => Ok(None),
            Some(position) => {
                let entry = self.lookup(&position).map(|value| (position, value));
                Ok(entry)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::{collection::btree_map, prelude::*};

    const T: Table = Table::PlainState;

    fn store_with(pairs: &[(&[u8], &[u8])]) -> MemStore {
        let store = MemStore::in_memory();
        let mut tx = store.tx_mut().unwrap();
        for (key, value) in pairs {
            tx.put(T, key, value).unwrap();
        }
        tx.commit().unwrap();
        store
    }

    #[test]
    fn test_get_put_roundtrip() {
        let store = store_with(&[(b"a", b"1")]);
        let tx = store.tx().unwrap();
        assert_eq!(tx.get(T, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(tx.get(T, b"b").unwrap(), None);
    }

    #[test]
    fn test_readers_keep_their_snapshot() {
        let store = store_with(&[(b"a", b"1")]);
        let reader = store.tx().unwrap();

        let mut writer = store.tx_mut().unwrap();
        writer.put(T, b"a", b"2").unwrap();
        writer.put(T, b"b", b"3").unwrap();
        writer.commit().unwrap();

        // The old reader still sees the old version.
        assert_eq!(reader.get(T, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(reader.get(T, b"b").unwrap(), None);

        // A fresh reader sees the commit.
        let reader = store.tx().unwrap();
        assert_eq!(reader.get(T, b"a").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_abort_discards_writes() {
        let store = store_with(&[(b"a", b"1")]);
        let mut writer = store.tx_mut().unwrap();
        writer.put(T, b"a", b"2").unwrap();
        writer.abort();
        assert_eq!(store.tx().unwrap().get(T, b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_writer_sees_own_writes_through_cursor() {
        let store = store_with(&[(b"b", b"base"), (b"d", b"base")]);
        let mut writer = store.tx_mut().unwrap();
        writer.put(T, b"a", b"new").unwrap();
        writer.put(T, b"c", b"new").unwrap();
        writer.delete(T, b"d").unwrap();

        let mut cursor = writer.cursor(T).unwrap();
        let mut keys = Vec::new();
        let mut entry = cursor.first().unwrap();
        while let Some((key, _)) = entry {
            keys.push(key);
            entry = cursor.next().unwrap();
        }
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_cursor_seek_and_prev() {
        let store = store_with(&[(b"a", b"1"), (b"c", b"3"), (b"e", b"5")]);
        let tx = store.tx().unwrap();
        let mut cursor = tx.cursor(T).unwrap();

        let (key, _) = cursor.seek(b"b").unwrap().unwrap();
        assert_eq!(key, b"c".to_vec());
        let (key, _) = cursor.prev().unwrap().unwrap();
        assert_eq!(key, b"a".to_vec());
        assert_eq!(cursor.prev().unwrap(), None);

        let (key, _) = cursor.last().unwrap().unwrap();
        assert_eq!(key, b"e".to_vec());
        assert_eq!(cursor.next().unwrap(), None);
    }

    #[test]
    fn test_seek_exact_misses_nearby_keys() {
        let store = store_with(&[(b"aa", b"1")]);
        let tx = store.tx().unwrap();
        let mut cursor = tx.cursor(T).unwrap();
        assert_eq!(cursor.seek_exact(b"a").unwrap(), None);
        assert!(cursor.seek_exact(b"aa").unwrap().is_some());
    }

    #[test]
    fn test_clear_table() {
        let store = store_with(&[(b"a", b"1"), (b"b", b"2")]);
        let mut writer = store.tx_mut().unwrap();
        writer.clear(T).unwrap();
        writer.put(T, b"c", b"3").unwrap();
        assert_eq!(writer.get(T, b"a").unwrap(), None);
        writer.commit().unwrap();

        let tx = store.tx().unwrap();
        assert_eq!(tx.get(T, b"a").unwrap(), None);
        assert_eq!(tx.get(T, b"c").unwrap(), Some(b"3".to_vec()));
    }

    proptest! {
        /// Invariant: seek + next traversal yields strictly ascending keys
        /// with no duplicates, and matches a reference BTreeMap merge.
        #[test]
        fn prop_cursor_traversal_is_sorted_unique(
            base in btree_map(proptest::collection::vec(any::<u8>(), 1..6), proptest::collection::vec(any::<u8>(), 0..4), 0..24),
            writes in btree_map(proptest::collection::vec(any::<u8>(), 1..6), proptest::option::of(proptest::collection::vec(any::<u8>(), 0..4)), 0..24),
            start in proptest::collection::vec(any::<u8>(), 0..6),
        ) {
            let store = MemStore::in_memory();
            let mut tx = store.tx_mut().unwrap();
            for (key, value) in &base {
                tx.put(T, key, value).unwrap();
            }
            tx.commit().unwrap();

            let mut tx = store.tx_mut().unwrap();
            let mut reference = base.clone();
            for (key, entry) in &writes {
                match entry {
                    Some(value) => {
                        tx.put(T, key, value).unwrap();
                        reference.insert(key.clone(), value.clone());
                    }
                    None => {
                        tx.delete(T, key).unwrap();
                        reference.remove(key);
                    }
                }
            }

            let mut cursor = tx.cursor(T).unwrap();
            let mut walked = Vec::new();
            let mut entry = cursor.seek(&start).unwrap();
            while let Some((key, value)) = entry {
                walked.push((key, value));
                entry = cursor.next().unwrap();
            }

            let expected: Vec<_> = reference
                .range(start.clone()..)
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            prop_assert_eq!(walked.clone(), expected);

            for window in walked.windows(2) {
                prop_assert!(window[0].0 < window[1].0);
            }
        }
    }
}
