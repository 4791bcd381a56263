//! edis-store: ordered persistent key-value storage engines.
//!
//! The keyspace core treats storage as a black box: an ordered byte-key /
//! byte-value store with point reads, atomic batches, and in-order folds.
//! This crate defines that contract ([`OrderedStore`]) and ships two
//! engines: [`DiskStore`] on fjall (one LSM keyspace per shard directory)
//! and [`MemoryStore`] for tests and ephemeral deployments.

mod disk;
mod memory;

use std::ops::ControlFlow;
use std::path::Path;

use thiserror::Error;

pub use disk::DiskStore;
pub use memory::MemoryStore;

/// Errors surfaced by a storage engine.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store directory does not exist and creation was not requested.
    #[error("store not found at {0}")]
    NotFound(std::path::PathBuf),

    /// Filesystem-level failure.
    #[error("storage i/o: {0}")]
    Io(#[from] std::io::Error),

    /// Engine-internal failure (compaction, journal, corruption).
    #[error("storage engine: {0}")]
    Engine(String),
}

/// A single operation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// An ordered sequence of puts and deletes applied atomically.
///
/// Multi-key commands (RENAME, SMOVE, the *STORE operators) build a batch
/// so a crash can never expose a half-applied rename.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put(key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// An ordered byte-key byte-value store owned by exactly one keyspace actor.
///
/// Implementations are accessed from a single task at a time; they may use
/// internal synchronization but callers never rely on cross-handle
/// consistency. Iteration order is lexicographic over key bytes.
pub trait OrderedStore: Send + Sized + 'static {
    /// Opens (or creates) the store rooted at `path`.
    fn open(path: &Path, create_if_missing: bool) -> Result<Self, StoreError>;

    /// Point read. `Ok(None)` when the key is absent.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Inserts or replaces a record.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Removes a record. Deleting an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Applies a batch of puts/deletes atomically.
    fn write(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Whether the store currently holds no records.
    fn is_empty(&self) -> Result<bool, StoreError>;

    /// Folds over all `(key, value)` pairs in key order.
    ///
    /// `ControlFlow::Break` stops the scan early and yields its value.
    fn fold<A>(
        &self,
        init: A,
        f: impl FnMut(A, &[u8], &[u8]) -> ControlFlow<A, A>,
    ) -> Result<A, StoreError>;

    /// Folds over all keys in key order, without materializing values.
    fn fold_keys<A>(
        &self,
        init: A,
        f: impl FnMut(A, &[u8]) -> ControlFlow<A, A>,
    ) -> Result<A, StoreError>;

    /// Engine diagnostics keyed by property name. Unknown properties
    /// return `None`.
    fn status(&self, property: &str) -> Option<String>;

    /// Destroys and recreates the store in place.
    ///
    /// From the caller's perspective this is atomic: the handle stays
    /// valid and the store is empty afterwards. Backs FLUSHDB.
    fn reset(&mut self) -> Result<(), StoreError>;

    /// Removes a *closed* store's on-disk footprint. Engines without a
    /// footprint treat this as a no-op.
    fn destroy(path: &Path) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan<S: OrderedStore>(store: &S) -> Vec<(Vec<u8>, Vec<u8>)> {
        store
            .fold(Vec::new(), |mut acc, k, v| {
                acc.push((k.to_vec(), v.to_vec()));
                ControlFlow::Continue(acc)
            })
            .unwrap()
    }

    fn engine_round_trip<S: OrderedStore>(store: &S) {
        store.put(b"b", b"2").unwrap();
        store.put(b"a", b"1").unwrap();
        store.put(b"c", b"3").unwrap();

        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"missing").unwrap(), None);

        // folds walk keys in byte order
        let pairs = scan(store);
        let keys: Vec<_> = pairs.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

        store.delete(b"b").unwrap();
        assert_eq!(store.get(b"b").unwrap(), None);
        assert!(!store.is_empty().unwrap());
    }

    fn engine_batch<S: OrderedStore>(store: &S) {
        let mut batch = WriteBatch::new();
        batch.put(b"x".to_vec(), b"1".to_vec());
        batch.put(b"y".to_vec(), b"2".to_vec());
        batch.delete(b"x".to_vec());
        store.write(batch).unwrap();

        assert_eq!(store.get(b"x").unwrap(), None);
        assert_eq!(store.get(b"y").unwrap(), Some(b"2".to_vec()));
    }

    fn engine_early_exit<S: OrderedStore>(store: &S) {
        for k in [b"k1", b"k2", b"k3"] {
            store.put(k, b"v").unwrap();
        }
        let first = store
            .fold_keys(None, |_, k| ControlFlow::Break(Some(k.to_vec())))
            .unwrap();
        assert_eq!(first, Some(b"k1".to_vec()));
    }

    #[test]
    fn memory_engine_contract() {
        let store = MemoryStore::open(Path::new("unused"), true).unwrap();
        engine_round_trip(&store);
        engine_batch(&store);
    }

    #[test]
    fn memory_engine_early_exit() {
        let store = MemoryStore::open(Path::new("unused"), true).unwrap();
        engine_early_exit(&store);
    }

    #[test]
    fn memory_reset_empties() {
        let mut store = MemoryStore::open(Path::new("unused"), true).unwrap();
        store.put(b"k", b"v").unwrap();
        store.reset().unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn disk_engine_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path(), true).unwrap();
        engine_round_trip(&store);
        engine_batch(&store);
    }

    #[test]
    fn disk_engine_early_exit() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path(), true).unwrap();
        engine_early_exit(&store);
    }

    #[test]
    fn disk_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = DiskStore::open(dir.path(), true).unwrap();
            store.put(b"persistent", b"yes").unwrap();
        }
        let store = DiskStore::open(dir.path(), false).unwrap();
        assert_eq!(store.get(b"persistent").unwrap(), Some(b"yes".to_vec()));
    }

    #[test]
    fn disk_reset_empties() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DiskStore::open(dir.path(), true).unwrap();
        store.put(b"k", b"v").unwrap();
        store.reset().unwrap();
        assert!(store.is_empty().unwrap());
        assert_eq!(store.get(b"k").unwrap(), None);
    }

    #[test]
    fn disk_open_missing_without_create_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = DiskStore::open(&missing, false).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
