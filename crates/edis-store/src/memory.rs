//! In-memory ordered engine. Used by unit tests and ephemeral shards.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::RwLock;

use crate::{BatchOp, OrderedStore, StoreError, WriteBatch};

/// BTreeMap-backed store with the same ordering contract as [`crate::DiskStore`].
///
/// The lock only satisfies the `&self` mutation signature shared with the
/// disk engine; an actor owns its store exclusively, so there is never
/// contention.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>>, StoreError> {
        self.entries
            .read()
            .map_err(|_| StoreError::Engine("memory store lock poisoned".into()))
    }

    fn write_guard(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>>, StoreError> {
        self.entries
            .write()
            .map_err(|_| StoreError::Engine("memory store lock poisoned".into()))
    }
}

impl OrderedStore for MemoryStore {
    fn open(_path: &Path, _create_if_missing: bool) -> Result<Self, StoreError> {
        Ok(Self::new())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.read()?.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.write_guard()?.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.write_guard()?.remove(key);
        Ok(())
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut guard = self.write_guard()?;
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => {
                    guard.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    guard.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.read()?.is_empty())
    }

    fn fold<A>(
        &self,
        init: A,
        mut f: impl FnMut(A, &[u8], &[u8]) -> ControlFlow<A, A>,
    ) -> Result<A, StoreError> {
        let guard = self.read()?;
        let mut acc = init;
        for (key, value) in guard.iter() {
            match f(acc, key, value) {
                ControlFlow::Continue(next) => acc = next,
                ControlFlow::Break(done) => return Ok(done),
            }
        }
        Ok(acc)
    }

    fn fold_keys<A>(
        &self,
        init: A,
        mut f: impl FnMut(A, &[u8]) -> ControlFlow<A, A>,
    ) -> Result<A, StoreError> {
        let guard = self.read()?;
        let mut acc = init;
        for key in guard.keys() {
            match f(acc, key) {
                ControlFlow::Continue(next) => acc = next,
                ControlFlow::Break(done) => return Ok(done),
            }
        }
        Ok(acc)
    }

    fn status(&self, property: &str) -> Option<String> {
        match property {
            "len" => self.read().ok().map(|g| g.len().to_string()),
            _ => None,
        }
    }

    fn reset(&mut self) -> Result<(), StoreError> {
        self.write_guard()?.clear();
        Ok(())
    }

    fn destroy(_path: &Path) -> Result<(), StoreError> {
        Ok(())
    }
}
