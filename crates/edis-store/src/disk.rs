//! Fjall-backed persistent engine. One fjall keyspace per shard directory,
//! with all records in a single partition.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::debug;

use crate::{BatchOp, OrderedStore, StoreError, WriteBatch};

/// Name of the single partition holding keyspace records.
const ITEMS_PARTITION: &str = "items";

impl From<fjall::Error> for StoreError {
    fn from(err: fjall::Error) -> Self {
        StoreError::Engine(err.to_string())
    }
}

/// On-disk ordered store.
///
/// Fjall gives us an LSM keyspace with lexicographic iteration and atomic
/// cross-partition batches; we use a single partition and let the journal
/// provide write durability.
pub struct DiskStore {
    keyspace: Keyspace,
    items: PartitionHandle,
    path: PathBuf,
}

impl std::fmt::Debug for DiskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskStore")
            .field("path", &self.path)
            .finish()
    }
}

impl DiskStore {
    fn open_partition(keyspace: &Keyspace) -> Result<PartitionHandle, StoreError> {
        Ok(keyspace.open_partition(ITEMS_PARTITION, PartitionCreateOptions::default())?)
    }
}

impl OrderedStore for DiskStore {
    fn open(path: &Path, create_if_missing: bool) -> Result<Self, StoreError> {
        if !create_if_missing && !path.exists() {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }
        let keyspace = fjall::Config::new(path).open()?;
        let items = Self::open_partition(&keyspace)?;
        debug!(path = %path.display(), "opened disk store");
        Ok(Self {
            keyspace,
            items,
            path: path.to_path_buf(),
        })
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.items.get(key)?.map(|slice| slice.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        Ok(self.items.insert(key, value)?)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        Ok(self.items.remove(key)?)
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut inner = self.keyspace.batch();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => inner.insert(&self.items, key, value),
                BatchOp::Delete(key) => inner.remove(&self.items, key),
            };
        }
        Ok(inner.commit()?)
    }

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.items.is_empty()?)
    }

    fn fold<A>(
        &self,
        init: A,
        mut f: impl FnMut(A, &[u8], &[u8]) -> ControlFlow<A, A>,
    ) -> Result<A, StoreError> {
        let mut acc = init;
        for pair in self.items.iter() {
            let (key, value) = pair?;
            match f(acc, &key, &value) {
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
        let mut acc = init;
        for pair in self.items.iter() {
            let (key, _) = pair?;
            match f(acc, &key) {
                ControlFlow::Continue(next) => acc = next,
                ControlFlow::Break(done) => return Ok(done),
            }
        }
        Ok(acc)
    }

    fn status(&self, property: &str) -> Option<String> {
        match property {
            "path" => Some(self.path.display().to_string()),
            "disk_space" => Some(self.keyspace.disk_space().to_string()),
            _ => None,
        }
    }

    fn reset(&mut self) -> Result<(), StoreError> {
        self.keyspace.delete_partition(self.items.clone())?;
        self.items = Self::open_partition(&self.keyspace)?;
        debug!(path = %self.path.display(), "reset disk store");
        Ok(())
    }

    fn destroy(path: &Path) -> Result<(), StoreError> {
        if path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        Ok(())
    }
}
