//! The keyspace: typed values over one ordered store.
//!
//! A `Keyspace` owns exactly one shard's store handle and implements every
//! command's read-modify-write semantics. All access funnels through the
//! expiry-gated [`Keyspace::get_item`] reader and the [`Keyspace::update`]
//! family, which enforce the type gate, lazy expiration, and the
//! empty-container rule in one place.
//!
//! The struct also carries the process-local bookkeeping that is *not*
//! persisted: access stamps for idle-time queries and the save timestamp.

use std::collections::HashMap;

use bytes::Bytes;

use edis_store::OrderedStore;

use crate::error::CommandError;
use crate::item::{Item, ItemEncoding, ItemType, Value};
use crate::time;

mod hashes;
mod keys;
mod lists;
mod server;
mod sets;
mod strings;
mod zsets;

pub use sets::SetOp;

/// Outcome of an update closure, carrying the reply fragment: write the
/// mutated record back, delete the key because the closure emptied it, or
/// keep the stored record untouched (e.g. LINSERT with a missing pivot).
pub(crate) enum Apply<T> {
    Write(T),
    Delete(T),
    Keep(T),
}

/// One shard's typed keyspace.
pub struct Keyspace<S: OrderedStore> {
    index: usize,
    store: S,
    /// Whole seconds captured when the keyspace came up.
    start_secs: u64,
    /// Fractional seconds of the last accepted SAVE.
    last_save: f64,
    /// key → seconds-offset-since-start of the most recent access.
    accesses: HashMap<Bytes, u64>,
}

impl<S: OrderedStore> Keyspace<S> {
    pub fn new(index: usize, store: S) -> Self {
        Self {
            index,
            store,
            start_secs: time::now_secs(),
            last_save: time::now_secs_f64(),
            accesses: HashMap::new(),
        }
    }

    /// This shard's database index.
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    /// The expiry-gated, type-checked reader.
    ///
    /// Absent keys and lazily-deleted expired records read as `None`. When
    /// `expected` is `None` ("any"), the record is returned regardless of
    /// its type; otherwise a mismatch is `WrongType`. A blob that fails to
    /// decode also reports `WrongType` and is left in place.
    pub(crate) fn get_item(
        &self,
        expected: Option<ItemType>,
        key: &[u8],
    ) -> Result<Option<Item>, CommandError> {
        let Some(blob) = self.store.get(key)? else {
            return Ok(None);
        };
        let item = Item::decode(&blob)?;
        if item.is_expired() {
            self.store.delete(key)?;
            return Ok(None);
        }
        match expected {
            Some(want) if item.item_type != want => Err(CommandError::WrongType),
            _ => Ok(Some(item)),
        }
    }

    /// Whether the byte slot is occupied, *ignoring* expiry. Only for
    /// callers whose semantics are about slot occupancy (the MOVE receive
    /// check); user-visible existence goes through [`Self::get_item`].
    pub(crate) fn exists_item(&self, key: &[u8]) -> Result<bool, CommandError> {
        Ok(self.store.get(key)?.is_some())
    }

    /// Encodes and writes a record under its key.
    pub(crate) fn put_item(&self, item: &Item) -> Result<(), CommandError> {
        let blob = item.encode()?;
        self.store.put(&item.key, &blob)?;
        Ok(())
    }

    /// Read-modify-write on an existing record. Fails with the internal
    /// `NotFound` signal when the key is absent; callers translate it
    /// (`NoSuchKey`, empty reply, park, ...).
    pub(crate) fn update<T>(
        &mut self,
        key: &[u8],
        item_type: ItemType,
        f: impl FnOnce(&mut Item) -> Result<Apply<T>, CommandError>,
    ) -> Result<T, CommandError> {
        match self.get_item(Some(item_type), key)? {
            Some(item) => self.apply(key, item, f),
            None => Err(CommandError::NotFound),
        }
    }

    /// Read-modify-write that returns `default` unchanged (and writes
    /// nothing) when the key is absent.
    pub(crate) fn update_or<T>(
        &mut self,
        key: &[u8],
        item_type: ItemType,
        default: T,
        f: impl FnOnce(&mut Item) -> Result<Apply<T>, CommandError>,
    ) -> Result<T, CommandError> {
        match self.get_item(Some(item_type), key)? {
            Some(item) => self.apply(key, item, f),
            None => Ok(default),
        }
    }

    /// Read-modify-write that constructs a fresh record from
    /// `default_value` when the key is absent, then applies the closure.
    pub(crate) fn upsert<T>(
        &mut self,
        key: &[u8],
        item_type: ItemType,
        encoding: ItemEncoding,
        default_value: Value,
        f: impl FnOnce(&mut Item) -> Result<Apply<T>, CommandError>,
    ) -> Result<T, CommandError> {
        let item = match self.get_item(Some(item_type), key)? {
            Some(item) => item,
            None => Item::new(
                Bytes::copy_from_slice(key),
                item_type,
                encoding,
                default_value,
            ),
        };
        self.apply(key, item, f)
    }

    fn apply<T>(
        &mut self,
        key: &[u8],
        mut item: Item,
        f: impl FnOnce(&mut Item) -> Result<Apply<T>, CommandError>,
    ) -> Result<T, CommandError> {
        match f(&mut item)? {
            Apply::Write(reply) => {
                self.put_item(&item)?;
                Ok(reply)
            }
            Apply::Delete(reply) => {
                self.store.delete(key)?;
                Ok(reply)
            }
            Apply::Keep(reply) => Ok(reply),
        }
    }

    /// Records an access to `key` for idle-time queries.
    pub fn stamp(&mut self, key: &[u8]) {
        let offset = time::now_secs().saturating_sub(self.start_secs);
        self.accesses.insert(Bytes::copy_from_slice(key), offset);
    }

    /// Seconds since the key was last stamped; 0 if it never was.
    pub fn idle_time(&self, key: &[u8]) -> u64 {
        match self.accesses.get(key) {
            Some(offset) => time::now_secs()
                .saturating_sub(self.start_secs)
                .saturating_sub(*offset),
            None => 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn accesses_len(&self) -> usize {
        self.accesses.len()
    }
}

/// Formats a float score the way clients expect: integral values print
/// without a decimal point, everything else round-trips through Display.
pub(crate) fn format_float(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e17 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
