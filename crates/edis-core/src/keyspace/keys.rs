//! Key commands: lifecycle, expiry, renames, scans, and the bounded
//! random-key sampler.

use std::ops::ControlFlow;

use bytes::Bytes;
use rand::Rng;

use edis_store::{OrderedStore, WriteBatch};

use crate::error::CommandError;
use crate::item::Item;
use crate::time;

use super::Keyspace;

/// RANDOMKEY samples an ordinal in `[1, RANDOM_KEY_SPAN]` over the store's
/// natural key order.
const RANDOM_KEY_SPAN: u32 = 500;

impl<S: OrderedStore> Keyspace<S> {
    /// DEL over one key. Returns whether a live key was removed.
    pub fn del_one(&mut self, key: &[u8]) -> Result<bool, CommandError> {
        if self.get_item(None, key)?.is_none() {
            return Ok(false);
        }
        self.store().delete(key)?;
        Ok(true)
    }

    /// DEL: number of live keys actually removed.
    pub fn del(&mut self, keys: &[Bytes]) -> Result<usize, CommandError> {
        let mut removed = 0;
        for key in keys {
            if self.del_one(key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// EXISTS: live-key existence (expired keys read as absent).
    pub fn exists(&self, key: &[u8]) -> Result<bool, CommandError> {
        Ok(self.get_item(None, key)?.is_some())
    }

    /// EXPIRE / EXPIREAT: sets an absolute expiry. An instant at or before
    /// now deletes the key immediately. Returns whether a key was affected.
    pub fn expire_at(&mut self, key: &[u8], at_ms: u64) -> Result<bool, CommandError> {
        let Some(mut item) = self.get_item(None, key)? else {
            return Ok(false);
        };
        if at_ms <= time::now_ms() {
            self.store().delete(key)?;
            return Ok(true);
        }
        item.expire_at_ms = at_ms;
        self.put_item(&item)?;
        Ok(true)
    }

    /// PERSIST: clears the expiry. Returns whether a timeout was removed.
    pub fn persist(&mut self, key: &[u8]) -> Result<bool, CommandError> {
        let Some(mut item) = self.get_item(None, key)? else {
            return Ok(false);
        };
        if item.expire_at_ms == time::NO_EXPIRY {
            return Ok(false);
        }
        item.expire_at_ms = time::NO_EXPIRY;
        self.put_item(&item)?;
        Ok(true)
    }

    /// TTL: remaining whole seconds, or −1 for absent and never-expiring
    /// keys alike.
    pub fn ttl(&self, key: &[u8]) -> Result<i64, CommandError> {
        match self.get_item(None, key)? {
            Some(item) => match time::remaining_secs(item.expire_at_ms) {
                Some(secs) => Ok(secs.min(i64::MAX as u64) as i64),
                None => Ok(-1),
            },
            None => Ok(-1),
        }
    }

    /// TYPE: the stored family's name, or `"none"`.
    pub fn value_type(&self, key: &[u8]) -> Result<&'static str, CommandError> {
        Ok(self
            .get_item(None, key)?
            .map(|item| item.item_type.name())
            .unwrap_or("none"))
    }

    /// OBJECT ENCODING: the advertised encoding, or `None` when absent.
    pub fn object_encoding(&self, key: &[u8]) -> Result<Option<&'static str>, CommandError> {
        Ok(self.get_item(None, key)?.map(|item| item.encoding.name()))
    }

    /// KEYS: every live key matching the pattern. Full-shard scan; the
    /// pattern is a regex applied unanchored to the key bytes.
    pub fn keys(&self, pattern: &[u8]) -> Result<Vec<Bytes>, CommandError> {
        let pattern = std::str::from_utf8(pattern).map_err(|_| CommandError::BadPattern)?;
        let matcher = regex::bytes::Regex::new(pattern).map_err(|_| CommandError::BadPattern)?;

        self.store().fold(Vec::new(), |mut acc, key, blob| {
            let live = match Item::decode(blob) {
                Ok(item) => !item.is_expired(),
                // a corrupt record still occupies its slot
                Err(_) => true,
            };
            if live && matcher.is_match(key) {
                acc.push(Bytes::copy_from_slice(key));
            }
            ControlFlow::Continue(acc)
        })
        .map_err(CommandError::from)
    }

    /// RANDOMKEY: a bounded sampler, not a uniform one. Draws an ordinal in
    /// `[1, 500]`, walks live keys in store order, and returns the key at
    /// that ordinal — wrapping by remainder when fewer live keys exist.
    pub fn random_key(&self) -> Result<Option<Bytes>, CommandError> {
        let offset = rand::rng().random_range(1..=RANDOM_KEY_SPAN) as usize;

        let walk = self.store().fold(
            Vec::with_capacity(offset.min(64)),
            |mut seen: Vec<Bytes>, key, blob| {
                let live = match Item::decode(blob) {
                    Ok(item) => !item.is_expired(),
                    Err(_) => true,
                };
                if live {
                    seen.push(Bytes::copy_from_slice(key));
                    if seen.len() == offset {
                        return ControlFlow::Break(seen);
                    }
                }
                ControlFlow::Continue(seen)
            },
        )?;

        if walk.is_empty() {
            return Ok(None);
        }
        let at = (offset - 1) % walk.len();
        Ok(walk.into_iter().nth(at))
    }

    /// RENAME: an atomic two-op write that preserves type, encoding,
    /// expiry, and value. A missing source reports `NoSuchKey`.
    pub fn rename(&mut self, key: &[u8], newkey: &[u8]) -> Result<(), CommandError> {
        let Some(mut item) = self.get_item(None, key)? else {
            return Err(CommandError::NoSuchKey);
        };
        if key == newkey {
            return Ok(());
        }
        item.key = Bytes::copy_from_slice(newkey);

        let mut batch = WriteBatch::new();
        batch.delete(key.to_vec());
        batch.put(newkey.to_vec(), item.encode()?);
        self.store().write(batch)?;
        Ok(())
    }

    /// RENAMENX: renames only when the destination is absent.
    pub fn rename_nx(&mut self, key: &[u8], newkey: &[u8]) -> Result<bool, CommandError> {
        if self.get_item(None, newkey)?.is_some() {
            // the source must still exist for the error precedence to match
            if self.get_item(None, key)?.is_none() {
                return Err(CommandError::NoSuchKey);
            }
            return Ok(false);
        }
        self.rename(key, newkey)?;
        Ok(true)
    }

    /// Reads a record for MOVE, leaving it in place.
    pub(crate) fn take_item(&self, key: &[u8]) -> Result<Option<Item>, CommandError> {
        self.get_item(None, key)
    }

    /// MOVE's internal receive: stores an incoming record, or raises the
    /// internal `Found` signal when the destination slot is occupied
    /// (expiry is deliberately ignored — the question is occupancy).
    pub(crate) fn receive_item(&mut self, item: Item) -> Result<(), CommandError> {
        if self.exists_item(&item.key)? {
            return Err(CommandError::Found);
        }
        self.put_item(&item)
    }
}
