//! String command semantics.

use bytes::{Bytes, BytesMut};

use edis_store::{OrderedStore, WriteBatch};

use crate::error::CommandError;
use crate::item::{Item, ItemEncoding, ItemType, Value};
use crate::types::normalize_range;

use super::{Apply, Keyspace};

/// Largest addressable bit offset (512MB values, as in the reference).
const MAX_BIT_OFFSET: u64 = 4 * 1024 * 1024 * 1024 * 8 - 1;

impl<S: OrderedStore> Keyspace<S> {
    /// GET: the string value, or `None` when absent/expired.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>, CommandError> {
        Ok(self
            .get_item(Some(ItemType::String), key)?
            .map(|item| match item.value {
                Value::Str(data) => data,
                _ => unreachable!("type gated"),
            }))
    }

    /// SET / SETEX: stores a string, replacing any previous value and
    /// expiry regardless of the old type.
    pub fn set(
        &mut self,
        key: &[u8],
        value: Bytes,
        expire_at_ms: Option<u64>,
    ) -> Result<(), CommandError> {
        let mut item = Item::new(
            Bytes::copy_from_slice(key),
            ItemType::String,
            ItemEncoding::Raw,
            Value::Str(value),
        );
        if let Some(at) = expire_at_ms {
            item.expire_at_ms = at;
        }
        self.put_item(&item)
    }

    /// SETNX: stores only when the key is absent. Returns whether it wrote.
    pub fn set_nx(&mut self, key: &[u8], value: Bytes) -> Result<bool, CommandError> {
        if self.get_item(None, key)?.is_some() {
            return Ok(false);
        }
        self.set(key, value, None)?;
        Ok(true)
    }

    /// MSET: stores every pair in one atomic batch.
    pub fn mset(&mut self, pairs: Vec<(Bytes, Bytes)>) -> Result<(), CommandError> {
        let mut batch = WriteBatch::new();
        for (key, value) in pairs {
            let item = Item::new(key.clone(), ItemType::String, ItemEncoding::Raw, Value::Str(value));
            batch.put(key.to_vec(), item.encode()?);
        }
        self.store().write(batch)?;
        Ok(())
    }

    /// MSETNX: all-or-nothing — if *any* target exists, nothing is written.
    pub fn mset_nx(&mut self, pairs: Vec<(Bytes, Bytes)>) -> Result<bool, CommandError> {
        for (key, _) in &pairs {
            if self.get_item(None, key)?.is_some() {
                return Ok(false);
            }
        }
        self.mset(pairs)?;
        Ok(true)
    }

    /// GETSET: swaps in a new value, returning the previous one. The new
    /// value starts with no expiry.
    pub fn get_set(&mut self, key: &[u8], value: Bytes) -> Result<Option<Bytes>, CommandError> {
        let previous = self.get(key)?;
        self.set(key, value, None)?;
        Ok(previous)
    }

    /// APPEND: concatenates onto the existing value (missing keys append
    /// onto the empty string) and returns the running length.
    pub fn append(&mut self, key: &[u8], chunk: Bytes) -> Result<usize, CommandError> {
        self.upsert(
            key,
            ItemType::String,
            ItemEncoding::Raw,
            Value::Str(Bytes::new()),
            |item| {
                let Value::Str(data) = &mut item.value else {
                    unreachable!("type gated");
                };
                let mut combined = BytesMut::with_capacity(data.len() + chunk.len());
                combined.extend_from_slice(data);
                combined.extend_from_slice(&chunk);
                *data = combined.freeze();
                Ok(Apply::Write(data.len()))
            },
        )
    }

    /// GETRANGE: an inclusive substring with negative-index normalization.
    pub fn get_range(&self, key: &[u8], start: i64, stop: i64) -> Result<Bytes, CommandError> {
        let Some(data) = self.get(key)? else {
            return Ok(Bytes::new());
        };
        match normalize_range(start, stop, data.len()) {
            Some((s, e)) => Ok(data.slice(s..=e)),
            None => Ok(Bytes::new()),
        }
    }

    /// STRLEN: value length in bytes, 0 when absent.
    pub fn str_len(&self, key: &[u8]) -> Result<usize, CommandError> {
        Ok(self.get(key)?.map(|data| data.len()).unwrap_or(0))
    }

    /// INCR / INCRBY / DECR / DECRBY: signed integer arithmetic over the
    /// string value. Missing keys start from 0; unparseable values and
    /// overflow report `NotInteger`. The expiry is preserved.
    pub fn incr_by(&mut self, key: &[u8], delta: i64) -> Result<i64, CommandError> {
        self.upsert(
            key,
            ItemType::String,
            ItemEncoding::Raw,
            Value::Str(Bytes::from_static(b"0")),
            |item| {
                let Value::Str(data) = &mut item.value else {
                    unreachable!("type gated");
                };
                let text = std::str::from_utf8(data).map_err(|_| CommandError::NotInteger)?;
                let current: i64 = text.parse().map_err(|_| CommandError::NotInteger)?;
                let next = current.checked_add(delta).ok_or(CommandError::NotInteger)?;
                *data = Bytes::from(next.to_string());
                Ok(Apply::Write(next))
            },
        )
    }

    /// SETRANGE: overwrites `chunk` at `offset`, zero-padding any gap.
    /// Returns the resulting length.
    pub fn set_range(
        &mut self,
        key: &[u8],
        offset: usize,
        chunk: Bytes,
    ) -> Result<usize, CommandError> {
        if chunk.is_empty() {
            return self.str_len(key);
        }
        self.upsert(
            key,
            ItemType::String,
            ItemEncoding::Raw,
            Value::Str(Bytes::new()),
            |item| {
                let Value::Str(data) = &mut item.value else {
                    unreachable!("type gated");
                };
                let end = offset + chunk.len();
                let mut grown = BytesMut::with_capacity(end.max(data.len()));
                grown.extend_from_slice(data);
                if grown.len() < end {
                    grown.resize(end, 0);
                }
                grown[offset..end].copy_from_slice(&chunk);
                *data = grown.freeze();
                Ok(Apply::Write(data.len()))
            },
        )
    }

    /// SETBIT: sets the bit at `offset` and returns its previous value.
    /// Bits before and after the offset are unchanged; growing the value
    /// zero-pads.
    pub fn set_bit(&mut self, key: &[u8], offset: u64, bit: bool) -> Result<bool, CommandError> {
        if offset > MAX_BIT_OFFSET {
            return Err(CommandError::OutOfRange);
        }
        let byte_index = (offset / 8) as usize;
        let mask = 0x80u8 >> (offset % 8);

        self.upsert(
            key,
            ItemType::String,
            ItemEncoding::Raw,
            Value::Str(Bytes::new()),
            |item| {
                let Value::Str(data) = &mut item.value else {
                    unreachable!("type gated");
                };
                let mut grown = BytesMut::from(&data[..]);
                if grown.len() <= byte_index {
                    grown.resize(byte_index + 1, 0);
                }
                let old = grown[byte_index] & mask != 0;
                if bit {
                    grown[byte_index] |= mask;
                } else {
                    grown[byte_index] &= !mask;
                }
                *data = grown.freeze();
                Ok(Apply::Write(old))
            },
        )
    }

    /// GETBIT: the bit at `offset`; offsets past the end read as 0.
    pub fn get_bit(&self, key: &[u8], offset: u64) -> Result<bool, CommandError> {
        if offset > MAX_BIT_OFFSET {
            return Err(CommandError::OutOfRange);
        }
        let Some(data) = self.get(key)? else {
            return Ok(false);
        };
        let byte_index = (offset / 8) as usize;
        if byte_index >= data.len() {
            return Ok(false);
        }
        let mask = 0x80u8 >> (offset % 8);
        Ok(data[byte_index] & mask != 0)
    }

    /// MGET: one optional value per key; wrong-typed keys read as absent.
    pub fn mget(&self, keys: &[Bytes]) -> Result<Vec<Option<Bytes>>, CommandError> {
        keys.iter()
            .map(|key| match self.get(key) {
                Ok(value) => Ok(value),
                Err(CommandError::WrongType) => Ok(None),
                Err(err) => Err(err),
            })
            .collect()
    }
}
