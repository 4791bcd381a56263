//! List command semantics.
//!
//! Lists are `VecDeque<Bytes>`; pops that empty a list delete the key.
//! The non-blocking pops here are also the retry primitive the blocking
//! registry re-executes on wake-up.

use std::collections::VecDeque;

use bytes::Bytes;

use edis_store::{OrderedStore, WriteBatch};

use crate::error::CommandError;
use crate::item::{Item, ItemEncoding, ItemType, Value};
use crate::types::normalize_range;

use super::{Apply, Keyspace};

impl<S: OrderedStore> Keyspace<S> {
    /// LPUSH: prepends values one at a time, so `LPUSH k v1 v2` leaves the
    /// head order `v2, v1, …old…`. Returns the new length.
    pub fn lpush(&mut self, key: &[u8], values: Vec<Bytes>) -> Result<usize, CommandError> {
        self.list_push(key, values, true)
    }

    /// RPUSH: appends values in argument order. Returns the new length.
    pub fn rpush(&mut self, key: &[u8], values: Vec<Bytes>) -> Result<usize, CommandError> {
        self.list_push(key, values, false)
    }

    /// LPUSHX: like LPUSH but a no-op returning 0 when the key is absent.
    pub fn lpush_x(&mut self, key: &[u8], values: Vec<Bytes>) -> Result<usize, CommandError> {
        self.list_push_existing(key, values, true)
    }

    /// RPUSHX: like RPUSH but a no-op returning 0 when the key is absent.
    pub fn rpush_x(&mut self, key: &[u8], values: Vec<Bytes>) -> Result<usize, CommandError> {
        self.list_push_existing(key, values, false)
    }

    fn list_push(
        &mut self,
        key: &[u8],
        values: Vec<Bytes>,
        left: bool,
    ) -> Result<usize, CommandError> {
        self.upsert(
            key,
            ItemType::List,
            ItemEncoding::Linkedlist,
            Value::List(VecDeque::new()),
            |item| Ok(Apply::Write(push_values(item, values, left))),
        )
    }

    fn list_push_existing(
        &mut self,
        key: &[u8],
        values: Vec<Bytes>,
        left: bool,
    ) -> Result<usize, CommandError> {
        self.update_or(key, ItemType::List, 0, |item| {
            Ok(Apply::Write(push_values(item, values, left)))
        })
    }

    /// LPOP: pops the head; deletes the key when the list empties.
    pub fn lpop(&mut self, key: &[u8]) -> Result<Option<Bytes>, CommandError> {
        self.list_pop(key, true)
    }

    /// RPOP: pops the tail; deletes the key when the list empties.
    pub fn rpop(&mut self, key: &[u8]) -> Result<Option<Bytes>, CommandError> {
        self.list_pop(key, false)
    }

    fn list_pop(&mut self, key: &[u8], left: bool) -> Result<Option<Bytes>, CommandError> {
        self.update_or(key, ItemType::List, None, |item| {
            let Value::List(list) = &mut item.value else {
                unreachable!("type gated");
            };
            let popped = if left {
                list.pop_front()
            } else {
                list.pop_back()
            };
            if list.is_empty() {
                Ok(Apply::Delete(popped))
            } else {
                Ok(Apply::Write(popped))
            }
        })
    }

    /// LLEN: list length; 0 when absent.
    pub fn llen(&self, key: &[u8]) -> Result<usize, CommandError> {
        match self.get_item(Some(ItemType::List), key)? {
            Some(item) => {
                let Value::List(list) = &item.value else {
                    unreachable!("type gated");
                };
                Ok(list.len())
            }
            None => Ok(0),
        }
    }

    /// LINDEX: the element at `index` (negative counts from the end), or
    /// `None` when absent or out of range.
    pub fn lindex(&self, key: &[u8], index: i64) -> Result<Option<Bytes>, CommandError> {
        let Some(item) = self.get_item(Some(ItemType::List), key)? else {
            return Ok(None);
        };
        let Value::List(list) = &item.value else {
            unreachable!("type gated");
        };
        Ok(resolve_index(index, list.len()).and_then(|i| list.get(i).cloned()))
    }

    /// LINSERT: inserts `value` before/after the first `pivot`. Returns the
    /// new length, −1 when the pivot is missing, 0 when the key is absent.
    pub fn linsert(
        &mut self,
        key: &[u8],
        before: bool,
        pivot: Bytes,
        value: Bytes,
    ) -> Result<i64, CommandError> {
        self.update_or(key, ItemType::List, 0, |item| {
            let Value::List(list) = &mut item.value else {
                unreachable!("type gated");
            };
            match list.iter().position(|v| *v == pivot) {
                Some(at) => {
                    let at = if before { at } else { at + 1 };
                    list.insert(at, value);
                    Ok(Apply::Write(list.len() as i64))
                }
                None => Ok(Apply::Keep(-1)),
            }
        })
    }

    /// LRANGE: inclusive slice with the shared normalization rules.
    pub fn lrange(&self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Bytes>, CommandError> {
        let Some(item) = self.get_item(Some(ItemType::List), key)? else {
            return Ok(Vec::new());
        };
        let Value::List(list) = &item.value else {
            unreachable!("type gated");
        };
        match normalize_range(start, stop, list.len()) {
            Some((s, e)) => Ok(list.iter().skip(s).take(e - s + 1).cloned().collect()),
            None => Ok(Vec::new()),
        }
    }

    /// LTRIM: keeps only the normalized range; an empty result deletes the
    /// key. Trimming a missing key is a successful no-op.
    pub fn ltrim(&mut self, key: &[u8], start: i64, stop: i64) -> Result<(), CommandError> {
        self.update_or(key, ItemType::List, (), |item| {
            let Value::List(list) = &mut item.value else {
                unreachable!("type gated");
            };
            match normalize_range(start, stop, list.len()) {
                Some((s, e)) => {
                    let kept: VecDeque<Bytes> =
                        list.iter().skip(s).take(e - s + 1).cloned().collect();
                    *list = kept;
                    if list.is_empty() {
                        Ok(Apply::Delete(()))
                    } else {
                        Ok(Apply::Write(()))
                    }
                }
                None => Ok(Apply::Delete(())),
            }
        })
    }

    /// LREM: removes occurrences of `value` — the first `count` when
    /// positive, the last `|count|` when negative, all when zero. Returns
    /// the number removed; deletes the key when the list empties.
    pub fn lrem(&mut self, key: &[u8], count: i64, value: Bytes) -> Result<usize, CommandError> {
        self.update_or(key, ItemType::List, 0, |item| {
            let Value::List(list) = &mut item.value else {
                unreachable!("type gated");
            };

            let limit = match count {
                0 => usize::MAX,
                n => n.unsigned_abs() as usize,
            };
            let mut removed = 0;
            let mut kept = VecDeque::with_capacity(list.len());

            if count >= 0 {
                for v in list.drain(..) {
                    if removed < limit && v == value {
                        removed += 1;
                    } else {
                        kept.push_back(v);
                    }
                }
            } else {
                for v in list.drain(..).rev() {
                    if removed < limit && v == value {
                        removed += 1;
                    } else {
                        kept.push_front(v);
                    }
                }
            }
            *list = kept;

            if removed == 0 {
                Ok(Apply::Keep(0))
            } else if list.is_empty() {
                Ok(Apply::Delete(removed))
            } else {
                Ok(Apply::Write(removed))
            }
        })
    }

    /// LSET: replaces the element at `index`. Missing keys report
    /// `NoSuchKey`, bad indices `OutOfRange`.
    pub fn lset(&mut self, key: &[u8], index: i64, value: Bytes) -> Result<(), CommandError> {
        self.update(key, ItemType::List, |item| {
            let Value::List(list) = &mut item.value else {
                unreachable!("type gated");
            };
            let at = resolve_index(index, list.len()).ok_or(CommandError::OutOfRange)?;
            list[at] = value;
            Ok(Apply::Write(()))
        })
        .map_err(|err| match err {
            CommandError::NotFound => CommandError::NoSuchKey,
            other => other,
        })
    }

    /// RPOPLPUSH: atomically moves the tail of `src` to the head of `dst`.
    /// When `src == dst` the list rotates in place. An absent or empty
    /// source raises the internal `NotFound` signal — plain RPOPLPUSH
    /// translates it to an empty reply, BRPOPLPUSH to a park.
    pub fn rpoplpush(&mut self, src: &[u8], dst: &[u8]) -> Result<Bytes, CommandError> {
        if src == dst {
            return self.update(src, ItemType::List, |item| {
                let Value::List(list) = &mut item.value else {
                    unreachable!("type gated");
                };
                match list.pop_back() {
                    Some(value) => {
                        list.push_front(value.clone());
                        Ok(Apply::Write(value))
                    }
                    None => Err(CommandError::NotFound),
                }
            });
        }

        let Some(mut src_item) = self.get_item(Some(ItemType::List), src)? else {
            return Err(CommandError::NotFound);
        };
        let Value::List(src_list) = &mut src_item.value else {
            unreachable!("type gated");
        };
        let Some(value) = src_list.pop_back() else {
            return Err(CommandError::NotFound);
        };

        let mut dst_item = match self.get_item(Some(ItemType::List), dst)? {
            Some(item) => item,
            None => Item::new(
                Bytes::copy_from_slice(dst),
                ItemType::List,
                ItemEncoding::Linkedlist,
                Value::List(VecDeque::new()),
            ),
        };
        let Value::List(dst_list) = &mut dst_item.value else {
            unreachable!("type gated");
        };
        dst_list.push_front(value.clone());

        // one atomic batch so a crash never loses or duplicates the element
        let mut batch = WriteBatch::new();
        if src_item.value.is_empty_container() {
            batch.delete(src.to_vec());
        } else {
            batch.put(src.to_vec(), src_item.encode()?);
        }
        batch.put(dst.to_vec(), dst_item.encode()?);
        self.store().write(batch)?;

        Ok(value)
    }
}

fn push_values(item: &mut Item, values: Vec<Bytes>, left: bool) -> usize {
    let Value::List(list) = &mut item.value else {
        unreachable!("type gated");
    };
    for value in values {
        if left {
            list.push_front(value);
        } else {
            list.push_back(value);
        }
    }
    list.len()
}

/// Resolves a possibly-negative index against `len`; `None` out of range.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let at = if index < 0 { len + index } else { index };
    if (0..len).contains(&at) {
        Some(at as usize)
    } else {
        None
    }
}
