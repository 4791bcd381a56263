//! The persisted keyspace record and its codec.
//!
//! Every user key maps to one [`Item`] blob in the ordered store. The blob
//! is a self-describing bincode encoding of the tagged value union plus
//! type, encoding, and expiry metadata; it must round-trip losslessly
//! through `put`/`get`.

use std::collections::{BTreeSet, HashMap, VecDeque};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CommandError;
use crate::time;
use crate::types::sorted_set::SortedSet;

/// The five value families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemType {
    String,
    Hash,
    List,
    Set,
    ZSet,
}

impl ItemType {
    /// The TYPE command's name for this family.
    pub fn name(self) -> &'static str {
        match self {
            ItemType::String => "string",
            ItemType::Hash => "hash",
            ItemType::List => "list",
            ItemType::Set => "set",
            ItemType::ZSet => "zset",
        }
    }
}

/// Advisory representation metadata.
///
/// The engine writes one canonical encoding per type; the other variants
/// can arrive via migration from other implementations and are preserved
/// unchanged on read-modify-write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemEncoding {
    Raw,
    Int,
    Ziplist,
    Linkedlist,
    Intset,
    Hashtable,
    Zipmap,
    Skiplist,
}

impl ItemEncoding {
    pub fn name(self) -> &'static str {
        match self {
            ItemEncoding::Raw => "raw",
            ItemEncoding::Int => "int",
            ItemEncoding::Ziplist => "ziplist",
            ItemEncoding::Linkedlist => "linkedlist",
            ItemEncoding::Intset => "intset",
            ItemEncoding::Hashtable => "hashtable",
            ItemEncoding::Zipmap => "zipmap",
            ItemEncoding::Skiplist => "skiplist",
        }
    }
}

/// The tagged value union. Every variant matches its declared [`ItemType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Str(Bytes),
    Hash(HashMap<Bytes, Bytes>),
    /// Ordered sequence, duplicates allowed. `VecDeque` gives O(1) pushes
    /// and pops at both ends.
    List(VecDeque<Bytes>),
    /// Ordered by member bytes so iteration (and SPOP) is deterministic.
    Set(BTreeSet<Bytes>),
    ZSet(SortedSet),
}

impl Value {
    pub fn type_of(&self) -> ItemType {
        match self {
            Value::Str(_) => ItemType::String,
            Value::Hash(_) => ItemType::Hash,
            Value::List(_) => ItemType::List,
            Value::Set(_) => ItemType::Set,
            Value::ZSet(_) => ItemType::ZSet,
        }
    }

    /// Whether an aggregate value has no elements left. Strings are never
    /// "empty" in the container sense.
    pub fn is_empty_container(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::Hash(map) => map.is_empty(),
            Value::List(list) => list.is_empty(),
            Value::Set(set) => set.is_empty(),
            Value::ZSet(zset) => zset.is_empty(),
        }
    }
}

/// A keyspace record as stored under the user key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub key: Bytes,
    pub item_type: ItemType,
    pub encoding: ItemEncoding,
    /// Absolute expiry in epoch milliseconds; [`time::NO_EXPIRY`] = never.
    pub expire_at_ms: u64,
    pub value: Value,
}

impl Item {
    /// Builds a fresh record with no expiry.
    pub fn new(key: Bytes, item_type: ItemType, encoding: ItemEncoding, value: Value) -> Self {
        Self {
            key,
            item_type,
            encoding,
            expire_at_ms: time::NO_EXPIRY,
            value,
        }
    }

    pub fn is_expired(&self) -> bool {
        time::is_expired(self.expire_at_ms)
    }

    /// Serializes the record for storage.
    pub fn encode(&self) -> Result<Vec<u8>, CommandError> {
        bincode::serialize(self)
            .map_err(|e| CommandError::Storage(edis_store::StoreError::Engine(e.to_string())))
    }

    /// Decodes a stored record. An unrecognized or truncated blob reports
    /// `WrongType`; the caller must leave the record in place.
    pub fn decode(bytes: &[u8]) -> Result<Self, CommandError> {
        bincode::deserialize(bytes).map_err(|_| CommandError::WrongType)
    }
}
