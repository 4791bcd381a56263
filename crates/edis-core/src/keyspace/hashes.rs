//! Hash command semantics. Canonical encoding is `hashtable`; field
//! iteration order is whatever the map yields, stable within one call.

use std::collections::HashMap;

use bytes::Bytes;

use edis_store::OrderedStore;

use crate::error::CommandError;
use crate::item::{ItemEncoding, ItemType, Value};

use super::{Apply, Keyspace};

impl<S: OrderedStore> Keyspace<S> {
    /// HSET / HMSET: stores every pair, returning how many fields were
    /// newly added (existing fields are overwritten in place).
    pub fn hset(&mut self, key: &[u8], pairs: Vec<(Bytes, Bytes)>) -> Result<usize, CommandError> {
        self.upsert(
            key,
            ItemType::Hash,
            ItemEncoding::Hashtable,
            Value::Hash(HashMap::new()),
            |item| {
                let Value::Hash(map) = &mut item.value else {
                    unreachable!("type gated");
                };
                let mut added = 0;
                for (field, value) in pairs {
                    if map.insert(field, value).is_none() {
                        added += 1;
                    }
                }
                Ok(Apply::Write(added))
            },
        )
    }

    /// HSETNX: stores the field only when it is absent.
    pub fn hset_nx(
        &mut self,
        key: &[u8],
        field: Bytes,
        value: Bytes,
    ) -> Result<bool, CommandError> {
        self.upsert(
            key,
            ItemType::Hash,
            ItemEncoding::Hashtable,
            Value::Hash(HashMap::new()),
            |item| {
                let Value::Hash(map) = &mut item.value else {
                    unreachable!("type gated");
                };
                if map.contains_key(&field) {
                    Ok(Apply::Keep(false))
                } else {
                    map.insert(field, value);
                    Ok(Apply::Write(true))
                }
            },
        )
    }

    /// HGET: one field's value.
    pub fn hget(&self, key: &[u8], field: &[u8]) -> Result<Option<Bytes>, CommandError> {
        Ok(self.with_hash(key)?.and_then(|map| map.get(field).cloned()))
    }

    /// HMGET: one optional value per requested field.
    pub fn hmget(&self, key: &[u8], fields: &[Bytes]) -> Result<Vec<Option<Bytes>>, CommandError> {
        let map = self.with_hash(key)?;
        Ok(fields
            .iter()
            .map(|field| map.as_ref().and_then(|m| m.get(field).cloned()))
            .collect())
    }

    /// HGETALL: every (field, value) pair.
    pub fn hget_all(&self, key: &[u8]) -> Result<Vec<(Bytes, Bytes)>, CommandError> {
        Ok(self
            .with_hash(key)?
            .map(|map| map.into_iter().collect())
            .unwrap_or_default())
    }

    /// HKEYS.
    pub fn hkeys(&self, key: &[u8]) -> Result<Vec<Bytes>, CommandError> {
        Ok(self
            .with_hash(key)?
            .map(|map| map.into_keys().collect())
            .unwrap_or_default())
    }

    /// HVALS.
    pub fn hvals(&self, key: &[u8]) -> Result<Vec<Bytes>, CommandError> {
        Ok(self
            .with_hash(key)?
            .map(|map| map.into_values().collect())
            .unwrap_or_default())
    }

    /// HLEN: number of fields, 0 when absent.
    pub fn hlen(&self, key: &[u8]) -> Result<usize, CommandError> {
        Ok(self.with_hash(key)?.map(|map| map.len()).unwrap_or(0))
    }

    /// HEXISTS.
    pub fn hexists(&self, key: &[u8], field: &[u8]) -> Result<bool, CommandError> {
        Ok(self
            .with_hash(key)?
            .map(|map| map.contains_key(field))
            .unwrap_or(false))
    }

    /// HDEL: removes fields, returning how many existed. Emptying the hash
    /// deletes the key.
    pub fn hdel(&mut self, key: &[u8], fields: &[Bytes]) -> Result<usize, CommandError> {
        self.update_or(key, ItemType::Hash, 0, |item| {
            let Value::Hash(map) = &mut item.value else {
                unreachable!("type gated");
            };
            let mut removed = 0;
            for field in fields {
                if map.remove(field).is_some() {
                    removed += 1;
                }
            }
            if removed == 0 {
                Ok(Apply::Keep(0))
            } else if map.is_empty() {
                Ok(Apply::Delete(removed))
            } else {
                Ok(Apply::Write(removed))
            }
        })
    }

    /// HINCRBY: integer arithmetic over one field; a missing field starts
    /// from the increment itself.
    pub fn hincr_by(&mut self, key: &[u8], field: Bytes, delta: i64) -> Result<i64, CommandError> {
        self.upsert(
            key,
            ItemType::Hash,
            ItemEncoding::Hashtable,
            Value::Hash(HashMap::new()),
            |item| {
                let Value::Hash(map) = &mut item.value else {
                    unreachable!("type gated");
                };
                let next = match map.get(&field) {
                    Some(current) => {
                        let text = std::str::from_utf8(current)
                            .map_err(|_| CommandError::NotInteger)?;
                        let current: i64 =
                            text.parse().map_err(|_| CommandError::NotInteger)?;
                        current.checked_add(delta).ok_or(CommandError::NotInteger)?
                    }
                    None => delta,
                };
                map.insert(field, Bytes::from(next.to_string()));
                Ok(Apply::Write(next))
            },
        )
    }

    fn with_hash(&self, key: &[u8]) -> Result<Option<HashMap<Bytes, Bytes>>, CommandError> {
        Ok(self
            .get_item(Some(ItemType::Hash), key)?
            .map(|item| match item.value {
                Value::Hash(map) => map,
                _ => unreachable!("type gated"),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::keyspace;
    use super::*;

    fn pair(f: &str, v: &str) -> (Bytes, Bytes) {
        (
            Bytes::copy_from_slice(f.as_bytes()),
            Bytes::copy_from_slice(v.as_bytes()),
        )
    }

    #[test]
    fn hset_counts_new_fields_only() {
        let mut ks = keyspace();
        assert_eq!(ks.hset(b"h", vec![pair("a", "1"), pair("b", "2")]).unwrap(), 2);
        assert_eq!(ks.hset(b"h", vec![pair("a", "9"), pair("c", "3")]).unwrap(), 1);
        assert_eq!(ks.hget(b"h", b"a").unwrap(), Some(Bytes::from("9")));
        assert_eq!(ks.hlen(b"h").unwrap(), 3);
    }

    #[test]
    fn hsetnx_only_writes_absent_fields() {
        let mut ks = keyspace();
        assert!(ks.hset_nx(b"h", Bytes::from("f"), Bytes::from("1")).unwrap());
        assert!(!ks.hset_nx(b"h", Bytes::from("f"), Bytes::from("2")).unwrap());
        assert_eq!(ks.hget(b"h", b"f").unwrap(), Some(Bytes::from("1")));
    }

    #[test]
    fn hdel_empties_delete_the_key() {
        let mut ks = keyspace();
        ks.hset(b"h", vec![pair("a", "1"), pair("b", "2")]).unwrap();

        let removed = ks
            .hdel(b"h", &[Bytes::from("a"), Bytes::from("missing")])
            .unwrap();
        assert_eq!(removed, 1);
        assert!(ks.exists(b"h").unwrap());

        assert_eq!(ks.hdel(b"h", &[Bytes::from("b")]).unwrap(), 1);
        assert!(!ks.exists(b"h").unwrap());
    }

    #[test]
    fn hgetall_returns_every_pair() {
        let mut ks = keyspace();
        ks.hset(b"h", vec![pair("a", "1"), pair("b", "2")]).unwrap();

        let mut all = ks.hget_all(b"h").unwrap();
        all.sort();
        assert_eq!(all, vec![pair("a", "1"), pair("b", "2")]);

        assert!(ks.hget_all(b"missing").unwrap().is_empty());
    }

    #[test]
    fn hincrby_creates_missing_field_with_delta() {
        let mut ks = keyspace();
        assert_eq!(ks.hincr_by(b"h", Bytes::from("n"), 5).unwrap(), 5);
        assert_eq!(ks.hincr_by(b"h", Bytes::from("n"), -2).unwrap(), 3);
        assert_eq!(ks.hget(b"h", b"n").unwrap(), Some(Bytes::from("3")));
    }

    #[test]
    fn hincrby_rejects_non_numeric_fields() {
        let mut ks = keyspace();
        ks.hset(b"h", vec![pair("f", "abc")]).unwrap();
        assert!(matches!(
            ks.hincr_by(b"h", Bytes::from("f"), 1),
            Err(CommandError::NotInteger)
        ));
    }

    #[test]
    fn hmget_and_hexists() {
        let mut ks = keyspace();
        ks.hset(b"h", vec![pair("a", "1")]).unwrap();

        assert_eq!(
            ks.hmget(b"h", &[Bytes::from("a"), Bytes::from("b")]).unwrap(),
            vec![Some(Bytes::from("1")), None]
        );
        assert!(ks.hexists(b"h", b"a").unwrap());
        assert!(!ks.hexists(b"h", b"b").unwrap());
        assert!(!ks.hexists(b"missing", b"a").unwrap());
    }

    #[test]
    fn hkeys_hvals() {
        let mut ks = keyspace();
        ks.hset(b"h", vec![pair("a", "1"), pair("b", "2")]).unwrap();

        let mut keys = ks.hkeys(b"h").unwrap();
        keys.sort();
        assert_eq!(keys, vec![Bytes::from("a"), Bytes::from("b")]);

        let mut vals = ks.hvals(b"h").unwrap();
        vals.sort();
        assert_eq!(vals, vec![Bytes::from("1"), Bytes::from("2")]);
    }

    #[test]
    fn hash_commands_type_gate() {
        let mut ks = keyspace();
        ks.set(b"s", Bytes::from("v"), None).unwrap();
        assert!(matches!(ks.hget(b"s", b"f"), Err(CommandError::WrongType)));
        assert!(matches!(
            ks.hset(b"s", vec![pair("f", "v")]),
            Err(CommandError::WrongType)
        ));
    }
}
