//! Set command semantics and the set-algebra operators.
//!
//! Members live in a `BTreeSet`, so iteration is deterministic by value
//! order — SPOP pops the smallest member and documents it.

use std::collections::BTreeSet;

use bytes::Bytes;
use rand::Rng;

use edis_store::{OrderedStore, WriteBatch};

use crate::error::CommandError;
use crate::item::{Item, ItemEncoding, ItemType, Value};

use super::{Apply, Keyspace};

/// Which set-algebra operator a `*STORE` command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Diff,
    Inter,
    Union,
}

impl<S: OrderedStore> Keyspace<S> {
    /// SADD: inserts members, returning how many were new.
    pub fn sadd(&mut self, key: &[u8], members: Vec<Bytes>) -> Result<usize, CommandError> {
        self.upsert(
            key,
            ItemType::Set,
            ItemEncoding::Hashtable,
            Value::Set(BTreeSet::new()),
            |item| {
                let Value::Set(set) = &mut item.value else {
                    unreachable!("type gated");
                };
                let mut added = 0;
                for member in members {
                    if set.insert(member) {
                        added += 1;
                    }
                }
                Ok(Apply::Write(added))
            },
        )
    }

    /// SREM: removes members, returning how many existed. Emptying the set
    /// deletes the key.
    pub fn srem(&mut self, key: &[u8], members: &[Bytes]) -> Result<usize, CommandError> {
        self.update_or(key, ItemType::Set, 0, |item| {
            let Value::Set(set) = &mut item.value else {
                unreachable!("type gated");
            };
            let mut removed = 0;
            for member in members {
                if set.remove(member.as_ref() as &[u8]) {
                    removed += 1;
                }
            }
            if removed == 0 {
                Ok(Apply::Keep(0))
            } else if set.is_empty() {
                Ok(Apply::Delete(removed))
            } else {
                Ok(Apply::Write(removed))
            }
        })
    }

    /// SCARD: cardinality, 0 when absent.
    pub fn scard(&self, key: &[u8]) -> Result<usize, CommandError> {
        Ok(self.read_set(key)?.map(|set| set.len()).unwrap_or(0))
    }

    /// SISMEMBER.
    pub fn sismember(&self, key: &[u8], member: &[u8]) -> Result<bool, CommandError> {
        Ok(self
            .read_set(key)?
            .map(|set| set.contains(member))
            .unwrap_or(false))
    }

    /// SMEMBERS: all members in value order.
    pub fn smembers(&self, key: &[u8]) -> Result<Vec<Bytes>, CommandError> {
        Ok(self
            .read_set(key)?
            .map(|set| set.into_iter().collect())
            .unwrap_or_default())
    }

    /// SPOP: removes and returns the smallest member by value order —
    /// deterministic by design, not random. Emptying deletes the key.
    pub fn spop(&mut self, key: &[u8]) -> Result<Option<Bytes>, CommandError> {
        self.update_or(key, ItemType::Set, None, |item| {
            let Value::Set(set) = &mut item.value else {
                unreachable!("type gated");
            };
            let popped = set.pop_first();
            if set.is_empty() {
                Ok(Apply::Delete(popped))
            } else {
                Ok(Apply::Write(popped))
            }
        })
    }

    /// SRANDMEMBER: a uniformly chosen member, without removal.
    pub fn srandmember(&self, key: &[u8]) -> Result<Option<Bytes>, CommandError> {
        let Some(set) = self.read_set(key)? else {
            return Ok(None);
        };
        if set.is_empty() {
            return Ok(None);
        }
        let at = rand::rng().random_range(0..set.len());
        Ok(set.into_iter().nth(at))
    }

    /// SMOVE: atomically removes `member` from `src` and adds it to `dst`.
    /// Returns `false` (with no writes) when the member is absent.
    pub fn smove(&mut self, src: &[u8], dst: &[u8], member: Bytes) -> Result<bool, CommandError> {
        let Some(mut src_item) = self.get_item(Some(ItemType::Set), src)? else {
            return Ok(false);
        };
        // the destination type gate applies even when nothing moves
        let dst_item = self.get_item(Some(ItemType::Set), dst)?;

        let Value::Set(src_set) = &mut src_item.value else {
            unreachable!("type gated");
        };
        if !src_set.remove(member.as_ref() as &[u8]) {
            return Ok(false);
        }

        if src == dst {
            // removing and re-adding within one key is a no-op
            return Ok(true);
        }

        let mut dst_item = match dst_item {
            Some(item) => item,
            None => Item::new(
                Bytes::copy_from_slice(dst),
                ItemType::Set,
                ItemEncoding::Hashtable,
                Value::Set(BTreeSet::new()),
            ),
        };
        let Value::Set(dst_set) = &mut dst_item.value else {
            unreachable!("type gated");
        };
        dst_set.insert(member);

        let mut batch = WriteBatch::new();
        if src_item.value.is_empty_container() {
            batch.delete(src.to_vec());
        } else {
            batch.put(src.to_vec(), src_item.encode()?);
        }
        batch.put(dst.to_vec(), dst_item.encode()?);
        self.store().write(batch)?;
        Ok(true)
    }

    /// SDIFF / SINTER / SUNION over the given keys, missing keys reading
    /// as empty. SINTER with any missing input is empty.
    pub fn set_op(&self, op: SetOp, keys: &[Bytes]) -> Result<BTreeSet<Bytes>, CommandError> {
        let mut inputs = Vec::with_capacity(keys.len());
        for key in keys {
            inputs.push(self.read_set(key)?.unwrap_or_default());
        }

        let Some((first, rest)) = inputs.split_first() else {
            return Ok(BTreeSet::new());
        };

        let result = match op {
            SetOp::Diff => rest.iter().fold(first.clone(), |acc, other| {
                acc.difference(other).cloned().collect()
            }),
            SetOp::Inter => rest.iter().fold(first.clone(), |acc, other| {
                acc.intersection(other).cloned().collect()
            }),
            SetOp::Union => rest.iter().fold(first.clone(), |acc, other| {
                acc.union(other).cloned().collect()
            }),
        };
        Ok(result)
    }

    /// SDIFFSTORE / SINTERSTORE / SUNIONSTORE: computes the operator and
    /// writes the result under `dst` (deleting `dst` when the result is
    /// empty). Returns the result cardinality.
    pub fn set_op_store(
        &mut self,
        op: SetOp,
        dst: &[u8],
        keys: &[Bytes],
    ) -> Result<usize, CommandError> {
        let result = self.set_op(op, keys)?;
        let len = result.len();

        if result.is_empty() {
            self.store().delete(dst)?;
        } else {
            let item = Item::new(
                Bytes::copy_from_slice(dst),
                ItemType::Set,
                ItemEncoding::Hashtable,
                Value::Set(result),
            );
            self.put_item(&item)?;
        }
        Ok(len)
    }

    fn read_set(&self, key: &[u8]) -> Result<Option<BTreeSet<Bytes>>, CommandError> {
        Ok(self
            .get_item(Some(ItemType::Set), key)?
            .map(|item| match item.value {
                Value::Set(set) => set,
                _ => unreachable!("type gated"),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::keyspace;
    use super::*;

    fn members(items: &[&str]) -> Vec<Bytes> {
        items
            .iter()
            .map(|m| Bytes::copy_from_slice(m.as_bytes()))
            .collect()
    }

    #[test]
    fn sadd_and_cardinality_agree() {
        let mut ks = keyspace();
        assert_eq!(ks.sadd(b"s", members(&["a", "b", "a"])).unwrap(), 2);
        assert_eq!(ks.scard(b"s").unwrap(), 2);

        let listed = ks.smembers(b"s").unwrap();
        assert_eq!(listed, members(&["a", "b"]));
    }

    #[test]
    fn srem_empties_delete_the_key() {
        let mut ks = keyspace();
        ks.sadd(b"s", members(&["a", "b"])).unwrap();
        assert_eq!(ks.srem(b"s", &members(&["a", "zz"])).unwrap(), 1);
        assert_eq!(ks.srem(b"s", &members(&["b"])).unwrap(), 1);
        assert!(!ks.exists(b"s").unwrap());
    }

    #[test]
    fn spop_is_smallest_by_value_order() {
        let mut ks = keyspace();
        ks.sadd(b"s", members(&["c", "a", "b"])).unwrap();
        assert_eq!(ks.spop(b"s").unwrap(), Some(Bytes::from("a")));
        assert_eq!(ks.spop(b"s").unwrap(), Some(Bytes::from("b")));
        assert_eq!(ks.spop(b"s").unwrap(), Some(Bytes::from("c")));
        assert_eq!(ks.spop(b"s").unwrap(), None);
        assert!(!ks.exists(b"s").unwrap());
    }

    #[test]
    fn srandmember_draws_existing_members() {
        let mut ks = keyspace();
        assert_eq!(ks.srandmember(b"s").unwrap(), None);
        ks.sadd(b"s", members(&["a", "b", "c"])).unwrap();
        for _ in 0..20 {
            let drawn = ks.srandmember(b"s").unwrap().unwrap();
            assert!(ks.sismember(b"s", &drawn).unwrap());
        }
        assert_eq!(ks.scard(b"s").unwrap(), 3);
    }

    #[test]
    fn smove_moves_and_reports_absent_members() {
        let mut ks = keyspace();
        ks.sadd(b"src", members(&["a", "b"])).unwrap();

        assert!(ks.smove(b"src", b"dst", Bytes::from("a")).unwrap());
        assert!(!ks.sismember(b"src", b"a").unwrap());
        assert!(ks.sismember(b"dst", b"a").unwrap());

        assert!(!ks.smove(b"src", b"dst", Bytes::from("zz")).unwrap());
        assert!(!ks.smove(b"missing", b"dst", Bytes::from("a")).unwrap());
    }

    #[test]
    fn smove_emptied_source_is_deleted() {
        let mut ks = keyspace();
        ks.sadd(b"src", members(&["only"])).unwrap();
        assert!(ks.smove(b"src", b"dst", Bytes::from("only")).unwrap());
        assert!(!ks.exists(b"src").unwrap());
    }

    #[test]
    fn operators_follow_missing_key_rules() {
        let mut ks = keyspace();
        ks.sadd(b"s1", members(&["a", "b", "c"])).unwrap();
        ks.sadd(b"s2", members(&["b", "c", "d"])).unwrap();

        let diff = ks
            .set_op(SetOp::Diff, &[Bytes::from("s1"), Bytes::from("s2")])
            .unwrap();
        assert_eq!(diff.into_iter().collect::<Vec<_>>(), members(&["a"]));

        let inter = ks
            .set_op(SetOp::Inter, &[Bytes::from("s1"), Bytes::from("s2")])
            .unwrap();
        assert_eq!(inter.into_iter().collect::<Vec<_>>(), members(&["b", "c"]));

        // intersecting with any missing key is empty
        let inter = ks
            .set_op(SetOp::Inter, &[Bytes::from("s1"), Bytes::from("nope")])
            .unwrap();
        assert!(inter.is_empty());

        let union = ks
            .set_op(SetOp::Union, &[Bytes::from("s1"), Bytes::from("nope")])
            .unwrap();
        assert_eq!(union.len(), 3);
    }

    #[test]
    fn interstore_scenario() {
        let mut ks = keyspace();
        ks.sadd(b"s1", members(&["a", "b", "c"])).unwrap();
        ks.sadd(b"s2", members(&["b", "c", "d"])).unwrap();

        let len = ks
            .set_op_store(SetOp::Inter, b"out", &[Bytes::from("s1"), Bytes::from("s2")])
            .unwrap();
        assert_eq!(len, 2);
        assert_eq!(ks.smembers(b"out").unwrap(), members(&["b", "c"]));
    }

    #[test]
    fn diffstore_with_itself_deletes_destination() {
        let mut ks = keyspace();
        ks.sadd(b"a", members(&["x"])).unwrap();
        ks.sadd(b"d", members(&["stale"])).unwrap();

        let len = ks
            .set_op_store(SetOp::Diff, b"d", &[Bytes::from("a"), Bytes::from("a")])
            .unwrap();
        assert_eq!(len, 0);
        assert!(!ks.exists(b"d").unwrap());
    }
}
