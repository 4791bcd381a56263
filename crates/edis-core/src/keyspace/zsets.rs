//! Sorted-set command semantics, including the weighted store operators.

use std::ops::Bound;

use bytes::Bytes;

use edis_store::OrderedStore;

use crate::error::CommandError;
use crate::item::{Item, ItemEncoding, ItemType, Value};
use crate::types::normalize_range;
use crate::types::sorted_set::{self, Aggregate, SortedSet};

use super::{Apply, Keyspace};

impl<S: OrderedStore> Keyspace<S> {
    /// ZADD: insert-or-update of (score, member) pairs. Returns the change
    /// in cardinality (members newly added).
    pub fn zadd(&mut self, key: &[u8], entries: Vec<(f64, Bytes)>) -> Result<usize, CommandError> {
        self.upsert(
            key,
            ItemType::ZSet,
            ItemEncoding::Skiplist,
            Value::ZSet(SortedSet::new()),
            |item| {
                let Value::ZSet(zset) = &mut item.value else {
                    unreachable!("type gated");
                };
                let mut added = 0;
                for (score, member) in entries {
                    if zset.insert(member, score) {
                        added += 1;
                    }
                }
                Ok(Apply::Write(added))
            },
        )
    }

    /// ZCARD.
    pub fn zcard(&self, key: &[u8]) -> Result<usize, CommandError> {
        Ok(self.read_zset(key)?.map(|z| z.len()).unwrap_or(0))
    }

    /// ZSCORE.
    pub fn zscore(&self, key: &[u8], member: &[u8]) -> Result<Option<f64>, CommandError> {
        Ok(self.read_zset(key)?.and_then(|z| z.score(member)))
    }

    /// ZCOUNT: members whose score falls within the bounds.
    pub fn zcount(
        &self,
        key: &[u8],
        min: Bound<f64>,
        max: Bound<f64>,
    ) -> Result<usize, CommandError> {
        Ok(self
            .read_zset(key)?
            .map(|z| z.count_by_score(min, max))
            .unwrap_or(0))
    }

    /// ZINCRBY: adds `delta` to the member's score, starting from 0 when
    /// the member (or the key) is missing. Returns the new score.
    pub fn zincr_by(
        &mut self,
        key: &[u8],
        delta: f64,
        member: Bytes,
    ) -> Result<f64, CommandError> {
        self.upsert(
            key,
            ItemType::ZSet,
            ItemEncoding::Skiplist,
            Value::ZSet(SortedSet::new()),
            |item| {
                let Value::ZSet(zset) = &mut item.value else {
                    unreachable!("type gated");
                };
                let next = zset.score(&member).unwrap_or(0.0) + delta;
                zset.insert(member, next);
                Ok(Apply::Write(next))
            },
        )
    }

    /// ZRANK / ZREVRANK: 0-based rank in forward or reverse ordering.
    pub fn zrank(&self, key: &[u8], member: &[u8], rev: bool) -> Result<Option<usize>, CommandError> {
        Ok(self.read_zset(key)?.and_then(|z| {
            if rev {
                z.rev_rank(member)
            } else {
                z.rank(member)
            }
        }))
    }

    /// ZRANGE / ZREVRANGE: inclusive rank range over the forward or
    /// reversed ordering.
    pub fn zrange(
        &self,
        key: &[u8],
        start: i64,
        stop: i64,
        rev: bool,
    ) -> Result<Vec<(Bytes, f64)>, CommandError> {
        let Some(zset) = self.read_zset(key)? else {
            return Ok(Vec::new());
        };
        let Some((s, e)) = normalize_range(start, stop, zset.len()) else {
            return Ok(Vec::new());
        };

        if rev {
            let mut ordered: Vec<(Bytes, f64)> = zset
                .iter()
                .map(|(member, score)| (member.clone(), score))
                .collect();
            ordered.reverse();
            Ok(ordered[s..=e].to_vec())
        } else {
            Ok(zset.range_by_rank(s, e))
        }
    }

    /// ZRANGEBYSCORE / ZREVRANGEBYSCORE: score-bounded range, optionally
    /// reversed, with an optional `LIMIT offset count` applied in output
    /// order. A missing key is an empty array.
    pub fn zrange_by_score(
        &self,
        key: &[u8],
        min: Bound<f64>,
        max: Bound<f64>,
        rev: bool,
        limit: Option<(usize, usize)>,
    ) -> Result<Vec<(Bytes, f64)>, CommandError> {
        let Some(zset) = self.read_zset(key)? else {
            return Ok(Vec::new());
        };
        let mut matched: Vec<(Bytes, f64)> = zset
            .range_by_score(min, max)
            .map(|(member, score)| (member.clone(), score))
            .collect();
        if rev {
            matched.reverse();
        }
        if let Some((offset, count)) = limit {
            matched = matched.into_iter().skip(offset).take(count).collect();
        }
        Ok(matched)
    }

    /// ZREM: removes members; emptying the zset deletes the key.
    pub fn zrem(&mut self, key: &[u8], members: &[Bytes]) -> Result<usize, CommandError> {
        self.update_or(key, ItemType::ZSet, 0, |item| {
            let Value::ZSet(zset) = &mut item.value else {
                unreachable!("type gated");
            };
            let mut removed = 0;
            for member in members {
                if zset.remove(member) {
                    removed += 1;
                }
            }
            if removed == 0 {
                Ok(Apply::Keep(0))
            } else if zset.is_empty() {
                Ok(Apply::Delete(removed))
            } else {
                Ok(Apply::Write(removed))
            }
        })
    }

    /// ZREMRANGEBYRANK: removes the members in the inclusive rank range.
    pub fn zrem_range_by_rank(
        &mut self,
        key: &[u8],
        start: i64,
        stop: i64,
    ) -> Result<usize, CommandError> {
        let doomed: Vec<Bytes> = self
            .zrange(key, start, stop, false)?
            .into_iter()
            .map(|(member, _)| member)
            .collect();
        self.zrem(key, &doomed)
    }

    /// ZREMRANGEBYSCORE: removes the members in the score range.
    pub fn zrem_range_by_score(
        &mut self,
        key: &[u8],
        min: Bound<f64>,
        max: Bound<f64>,
    ) -> Result<usize, CommandError> {
        let doomed: Vec<Bytes> = self
            .zrange_by_score(key, min, max, false, None)?
            .into_iter()
            .map(|(member, _)| member)
            .collect();
        self.zrem(key, &doomed)
    }

    /// ZUNIONSTORE / ZINTERSTORE: combines the weighted inputs under the
    /// aggregation and writes the result to `dst`, deleting `dst` when the
    /// result is empty. Missing input keys behave as empty zsets. Returns
    /// the result cardinality.
    pub fn zstore(
        &mut self,
        dst: &[u8],
        inputs: &[(Bytes, f64)],
        agg: Aggregate,
        intersect: bool,
    ) -> Result<usize, CommandError> {
        let mut sets = Vec::with_capacity(inputs.len());
        for (key, weight) in inputs {
            sets.push((self.read_zset(key)?.unwrap_or_default(), *weight));
        }

        let result = if intersect {
            sorted_set::inter_weighted(&sets, agg)
        } else {
            sorted_set::union_weighted(&sets, agg)
        };
        let len = result.len();

        if result.is_empty() {
            self.store().delete(dst)?;
        } else {
            let item = Item::new(
                Bytes::copy_from_slice(dst),
                ItemType::ZSet,
                ItemEncoding::Skiplist,
                Value::ZSet(result),
            );
            self.put_item(&item)?;
        }
        Ok(len)
    }

    fn read_zset(&self, key: &[u8]) -> Result<Option<SortedSet>, CommandError> {
        Ok(self
            .get_item(Some(ItemType::ZSet), key)?
            .map(|item| match item.value {
                Value::ZSet(zset) => zset,
                _ => unreachable!("type gated"),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::keyspace;
    use super::*;

    fn entries(list: &[(f64, &str)]) -> Vec<(f64, Bytes)> {
        list.iter()
            .map(|(score, member)| (*score, Bytes::copy_from_slice(member.as_bytes())))
            .collect()
    }

    #[test]
    fn zadd_returns_cardinality_delta() {
        let mut ks = keyspace();
        assert_eq!(ks.zadd(b"z", entries(&[(1.0, "a"), (2.0, "b")])).unwrap(), 2);
        // re-scoring an existing member adds nothing
        assert_eq!(ks.zadd(b"z", entries(&[(5.0, "a"), (3.0, "c")])).unwrap(), 1);
        assert_eq!(ks.zcard(b"z").unwrap(), 3);
        assert_eq!(ks.zscore(b"z", b"a").unwrap(), Some(5.0));
    }

    #[test]
    fn zrange_with_scores_scenario() {
        let mut ks = keyspace();
        ks.zadd(b"z", entries(&[(1.0, "a"), (2.0, "b"), (3.0, "c")]))
            .unwrap();

        let all = ks.zrange(b"z", 0, -1, false).unwrap();
        assert_eq!(
            all,
            vec![
                (Bytes::from("a"), 1.0),
                (Bytes::from("b"), 2.0),
                (Bytes::from("c"), 3.0)
            ]
        );

        let rev = ks.zrange(b"z", 0, 1, true).unwrap();
        assert_eq!(rev, vec![(Bytes::from("c"), 3.0), (Bytes::from("b"), 2.0)]);
    }

    #[test]
    fn zrangebyscore_bounds_and_missing_key() {
        let mut ks = keyspace();
        ks.zadd(b"z", entries(&[(1.0, "a"), (2.0, "b"), (3.0, "c")]))
            .unwrap();

        let ranged = ks
            .zrange_by_score(b"z", Bound::Included(1.0), Bound::Included(2.0), false, None)
            .unwrap();
        assert_eq!(ranged, vec![(Bytes::from("a"), 1.0), (Bytes::from("b"), 2.0)]);

        let exclusive = ks
            .zrange_by_score(b"z", Bound::Excluded(1.0), Bound::Included(3.0), false, None)
            .unwrap();
        assert_eq!(exclusive.first().unwrap().0, Bytes::from("b"));

        // missing key yields an empty array, not a count
        assert!(ks
            .zrange_by_score(b"missing", Bound::Unbounded, Bound::Unbounded, false, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn zrangebyscore_limit_applies_in_output_order() {
        let mut ks = keyspace();
        ks.zadd(b"z", entries(&[(1.0, "a"), (2.0, "b"), (3.0, "c")]))
            .unwrap();

        let limited = ks
            .zrange_by_score(
                b"z",
                Bound::Unbounded,
                Bound::Unbounded,
                true,
                Some((1, 1)),
            )
            .unwrap();
        assert_eq!(limited, vec![(Bytes::from("b"), 2.0)]);
    }

    #[test]
    fn zrank_forward_and_reverse() {
        let mut ks = keyspace();
        ks.zadd(b"z", entries(&[(1.0, "a"), (2.0, "b"), (2.0, "c")]))
            .unwrap();

        assert_eq!(ks.zrank(b"z", b"a", false).unwrap(), Some(0));
        // equal scores break ties by member bytes
        assert_eq!(ks.zrank(b"z", b"b", false).unwrap(), Some(1));
        assert_eq!(ks.zrank(b"z", b"c", false).unwrap(), Some(2));
        assert_eq!(ks.zrank(b"z", b"c", true).unwrap(), Some(0));
        assert_eq!(ks.zrank(b"z", b"missing", false).unwrap(), None);
    }

    #[test]
    fn zcount_and_zincrby() {
        let mut ks = keyspace();
        ks.zadd(b"z", entries(&[(1.0, "a"), (2.0, "b")])).unwrap();

        assert_eq!(
            ks.zcount(b"z", Bound::Included(1.0), Bound::Excluded(2.0)).unwrap(),
            1
        );
        assert_eq!(ks.zcount(b"missing", Bound::Unbounded, Bound::Unbounded).unwrap(), 0);

        assert_eq!(ks.zincr_by(b"z", 2.5, Bytes::from("a")).unwrap(), 3.5);
        assert_eq!(ks.zincr_by(b"z", 1.0, Bytes::from("new")).unwrap(), 1.0);
    }

    #[test]
    fn zrem_and_range_removals() {
        let mut ks = keyspace();
        ks.zadd(b"z", entries(&[(1.0, "a"), (2.0, "b"), (3.0, "c"), (4.0, "d")]))
            .unwrap();

        assert_eq!(ks.zrem(b"z", &[Bytes::from("a"), Bytes::from("zz")]).unwrap(), 1);
        assert_eq!(ks.zrem_range_by_rank(b"z", 0, 0).unwrap(), 1);
        assert_eq!(
            ks.zrem_range_by_score(b"z", Bound::Included(4.0), Bound::Unbounded)
                .unwrap(),
            1
        );
        assert_eq!(ks.zcard(b"z").unwrap(), 1);

        // removing the last member deletes the key
        assert_eq!(ks.zrem(b"z", &[Bytes::from("c")]).unwrap(), 1);
        assert!(!ks.exists(b"z").unwrap());
    }

    #[test]
    fn zunionstore_sums_per_member() {
        let mut ks = keyspace();
        ks.zadd(b"a", entries(&[(1.0, "m"), (2.0, "n")])).unwrap();
        ks.zadd(b"b", entries(&[(3.0, "m")])).unwrap();

        let len = ks
            .zstore(
                b"dst",
                &[(Bytes::from("a"), 1.0), (Bytes::from("b"), 1.0)],
                Aggregate::Sum,
                false,
            )
            .unwrap();
        assert_eq!(len, 2);
        assert_eq!(ks.zscore(b"dst", b"m").unwrap(), Some(4.0));
        assert_eq!(ks.zscore(b"dst", b"n").unwrap(), Some(2.0));
    }

    #[test]
    fn zinterstore_empty_result_deletes_destination() {
        let mut ks = keyspace();
        ks.zadd(b"a", entries(&[(1.0, "m")])).unwrap();
        ks.zadd(b"dst", entries(&[(9.0, "stale")])).unwrap();

        let len = ks
            .zstore(
                b"dst",
                &[(Bytes::from("a"), 1.0), (Bytes::from("missing"), 1.0)],
                Aggregate::Sum,
                true,
            )
            .unwrap();
        assert_eq!(len, 0);
        assert!(!ks.exists(b"dst").unwrap());
    }

    #[test]
    fn zstore_applies_weights() {
        let mut ks = keyspace();
        ks.zadd(b"a", entries(&[(1.0, "m")])).unwrap();
        ks.zadd(b"b", entries(&[(2.0, "m")])).unwrap();

        ks.zstore(
            b"dst",
            &[(Bytes::from("a"), 2.0), (Bytes::from("b"), 3.0)],
            Aggregate::Max,
            true,
        )
        .unwrap();
        assert_eq!(ks.zscore(b"dst", b"m").unwrap(), Some(6.0));
    }
}
