//! Sorted set: unique byte-string members ordered by (score, member).
//!
//! Dual-indexed — a `BTreeMap` keyed by `(OrderedFloat, member)` for
//! ordered iteration and rank/range queries, plus a member→score map for
//! O(1) lookups. Ties in score are broken by member bytes, matching the
//! rank and range semantics the zset commands expose.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use bytes::Bytes;
use ordered_float::OrderedFloat;
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};

/// Score-combining function for the weighted store operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Sum,
    Min,
    Max,
}

impl Aggregate {
    fn combine(self, a: f64, b: f64) -> f64 {
        match self {
            Aggregate::Sum => a + b,
            Aggregate::Min => a.min(b),
            Aggregate::Max => a.max(b),
        }
    }
}

/// A sorted set of unique members with floating-point scores.
#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    /// (score, member) → () index for ordered traversal.
    tree: BTreeMap<(OrderedFloat<f64>, Bytes), ()>,
    /// member → score index for O(1) lookups.
    scores: HashMap<Bytes, OrderedFloat<f64>>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or re-scores a member. Returns `true` if the member was new.
    pub fn insert(&mut self, member: Bytes, score: f64) -> bool {
        let new_score = OrderedFloat(score);
        match self.scores.insert(member.clone(), new_score) {
            Some(old_score) => {
                if old_score != new_score {
                    self.tree.remove(&(old_score, member.clone()));
                    self.tree.insert((new_score, member), ());
                }
                false
            }
            None => {
                self.tree.insert((new_score, member), ());
                true
            }
        }
    }

    /// Removes a member. Returns `true` if it existed.
    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.tree.remove(&(score, Bytes::copy_from_slice(member)));
                true
            }
            None => false,
        }
    }

    /// Returns the score of a member, if present.
    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).map(|s| s.0)
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.scores.contains_key(member)
    }

    /// 0-based forward rank: the number of members ordered before this one.
    ///
    /// O(n) walk of the tree — fine at the sizes a single record holds.
    pub fn rank(&self, member: &[u8]) -> Option<usize> {
        let score = *self.scores.get(member)?;
        let key = (score, Bytes::copy_from_slice(member));
        Some(self.tree.range(..&key).count())
    }

    /// 0-based rank counted from the highest-ordered member.
    pub fn rev_rank(&self, member: &[u8]) -> Option<usize> {
        self.rank(member).map(|r| self.len() - 1 - r)
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Iterates (member, score) in (score, member) order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&Bytes, f64)> {
        self.tree.keys().map(|(score, member)| (member, score.0))
    }

    /// Members in the inclusive rank range, already resolved to concrete
    /// indices by the caller.
    pub fn range_by_rank(&self, start: usize, stop: usize) -> Vec<(Bytes, f64)> {
        self.iter()
            .skip(start)
            .take(stop - start + 1)
            .map(|(member, score)| (member.clone(), score))
            .collect()
    }

    /// Members whose score falls within the given bounds, ascending.
    pub fn range_by_score(
        &self,
        min: Bound<f64>,
        max: Bound<f64>,
    ) -> impl Iterator<Item = (&Bytes, f64)> {
        // The tree key is (score, member); a score-only lower bound starts
        // at the empty member, then an exclusive bound skips the boundary
        // score. The upper bound is enforced with take_while.
        let start: Bound<(OrderedFloat<f64>, Bytes)> = match min {
            Bound::Unbounded => Bound::Unbounded,
            Bound::Included(s) | Bound::Excluded(s) => {
                Bound::Included((OrderedFloat(s), Bytes::new()))
            }
        };

        self.tree
            .range((start, Bound::Unbounded))
            .map(|((score, member), ())| (member, score.0))
            .skip_while(move |(_, score)| match min {
                Bound::Excluded(lo) => *score <= lo,
                _ => false,
            })
            .take_while(move |(_, score)| match max {
                Bound::Included(hi) => *score <= hi,
                Bound::Excluded(hi) => *score < hi,
                Bound::Unbounded => true,
            })
    }

    /// Number of members whose score falls within the given bounds.
    pub fn count_by_score(&self, min: Bound<f64>, max: Bound<f64>) -> usize {
        self.range_by_score(min, max).count()
    }
}

impl PartialEq for SortedSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|((m1, s1), (m2, s2))| m1 == m2 && s1 == s2)
    }
}

// The persisted form is the ordered (score, member) pair list; rebuilding
// the dual index on decode keeps the blob free of implementation detail.
impl Serialize for SortedSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let entries: Vec<(f64, &Bytes)> =
            self.iter().map(|(member, score)| (score, member)).collect();
        entries.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SortedSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Vec::<(f64, Bytes)>::deserialize(deserializer)?;
        let mut set = SortedSet::new();
        for (score, member) in entries {
            set.insert(member, score);
        }
        Ok(set)
    }
}

/// Weighted union: every member of any input appears; its score is the
/// aggregate of `score * weight` over the inputs that contain it.
pub fn union_weighted(inputs: &[(SortedSet, f64)], agg: Aggregate) -> SortedSet {
    let mut combined: HashMap<Bytes, f64> = HashMap::new();
    for (set, weight) in inputs {
        for (member, score) in set.iter() {
            let weighted = score * weight;
            combined
                .entry(member.clone())
                .and_modify(|acc| *acc = agg.combine(*acc, weighted))
                .or_insert(weighted);
        }
    }

    let mut out = SortedSet::new();
    for (member, score) in combined {
        out.insert(member, score);
    }
    out
}

/// Weighted intersection: only members present in every input appear.
pub fn inter_weighted(inputs: &[(SortedSet, f64)], agg: Aggregate) -> SortedSet {
    let mut out = SortedSet::new();
    let Some(((first, first_weight), rest)) = inputs.split_first() else {
        return out;
    };

    'members: for (member, score) in first.iter() {
        let mut acc = score * first_weight;
        for (set, weight) in rest {
            match set.score(member) {
                Some(other) => acc = agg.combine(acc, other * weight),
                None => continue 'members,
            }
        }
        out.insert(member.clone(), acc);
    }
    out
}
