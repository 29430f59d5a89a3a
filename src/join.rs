//! Named hash joins over in-memory tables.
//!
//! Every join reports [`JoinStats`] so rows lost to an inner join are counted
//! and logged rather than disappearing silently.

use std::collections::HashMap;
use std::hash::Hash;

use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    Inner,
    Left,
}

/// Row counts before and after one join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinStats {
    pub name: String,
    pub kind: JoinKind,
    pub left_rows: usize,
    pub right_rows: usize,
    pub output_rows: usize,
    /// Left rows with no partner on the right.
    pub unmatched_left: usize,
    /// Right rows never matched by any left row.
    pub unmatched_right: usize,
}

impl JoinStats {
    /// Input rows that contribute nothing to the output.
    pub fn dropped_rows(&self) -> usize {
        match self.kind {
            JoinKind::Inner => self.unmatched_left + self.unmatched_right,
            JoinKind::Left => self.unmatched_right,
        }
    }

    fn log(&self) {
        if self.dropped_rows() > 0 {
            warn!(
                join = %self.name,
                kind = ?self.kind,
                left_rows = self.left_rows,
                right_rows = self.right_rows,
                output_rows = self.output_rows,
                unmatched_left = self.unmatched_left,
                unmatched_right = self.unmatched_right,
                "Join dropped rows"
            );
        } else {
            debug!(
                join = %self.name,
                kind = ?self.kind,
                output_rows = self.output_rows,
                "Join complete"
            );
        }
    }
}

#[derive(Debug)]
pub struct Joined<T> {
    pub rows: Vec<T>,
    pub stats: JoinStats,
}

struct RightIndex<'a, R, K> {
    buckets: HashMap<K, (Vec<&'a R>, bool)>,
}

impl<'a, R, K: Eq + Hash> RightIndex<'a, R, K> {
    fn build(right: &'a [R], key: impl Fn(&'a R) -> K) -> Self {
        let mut buckets: HashMap<K, (Vec<&'a R>, bool)> = HashMap::new();
        for row in right {
            buckets.entry(key(row)).or_default().0.push(row);
        }
        Self { buckets }
    }

    fn probe(&mut self, key: &K) -> &[&'a R] {
        match self.buckets.get_mut(key) {
            Some((rows, matched)) => {
                *matched = true;
                rows
            }
            None => &[],
        }
    }

    fn unmatched(&self) -> usize {
        self.buckets
            .values()
            .filter(|(_, matched)| !matched)
            .map(|(rows, _)| rows.len())
            .sum()
    }
}

/// Pairs every left row with every right row sharing its key.
///
/// Left rows without a partner are dropped and counted in the stats.
pub fn inner_join<'a, L, R, K>(
    name: &str,
    left: &'a [L],
    right: &'a [R],
    left_key: impl Fn(&'a L) -> K,
    right_key: impl Fn(&'a R) -> K,
) -> Joined<(&'a L, &'a R)>
where
    K: Eq + Hash,
{
    let mut index = RightIndex::build(right, right_key);
    let mut rows = Vec::with_capacity(left.len());
    let mut unmatched_left = 0;

    for l in left {
        let partners = index.probe(&left_key(l));
        if partners.is_empty() {
            unmatched_left += 1;
        }
        rows.extend(partners.iter().map(|r| (l, *r)));
    }

    let stats = JoinStats {
        name: name.to_string(),
        kind: JoinKind::Inner,
        left_rows: left.len(),
        right_rows: right.len(),
        output_rows: rows.len(),
        unmatched_left,
        unmatched_right: index.unmatched(),
    };
    stats.log();
    Joined { rows, stats }
}

/// Like [`inner_join`], but a left row without partner is kept once with `None`.
pub fn left_join<'a, L, R, K>(
    name: &str,
    left: &'a [L],
    right: &'a [R],
    left_key: impl Fn(&'a L) -> K,
    right_key: impl Fn(&'a R) -> K,
) -> Joined<(&'a L, Option<&'a R>)>
where
    K: Eq + Hash,
{
    let mut index = RightIndex::build(right, right_key);
    let mut rows = Vec::with_capacity(left.len());
    let mut unmatched_left = 0;

    for l in left {
        let partners = index.probe(&left_key(l));
        if partners.is_empty() {
            unmatched_left += 1;
            rows.push((l, None));
        } else {
            rows.extend(partners.iter().map(|r| (l, Some(*r))));
        }
    }

    let stats = JoinStats {
        name: name.to_string(),
        kind: JoinKind::Left,
        left_rows: left.len(),
        right_rows: right.len(),
        output_rows: rows.len(),
        unmatched_left,
        unmatched_right: index.unmatched(),
    };
    stats.log();
    Joined { rows, stats }
}
