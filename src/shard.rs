//! Artist shard planning.
//!
//! Artists are spread over a fixed number of shards so that every shard
//! carries about the same number of catalog rows, not the same number of
//! artists. Planning is the longest-processing-time-first heuristic: heaviest
//! artist first, always onto the lightest shard.

use rustc_hash::FxHashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::hash::Hash;

use crate::error::{MappingError, Result};

/// Fixed mapping from a key (usually an artist credit id) to a shard index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardAssignment<K: Eq + Hash = i64> {
    shards: FxHashMap<K, usize>,
    totals: Vec<u64>,
}

impl<K: Copy + Eq + Hash> ShardAssignment<K> {
    pub fn shard_for(&self, key: K) -> Option<usize> {
        self.shards.get(&key).copied()
    }

    pub fn num_shards(&self) -> usize {
        self.totals.len()
    }

    /// Accumulated row count per shard.
    pub fn totals(&self) -> &[u64] {
        &self.totals
    }

    /// Number of keys assigned.
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Keys owned by one shard, in no particular order.
    pub fn keys_for(&self, shard: usize) -> Vec<K> {
        self.shards
            .iter()
            .filter(|(_, s)| **s == shard)
            .map(|(k, _)| *k)
            .collect()
    }
}

/// Plan `histogram` (key → row count) onto `num_shards` shards.
///
/// Keys are taken by row count descending, ties by key ascending, and each
/// goes to the shard with the smallest running total (lowest index on ties),
/// so the result only depends on the histogram and the shard count.
pub fn plan_shards<K>(
    histogram: &FxHashMap<K, u64>,
    num_shards: usize,
) -> Result<ShardAssignment<K>>
where
    K: Copy + Ord + Hash,
{
    if num_shards == 0 {
        return Err(MappingError::InvalidShardCount);
    }

    let mut keys: Vec<(K, u64)> = histogram.iter().map(|(k, v)| (*k, *v)).collect();
    keys.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    // Min-heap on (total, shard index)
    let mut heap: BinaryHeap<Reverse<(u64, usize)>> =
        (0..num_shards).map(|s| Reverse((0, s))).collect();
    let mut totals = vec![0u64; num_shards];
    let mut shards: FxHashMap<K, usize> = FxHashMap::default();
    shards.reserve(keys.len());

    for (key, rows) in keys {
        let Some(Reverse((total, shard))) = heap.pop() else {
            break;
        };
        shards.insert(key, shard);
        totals[shard] = total + rows;
        heap.push(Reverse((totals[shard], shard)));
    }

    Ok(ShardAssignment { shards, totals })
}

/// Histogram over the first character of already normalized names, the
/// bucketing used when shards are keyed by name rather than by artist id.
pub fn first_char_histogram<'a>(names: impl IntoIterator<Item = &'a str>) -> FxHashMap<char, u64> {
    let mut histogram: FxHashMap<char, u64> = FxHashMap::default();
    for name in names {
        if let Some(ch) = name.chars().next() {
            *histogram.entry(ch).or_insert(0) += 1;
        }
    }
    histogram
}
