//! Midpoint cache
//!
//! Sparse, evenly spaced samples of `(key, item index)`. A lookup first
//! binary-searches the samples, then only the entries between two adjacent
//! samples have to be read from disk.

use crate::entry::IndexKey;

/// One sampled entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Midpoint {
    pub key: IndexKey,
    pub item_index: u64,
}

/// Sorted samples of a table. Empty only for an empty table; otherwise the
/// first and last entries are always present.
#[derive(Debug, Clone, Default)]
pub struct MidpointCache {
    points: Vec<Midpoint>,
}

impl MidpointCache {
    pub(crate) fn new(points: Vec<Midpoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Midpoint] {
        &self.points
    }

    pub fn first_key(&self) -> Option<IndexKey> {
        self.points.first().map(|m| m.key)
    }

    pub fn last_key(&self) -> Option<IndexKey> {
        self.points.last().map(|m| m.key)
    }

    /// Item window `[lo, hi]` holding the first entry with key `>= target`.
    ///
    /// `Err(index)` when the answer is already known from the samples.
    pub(crate) fn lower_bound_window(&self, target: &IndexKey, entry_count: u64) -> Result<(u64, u64), u64> {
        let i = self.points.partition_point(|m| m.key < *target);
        self.window(i, entry_count)
    }

    /// Item window `[lo, hi]` holding the first entry with key `> target`.
    pub(crate) fn upper_bound_window(&self, target: &IndexKey, entry_count: u64) -> Result<(u64, u64), u64> {
        let i = self.points.partition_point(|m| m.key <= *target);
        self.window(i, entry_count)
    }

    fn window(&self, i: usize, entry_count: u64) -> Result<(u64, u64), u64> {
        if i == 0 {
            return Err(0);
        }
        if i == self.points.len() {
            return Err(entry_count);
        }
        Ok((self.points[i - 1].item_index + 1, self.points[i].item_index))
    }
}

/// Number of samples for a table: none when empty, otherwise
/// `max(2, min(2^depth, count))`.
pub(crate) fn midpoint_count(entry_count: u64, cache_depth: i32) -> u64 {
    if entry_count == 0 {
        return 0;
    }
    let wanted = 1u64 << cache_depth.clamp(0, 62);
    wanted.min(entry_count).max(2)
}

/// Item index sampled by midpoint `k` out of `count`
pub(crate) fn midpoint_item_index(k: u64, count: u64, entry_count: u64) -> u64 {
    if count <= 1 {
        return 0;
    }
    ((k as u128 * (entry_count - 1) as u128) / (count - 1) as u128) as u64
}
