//! Collaborator contracts
//!
//! The index does not own the transaction log. It reaches it through
//! [`LogReplay`] when tables have to be rebuilt, and asks an
//! [`EntryValidity`] predicate during merges whether an entry still points
//! at a live record.

use crate::entry::IndexEntry;
use crate::error::Result;

/// One committed record as seen by the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayRecord {
    pub hash: u64,
    pub event_number: i64,
    pub position: i64,
}

impl ReplayRecord {
    pub fn new(hash: u64, event_number: i64, position: i64) -> Self {
        Self {
            hash,
            event_number,
            position,
        }
    }
}

impl From<ReplayRecord> for IndexEntry {
    fn from(record: ReplayRecord) -> Self {
        IndexEntry::new(record.hash, record.event_number, record.position)
    }
}

/// Source of committed records, in log order
pub trait LogReplay {
    /// Every committed record with a position strictly greater than
    /// `checkpoint`; `-1` replays the whole log.
    fn for_each_committed_record_since(
        &self,
        checkpoint: i64,
    ) -> Box<dyn Iterator<Item = Result<ReplayRecord>> + '_>;

    /// Position the log's next record will be written at, if known.
    ///
    /// An index claiming to cover this position or anything after it was
    /// built from records the log no longer has, and gets rebuilt.
    fn writer_checkpoint(&self) -> Option<i64> {
        None
    }
}

/// A log with nothing to replay
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReplay;

impl LogReplay for NoReplay {
    fn for_each_committed_record_since(
        &self,
        _checkpoint: i64,
    ) -> Box<dyn Iterator<Item = Result<ReplayRecord>> + '_> {
        Box::new(std::iter::empty())
    }
}

/// Records held in memory, sorted by position
#[derive(Debug, Clone, Default)]
pub struct InMemoryLog {
    records: Vec<ReplayRecord>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record; positions must grow
    pub fn append(&mut self, hash: u64, event_number: i64, position: i64) {
        debug_assert!(self.records.last().map_or(true, |r| r.position < position));
        self.records.push(ReplayRecord::new(hash, event_number, position));
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<ReplayRecord> for InMemoryLog {
    fn from_iter<I: IntoIterator<Item = ReplayRecord>>(iter: I) -> Self {
        let mut records: Vec<ReplayRecord> = iter.into_iter().collect();
        records.sort_by_key(|r| r.position);
        Self { records }
    }
}

impl LogReplay for InMemoryLog {
    fn for_each_committed_record_since(
        &self,
        checkpoint: i64,
    ) -> Box<dyn Iterator<Item = Result<ReplayRecord>> + '_> {
        let start = self.records.partition_point(|r| r.position <= checkpoint);
        Box::new(self.records[start..].iter().copied().map(Ok))
    }

    fn writer_checkpoint(&self) -> Option<i64> {
        Some(self.records.last().map_or(0, |r| r.position + 1))
    }
}

/// Predicate consulted for every surviving entry of a merge
pub trait EntryValidity: Send + Sync {
    fn is_still_valid(&self, entry: &IndexEntry) -> bool;
}

impl<F> EntryValidity for F
where
    F: Fn(&IndexEntry) -> bool + Send + Sync,
{
    fn is_still_valid(&self, entry: &IndexEntry) -> bool {
        self(entry)
    }
}

/// Keeps every entry
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysValid;

impl EntryValidity for AlwaysValid {
    fn is_still_valid(&self, _entry: &IndexEntry) -> bool {
        true
    }
}
