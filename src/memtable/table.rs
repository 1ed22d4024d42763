//! MemTable implementation
//!
//! BTreeMap keyed by `IndexKey` behind a RwLock. The map's ordering is the
//! index ordering, so iteration already yields entries in PTable order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::entry::{IndexEntry, IndexKey};
use crate::error::{IndexError, Result};

use super::MemTableState;

/// In-memory table for recent index entries
pub struct MemTable {
    /// Identifier, reused as the id of the PTable built from it
    id: u64,

    /// Entry count at which the table should be drained
    capacity: usize,

    /// key → log position
    data: RwLock<BTreeMap<IndexKey, i64>>,

    /// `MemTableState` as u8; only changed under the write lock
    state: AtomicU8,

    /// Highest log position added so far (-1 when empty)
    max_position: AtomicI64,

    /// Lowest log position added so far (i64::MAX when empty)
    min_position: AtomicI64,
}

impl MemTable {
    /// Create a new empty, writable MemTable
    pub fn new(id: u64, capacity: usize) -> Self {
        Self {
            id,
            capacity,
            data: RwLock::new(BTreeMap::new()),
            state: AtomicU8::new(MemTableState::Writable.as_u8()),
            max_position: AtomicI64::new(-1),
            min_position: AtomicI64::new(i64::MAX),
        }
    }

    /// Add an entry; a second add for the same key replaces the position.
    ///
    /// Returns the entry count after the insert.
    pub fn add(&self, entry: IndexEntry) -> Result<usize> {
        if entry.event_number < 0 {
            return Err(IndexError::InvalidEntry(format!(
                "negative event number {}",
                entry.event_number
            )));
        }
        if entry.position < 0 {
            return Err(IndexError::InvalidEntry(format!(
                "negative log position {}",
                entry.position
            )));
        }

        let mut data = self.data.write();

        let state = self.state();
        if state != MemTableState::Writable {
            return Err(IndexError::InvalidState(format!(
                "MemTable {} is {:?}",
                self.id, state
            )));
        }

        let key = entry.key();
        if data.len() >= self.capacity && !data.contains_key(&key) {
            return Err(IndexError::InvalidState(format!(
                "MemTable {} is full ({} entries)",
                self.id, self.capacity
            )));
        }

        data.insert(key, entry.position);
        self.max_position.fetch_max(entry.position, Ordering::AcqRel);
        self.min_position.fetch_min(entry.position, Ordering::AcqRel);

        Ok(data.len())
    }

    /// Get the position stored for an exact key
    pub fn try_get_one_value(&self, hash: u64, event_number: i64) -> Option<i64> {
        self.data
            .read()
            .get(&IndexKey::new(hash, event_number))
            .copied()
    }

    /// Entries of `hash` with `from <= event_number <= to`, newest first
    pub fn get_range(&self, hash: u64, from_event_number: i64, to_event_number: i64) -> Vec<IndexEntry> {
        if from_event_number > to_event_number || to_event_number < 0 {
            return Vec::new();
        }

        let start = IndexKey::new(hash, to_event_number);
        let end = IndexKey::new(hash, from_event_number);

        self.data
            .read()
            .range(start..=end)
            .map(|(key, &position)| IndexEntry::new(key.hash, key.event_number, position))
            .collect()
    }

    /// Entry with the highest event number for `hash`
    pub fn try_get_latest_entry(&self, hash: u64) -> Option<IndexEntry> {
        let data = self.data.read();
        let mut run = data.range(Self::hash_run(hash));
        run.next()
            .map(|(key, &position)| IndexEntry::new(key.hash, key.event_number, position))
    }

    /// Entry with the lowest event number for `hash`
    pub fn try_get_oldest_entry(&self, hash: u64) -> Option<IndexEntry> {
        let data = self.data.read();
        let mut run = data.range(Self::hash_run(hash));
        run.next_back()
            .map(|(key, &position)| IndexEntry::new(key.hash, key.event_number, position))
    }

    /// Freeze the table; new writes must go to a fresh MemTable.
    ///
    /// Fails if the table was already frozen, so each table yields exactly
    /// one snapshot.
    pub fn mark_draining(self: &Arc<Self>) -> Result<DrainedSnapshot> {
        let _data = self.data.write();

        self.state
            .compare_exchange(
                MemTableState::Writable.as_u8(),
                MemTableState::Draining.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|raw| {
                IndexError::InvalidState(format!(
                    "MemTable {} cannot drain from {:?}",
                    self.id,
                    MemTableState::from_u8(raw)
                ))
            })?;

        Ok(DrainedSnapshot {
            table: Arc::clone(self),
        })
    }

    /// Record that a published PTable now holds this table's contents
    pub fn mark_drained(&self) {
        let _data = self.data.write();
        self.state
            .store(MemTableState::Drained.as_u8(), Ordering::Release);
    }

    /// All entries in index order
    pub fn entries(&self) -> Vec<IndexEntry> {
        self.data
            .read()
            .iter()
            .map(|(key, &position)| IndexEntry::new(key.hash, key.event_number, position))
            .collect()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> MemTableState {
        MemTableState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check if the table reached its capacity
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Highest log position held, -1 when empty
    pub fn max_position(&self) -> i64 {
        self.max_position.load(Ordering::Acquire)
    }

    /// Lowest log position held, `None` when empty
    pub fn min_position(&self) -> Option<i64> {
        match self.min_position.load(Ordering::Acquire) {
            i64::MAX => None,
            position => Some(position),
        }
    }

    fn hash_run(hash: u64) -> std::ops::RangeInclusive<IndexKey> {
        IndexKey::new(hash, i64::MAX)..=IndexKey::new(hash, i64::MIN)
    }
}

/// Frozen view of a draining MemTable, consumed by PTable construction
pub struct DrainedSnapshot {
    table: Arc<MemTable>,
}

impl DrainedSnapshot {
    pub fn id(&self) -> u64 {
        self.table.id()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn max_position(&self) -> i64 {
        self.table.max_position()
    }

    pub fn min_position(&self) -> Option<i64> {
        self.table.min_position()
    }

    /// The drained table itself
    pub fn table(&self) -> &Arc<MemTable> {
        &self.table
    }

    /// Sorted entries, leaving the snapshot in place for a retry
    pub fn entries(&self) -> Vec<IndexEntry> {
        self.table.entries()
    }

    /// Sorted entries; consumes the snapshot
    pub fn into_entries(self) -> Vec<IndexEntry> {
        self.table.entries()
    }
}
