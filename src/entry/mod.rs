//! Index Entry Module
//!
//! The record the whole engine is built around: a stream hash, an event
//! number within that stream, and the log position of the event.
//!
//! ## Ordering
//! Keys sort by hash ascending, then by event number **descending**. The
//! newest event of a stream is therefore the first entry of its hash run,
//! and the oldest one is the last.
//!
//! ```text
//!   (hash=7, ev=3) < (hash=7, ev=2) < (hash=7, ev=0) < (hash=9, ev=5) < ...
//! ```

mod codec;

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

pub use codec::{EntryCodec, Hash32Codec, Hash64Codec, IndexVersion};

/// Logical key of an entry: `(stream hash, event number)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexKey {
    pub hash: u64,
    pub event_number: i64,
}

impl IndexKey {
    pub fn new(hash: u64, event_number: i64) -> Self {
        Self { hash, event_number }
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.hash
            .cmp(&other.hash)
            .then_with(|| other.event_number.cmp(&self.event_number))
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A `(stream hash, event number, log position)` record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub hash: u64,
    pub event_number: i64,
    pub position: i64,
}

impl IndexEntry {
    pub fn new(hash: u64, event_number: i64, position: i64) -> Self {
        Self {
            hash,
            event_number,
            position,
        }
    }

    pub fn key(&self) -> IndexKey {
        IndexKey::new(self.hash, self.event_number)
    }
}

/// Total order over entries; the position never takes part because a
/// logical key appears at most once per table.
pub fn compare(a: &IndexEntry, b: &IndexEntry) -> Ordering {
    a.key().cmp(&b.key())
}
