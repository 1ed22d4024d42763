//! Merge
//!
//! N-way merge of PTables into one new table, driven by a min-heap over one
//! sequential iterator per input.
//!
//! Inputs are ordered oldest to newest (their position inside a level).
//! When the same `(hash, event_number)` key appears in several inputs only
//! the newest source's entry survives; the validity predicate then decides
//! whether that survivor is written at all.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::entry::{IndexEntry, IndexKey};
use crate::error::Result;
use crate::replay::EntryValidity;

use super::ptable::{PTable, PTableBuilder, PTableIterator, PTableOptions};

/// The pending head of one source
struct HeapEntry {
    entry: IndexEntry,
    /// Index into `MergeIterator::sources`; higher is newer
    source: usize,
}

impl HeapEntry {
    fn key(&self) -> IndexKey {
        self.entry.key()
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: smallest key first, and on equal keys
        // the newest source pops first.
        other
            .key()
            .cmp(&self.key())
            .then_with(|| self.source.cmp(&other.source))
    }
}

/// Sorted, deduplicated stream over several PTables
pub struct MergeIterator {
    sources: Vec<PTableIterator>,
    heap: BinaryHeap<HeapEntry>,
}

impl MergeIterator {
    /// `tables` must be ordered oldest first
    pub fn new(tables: &[Arc<PTable>]) -> Result<Self> {
        let mut sources = Vec::with_capacity(tables.len());
        let mut heap = BinaryHeap::with_capacity(tables.len());

        for (source, table) in tables.iter().enumerate() {
            let mut iter = table.iter()?;
            if let Some(first) = iter.next() {
                heap.push(HeapEntry {
                    entry: first?,
                    source,
                });
            }
            sources.push(iter);
        }

        Ok(Self { sources, heap })
    }

    /// Next surviving entry, or `None` once every source is exhausted
    pub fn next_entry(&mut self) -> Result<Option<IndexEntry>> {
        let top = match self.heap.pop() {
            Some(top) => top,
            None => return Ok(None),
        };
        self.advance(top.source)?;

        // Older duplicates of the same key are skipped
        while let Some(peek) = self.heap.peek() {
            if peek.key() != top.key() {
                break;
            }
            let source = peek.source;
            self.heap.pop();
            self.advance(source)?;
        }

        Ok(Some(top.entry))
    }

    fn advance(&mut self, source: usize) -> Result<()> {
        if let Some(next) = self.sources[source].next() {
            self.heap.push(HeapEntry {
                entry: next?,
                source,
            });
        }
        Ok(())
    }
}

impl Iterator for MergeIterator {
    type Item = Result<IndexEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

/// Merge `tables` (oldest first) into a new table at `dest_path`.
///
/// Returns `None` when every entry was rejected by `validity`; no file is
/// left behind in that case.
pub fn merge_tables(
    tables: &[Arc<PTable>],
    id: u64,
    dest_path: &Path,
    options: &PTableOptions,
    validity: &dyn EntryValidity,
) -> Result<Option<PTable>> {
    let started = Instant::now();
    let input_entries: u64 = tables.iter().map(|t| t.entry_count()).sum();
    debug!(
        table = id,
        inputs = tables.len(),
        input_entries,
        "merging ptables"
    );

    let mut builder = PTableBuilder::create(id, dest_path, options)?;
    let mut dropped = 0u64;
    let mut merged = MergeIterator::new(tables)?;
    while let Some(entry) = merged.next_entry()? {
        if validity.is_still_valid(&entry) {
            builder.add(&entry)?;
        } else {
            dropped += 1;
        }
    }

    if builder.entry_count() == 0 {
        info!(table = id, inputs = tables.len(), dropped, "merge produced no entries");
        return Ok(None);
    }

    let table = builder.finish()?;
    info!(
        table = id,
        inputs = tables.len(),
        input_entries,
        output_entries = table.entry_count(),
        dropped,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "merge complete"
    );
    Ok(Some(table))
}
