//! Tests for merging PTables
//!
//! These tests verify:
//! - Disjoint inputs merge into their sorted union
//! - Overlapping keys keep the entry of the newest input
//! - The validity predicate drops entries
//! - A merge that drops everything writes no table

use std::path::Path;
use std::sync::Arc;

use eventindex::memtable::MemTable;
use eventindex::replay::AlwaysValid;
use eventindex::storage::{merge_tables, table_file_name, MergeIterator, PTable, PTableOptions};
use eventindex::{IndexEntry, IndexVersion};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn build_table(dir: &Path, id: u64, entries: &[(u64, i64, i64)]) -> Arc<PTable> {
    let memtable = Arc::new(MemTable::new(id, entries.len().max(1)));
    for &(hash, event, position) in entries {
        memtable.add(IndexEntry::new(hash, event, position)).unwrap();
    }
    let path = dir.join(table_file_name(id));
    let table = PTable::from_memtable(memtable.mark_draining().unwrap(), &path, &PTableOptions::default()).unwrap();
    Arc::new(table)
}

fn read_all(table: &PTable) -> Vec<(u64, i64, i64)> {
    table
        .iter()
        .unwrap()
        .map(|e| {
            let e = e.unwrap();
            (e.hash, e.event_number, e.position)
        })
        .collect()
}

// =============================================================================
// Merge Iterator Tests
// =============================================================================

#[test]
fn test_merge_iterator_disjoint_union() {
    let temp = TempDir::new().unwrap();
    let a = build_table(temp.path(), 1, &[(1, 0, 10), (3, 0, 30)]);
    let b = build_table(temp.path(), 2, &[(2, 0, 20), (4, 0, 40)]);

    let merged: Vec<IndexEntry> = MergeIterator::new(&[a, b]).unwrap().map(|e| e.unwrap()).collect();
    let hashes: Vec<u64> = merged.iter().map(|e| e.hash).collect();
    assert_eq!(hashes, vec![1, 2, 3, 4]);
}

#[test]
fn test_merge_iterator_newest_source_wins() {
    let temp = TempDir::new().unwrap();
    let oldest = build_table(temp.path(), 1, &[(1, 0, 100), (1, 1, 101)]);
    let middle = build_table(temp.path(), 2, &[(1, 0, 200)]);
    let newest = build_table(temp.path(), 3, &[(1, 0, 300), (2, 5, 305)]);

    let merged: Vec<IndexEntry> = MergeIterator::new(&[oldest, middle, newest])
        .unwrap()
        .map(|e| e.unwrap())
        .collect();
    assert_eq!(
        merged,
        vec![
            IndexEntry::new(1, 1, 101),
            IndexEntry::new(1, 0, 300),
            IndexEntry::new(2, 5, 305),
        ]
    );
}

// =============================================================================
// merge_tables Tests
// =============================================================================

#[test]
fn test_merge_tables_disjoint() {
    let temp = TempDir::new().unwrap();
    let a = build_table(temp.path(), 1, &[(0x10, 0, 1), (0x10, 1, 2), (0x30, 0, 3)]);
    let b = build_table(temp.path(), 2, &[(0x20, 0, 4), (0x40, 7, 5)]);

    let dest = temp.path().join(table_file_name(3));
    let merged = merge_tables(&[a, b], 3, &dest, &PTableOptions::default(), &AlwaysValid)
        .unwrap()
        .unwrap();

    assert_eq!(merged.entry_count(), 5);
    assert_eq!(
        read_all(&merged),
        vec![(0x10, 1, 2), (0x10, 0, 1), (0x20, 0, 4), (0x30, 0, 3), (0x40, 7, 5)]
    );

    // The merged file reopens cleanly
    let reopened = PTable::open(&dest, &PTableOptions::default()).unwrap();
    assert_eq!(read_all(&reopened), read_all(&merged));
}

#[test]
fn test_merge_tables_overlap_keeps_newest() {
    let temp = TempDir::new().unwrap();
    let old = build_table(temp.path(), 1, &[(0x10, 0, 1), (0x10, 1, 2)]);
    let new = build_table(temp.path(), 2, &[(0x10, 1, 99)]);

    let dest = temp.path().join(table_file_name(3));
    let merged = merge_tables(&[old, new], 3, &dest, &PTableOptions::default(), &AlwaysValid)
        .unwrap()
        .unwrap();

    assert_eq!(read_all(&merged), vec![(0x10, 1, 99), (0x10, 0, 1)]);
    assert_eq!(merged.try_get_one_value(0x10, 1).unwrap(), Some(99));
}

#[test]
fn test_merge_tables_applies_validity() {
    let temp = TempDir::new().unwrap();
    let a = build_table(temp.path(), 1, &[(1, 0, 10), (1, 1, 15), (2, 0, 20)]);
    let b = build_table(temp.path(), 2, &[(3, 0, 30)]);

    // Drop everything before position 16
    let scavenged = |e: &IndexEntry| e.position >= 16;
    let dest = temp.path().join(table_file_name(3));
    let merged = merge_tables(&[a, b], 3, &dest, &PTableOptions::default(), &scavenged)
        .unwrap()
        .unwrap();

    assert_eq!(read_all(&merged), vec![(2, 0, 20), (3, 0, 30)]);
}

#[test]
fn test_validity_sees_only_the_surviving_duplicate() {
    let temp = TempDir::new().unwrap();
    let old = build_table(temp.path(), 1, &[(1, 0, 10)]);
    let new = build_table(temp.path(), 2, &[(1, 0, 50)]);

    // Rejecting the newest copy must not resurrect the older one
    let reject_new = |e: &IndexEntry| e.position != 50;
    let dest = temp.path().join(table_file_name(3));
    let merged = merge_tables(&[old, new], 3, &dest, &PTableOptions::default(), &reject_new).unwrap();

    assert!(merged.is_none());
}

#[test]
fn test_merge_dropping_everything_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let a = build_table(temp.path(), 1, &[(1, 0, 10)]);
    let b = build_table(temp.path(), 2, &[(2, 0, 20)]);

    let dest = temp.path().join(table_file_name(3));
    let merged = merge_tables(&[a, b], 3, &dest, &PTableOptions::default(), &|_: &IndexEntry| false).unwrap();

    assert!(merged.is_none());
    assert!(!dest.exists());
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 2);
}

#[test]
fn test_merge_rewrites_to_configured_width() {
    let temp = TempDir::new().unwrap();
    let a = build_table(temp.path(), 1, &[(1, 0, 10)]);
    let b = build_table(temp.path(), 2, &[(2, 0, 20)]);

    let options = PTableOptions {
        version: IndexVersion::V32,
        ..PTableOptions::default()
    };
    let dest = temp.path().join(table_file_name(3));
    let merged = merge_tables(&[a, b], 3, &dest, &options, &AlwaysValid).unwrap().unwrap();

    assert_eq!(merged.version(), IndexVersion::V32);
    assert_eq!(read_all(&merged), vec![(1, 0, 10), (2, 0, 20)]);
}
