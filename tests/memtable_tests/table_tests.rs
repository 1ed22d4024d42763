//! MemTable Tests
//!
//! Tests verify:
//! - Adding and looking up entries
//! - Capacity and state rules
//! - Range, latest and oldest queries follow the index order
//! - Draining yields exactly one snapshot
//! - Concurrent readers alongside a writer

use std::sync::Arc;

use eventindex::memtable::{MemTable, MemTableState};
use eventindex::{IndexEntry, IndexError};

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_new_memtable_is_empty() {
    let memtable = MemTable::new(1, 10);
    assert!(memtable.is_empty());
    assert_eq!(memtable.len(), 0);
    assert_eq!(memtable.state(), MemTableState::Writable);
    assert_eq!(memtable.max_position(), -1);
    assert_eq!(memtable.min_position(), None);
}

#[test]
fn test_add_and_get() {
    let memtable = MemTable::new(1, 10);
    memtable.add(IndexEntry::new(0x10, 0, 100)).unwrap();

    assert_eq!(memtable.try_get_one_value(0x10, 0), Some(100));
    assert_eq!(memtable.try_get_one_value(0x10, 1), None);
    assert_eq!(memtable.try_get_one_value(0x11, 0), None);
}

#[test]
fn test_add_same_key_overwrites() {
    let memtable = MemTable::new(1, 10);
    memtable.add(IndexEntry::new(0x10, 0, 100)).unwrap();
    let len = memtable.add(IndexEntry::new(0x10, 0, 200)).unwrap();

    assert_eq!(len, 1);
    assert_eq!(memtable.try_get_one_value(0x10, 0), Some(200));
}

#[test]
fn test_add_tracks_position_bounds() {
    let memtable = MemTable::new(1, 10);
    memtable.add(IndexEntry::new(1, 0, 300)).unwrap();
    memtable.add(IndexEntry::new(2, 0, 100)).unwrap();
    assert_eq!(memtable.max_position(), 300);
    assert_eq!(memtable.min_position(), Some(100));
}

#[test]
fn test_add_rejects_negative_values() {
    let memtable = MemTable::new(1, 10);
    assert!(matches!(
        memtable.add(IndexEntry::new(1, -1, 0)),
        Err(IndexError::InvalidEntry(_))
    ));
    assert!(matches!(
        memtable.add(IndexEntry::new(1, 0, -5)),
        Err(IndexError::InvalidEntry(_))
    ));
    assert!(memtable.is_empty());
}

// =============================================================================
// Capacity Tests
// =============================================================================

#[test]
fn test_full_table_rejects_new_keys() {
    let memtable = MemTable::new(1, 2);
    memtable.add(IndexEntry::new(1, 0, 0)).unwrap();
    memtable.add(IndexEntry::new(1, 1, 1)).unwrap();
    assert!(memtable.is_full());

    let result = memtable.add(IndexEntry::new(1, 2, 2));
    assert!(matches!(result, Err(IndexError::InvalidState(_))));

    // Overwriting an existing key is still fine
    memtable.add(IndexEntry::new(1, 1, 5)).unwrap();
    assert_eq!(memtable.try_get_one_value(1, 1), Some(5));
}

// =============================================================================
// Query Tests
// =============================================================================

fn stream_table() -> MemTable {
    let memtable = MemTable::new(1, 100);
    for event in 0..10 {
        memtable.add(IndexEntry::new(0xaa, event, 1_000 + event)).unwrap();
    }
    memtable.add(IndexEntry::new(0xa9, 0, 1)).unwrap();
    memtable.add(IndexEntry::new(0xab, 0, 2)).unwrap();
    memtable
}

#[test]
fn test_get_range_is_newest_first() {
    let memtable = stream_table();
    let range = memtable.get_range(0xaa, 3, 6);

    let events: Vec<i64> = range.iter().map(|e| e.event_number).collect();
    assert_eq!(events, vec![6, 5, 4, 3]);
    assert!(range.iter().all(|e| e.hash == 0xaa));
    assert_eq!(range[0].position, 1_006);
}

#[test]
fn test_get_range_empty_cases() {
    let memtable = stream_table();
    assert!(memtable.get_range(0xaa, 6, 3).is_empty());
    assert!(memtable.get_range(0xaa, -5, -1).is_empty());
    assert!(memtable.get_range(0xac, 0, 100).is_empty());
}

#[test]
fn test_get_range_is_restartable() {
    let memtable = stream_table();
    assert_eq!(memtable.get_range(0xaa, 0, 9), memtable.get_range(0xaa, 0, 9));
}

#[test]
fn test_latest_and_oldest() {
    let memtable = stream_table();
    assert_eq!(memtable.try_get_latest_entry(0xaa), Some(IndexEntry::new(0xaa, 9, 1_009)));
    assert_eq!(memtable.try_get_oldest_entry(0xaa), Some(IndexEntry::new(0xaa, 0, 1_000)));
    assert_eq!(memtable.try_get_latest_entry(0xac), None);
    assert_eq!(memtable.try_get_oldest_entry(0xac), None);
}

#[test]
fn test_entries_are_in_index_order() {
    let memtable = stream_table();
    let entries = memtable.entries();
    assert_eq!(entries.len(), 12);
    assert!(entries.windows(2).all(|w| w[0].key() < w[1].key()));
    assert_eq!(entries.first().unwrap().hash, 0xa9);
    assert_eq!(entries[1], IndexEntry::new(0xaa, 9, 1_009));
}

// =============================================================================
// Drain Tests
// =============================================================================

#[test]
fn test_mark_draining_once() {
    let memtable = Arc::new(stream_table());
    let snapshot = memtable.mark_draining().unwrap();

    assert_eq!(memtable.state(), MemTableState::Draining);
    assert_eq!(snapshot.len(), 12);
    assert_eq!(snapshot.id(), 1);
    assert!(matches!(memtable.mark_draining(), Err(IndexError::InvalidState(_))));
}

#[test]
fn test_draining_table_rejects_writes_but_answers_reads() {
    let memtable = Arc::new(stream_table());
    let snapshot = memtable.mark_draining().unwrap();

    let result = memtable.add(IndexEntry::new(0xaa, 10, 2_000));
    assert!(matches!(result, Err(IndexError::InvalidState(_))));
    assert_eq!(memtable.try_get_one_value(0xaa, 9), Some(1_009));

    let entries = snapshot.into_entries();
    assert_eq!(entries.len(), 12);

    memtable.mark_drained();
    assert_eq!(memtable.state(), MemTableState::Drained);
}

// =============================================================================
// Concurrent Access Tests (Basic)
// =============================================================================

#[test]
fn test_concurrent_readers_with_writer() {
    use std::thread;

    let memtable = Arc::new(MemTable::new(1, 10_000));
    for event in 0..100 {
        memtable.add(IndexEntry::new(1, event, event * 10)).unwrap();
    }

    let writer = {
        let memtable = Arc::clone(&memtable);
        thread::spawn(move || {
            for event in 100..1_000 {
                memtable.add(IndexEntry::new(1, event, event * 10)).unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let memtable = Arc::clone(&memtable);
            thread::spawn(move || {
                for _ in 0..100 {
                    for event in 0..100 {
                        assert_eq!(memtable.try_get_one_value(1, event), Some(event * 10));
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(memtable.len(), 1_000);
}
