//! Tests for IndexMap
//!
//! These tests verify:
//! - Full levels merge into the next level, cascading
//! - Read order is newest table first
//! - Manifest save/load round trip and the checkpoint
//! - Missing tables surface as corruption with a rebuild counter
//! - The auto-merge ceiling and manual merges

use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use eventindex::memtable::MemTable;
use eventindex::replay::AlwaysValid;
use eventindex::storage::{table_file_name, IndexMap, PTable, PTableOptions};
use eventindex::{Config, IndexEntry, IndexError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config(dir: &Path, tables_per_level: usize) -> Config {
    Config::builder()
        .index_dir(dir)
        .tables_per_level(tables_per_level)
        .build()
}

fn single_entry_table(dir: &Path, id: u64, hash: u64, position: i64) -> Arc<PTable> {
    let memtable = Arc::new(MemTable::new(id, 1));
    memtable.add(IndexEntry::new(hash, 0, position)).unwrap();
    let path = dir.join(table_file_name(id));
    Arc::new(PTable::from_memtable(memtable.mark_draining().unwrap(), &path, &PTableOptions::default()).unwrap())
}

/// Add a table, then merge until nothing is full, like the background worker
fn add_and_settle(map: IndexMap, table: Arc<PTable>, position: i64, next_id: &AtomicU64) -> IndexMap {
    let mut map = map.add_table(table, position).map;
    loop {
        let result = map
            .try_merge_one_level(&PTableOptions::default(), next_id, &AlwaysValid)
            .unwrap();
        if !result.merged_any {
            return map;
        }
        for table in &result.to_delete {
            table.mark_for_destruction();
        }
        map = result.map;
    }
}

fn level_sizes(map: &IndexMap) -> Vec<usize> {
    map.levels().iter().map(Vec::len).collect()
}

// =============================================================================
// Merge Policy Tests
// =============================================================================

#[test]
fn test_four_tables_merge_into_one_level_one_table() {
    let temp = TempDir::new().unwrap();
    let mut map = IndexMap::create_empty(temp.path(), 4, u32::MAX).unwrap();

    for i in 0..4u64 {
        let result = map.add_table(single_entry_table(temp.path(), i + 1, 0x10 * (i + 1), i as i64), i as i64);
        assert_eq!(result.can_merge, i == 3);
        map = result.map;
    }
    assert_eq!(level_sizes(&map), vec![4]);

    let next_id = AtomicU64::new(100);
    let result = map
        .try_merge_one_level(&PTableOptions::default(), &next_id, &AlwaysValid)
        .unwrap();
    assert!(result.merged_any);
    assert!(!result.can_merge_more);
    assert_eq!(result.to_delete.len(), 4);

    let merged = result.map;
    assert_eq!(level_sizes(&merged), vec![0, 1]);
    let table = &merged.levels()[1][0];
    assert_eq!(table.id(), 100);
    assert_eq!(table.entry_count(), 4);
    for i in 0..4u64 {
        assert_eq!(table.try_get_one_value(0x10 * (i + 1), 0).unwrap(), Some(i as i64));
    }
}

#[test]
fn test_merge_without_full_level_is_noop() {
    let temp = TempDir::new().unwrap();
    let map = IndexMap::create_empty(temp.path(), 4, u32::MAX).unwrap();
    let map = map.add_table(single_entry_table(temp.path(), 1, 1, 0), 0).map;

    let result = map
        .try_merge_one_level(&PTableOptions::default(), &AtomicU64::new(10), &AlwaysValid)
        .unwrap();
    assert!(!result.merged_any);
    assert!(result.to_delete.is_empty());
    assert_eq!(level_sizes(&result.map), vec![1]);
}

#[test]
fn test_levels_stay_bounded_while_cascading() {
    let temp = TempDir::new().unwrap();
    let next_id = AtomicU64::new(1_000);
    let mut map = IndexMap::create_empty(temp.path(), 2, u32::MAX).unwrap();

    for i in 0..16u64 {
        let table = single_entry_table(temp.path(), i + 1, i + 1, i as i64);
        map = add_and_settle(map, table, i as i64, &next_id);
        assert!(map.levels().iter().all(|level| level.len() < 2), "{:?}", level_sizes(&map));
    }

    // 16 tables with two per level collapse into a single level-4 table
    assert_eq!(map.table_count(), 1);
    assert_eq!(map.levels().len(), 5);
    assert_eq!(map.levels()[4][0].entry_count(), 16);
    assert_eq!(map.valid_through(), 15);
}

#[test]
fn test_in_order_is_newest_first() {
    let temp = TempDir::new().unwrap();
    let next_id = AtomicU64::new(1_000);
    let mut map = IndexMap::create_empty(temp.path(), 3, u32::MAX).unwrap();

    // Three tables merge into one level-1 table; two more stay at level 0
    for i in 0..5u64 {
        map = add_and_settle(map, single_entry_table(temp.path(), i + 1, i + 1, i as i64), i as i64, &next_id);
    }

    let ids: Vec<u64> = map.in_order().map(|t| t.id()).collect();
    assert_eq!(ids, vec![5, 4, 1_000]);
    let reversed: Vec<u64> = map.in_reverse_order().map(|t| t.id()).collect();
    assert_eq!(reversed, vec![1_000, 4, 5]);
}

#[test]
fn test_superseded_files_removed_once_released() {
    let temp = TempDir::new().unwrap();
    let next_id = AtomicU64::new(50);
    let mut map = IndexMap::create_empty(temp.path(), 2, u32::MAX).unwrap();

    map = add_and_settle(map, single_entry_table(temp.path(), 1, 1, 0), 0, &next_id);
    map = add_and_settle(map, single_entry_table(temp.path(), 2, 2, 1), 1, &next_id);

    assert!(!temp.path().join(table_file_name(1)).exists());
    assert!(!temp.path().join(table_file_name(2)).exists());
    assert!(temp.path().join(table_file_name(50)).exists());
    assert_eq!(map.file_names(), vec![table_file_name(50)]);
}

#[test]
fn test_checkpoint_only_moves_forward() {
    let temp = TempDir::new().unwrap();
    let map = IndexMap::create_empty(temp.path(), 4, u32::MAX).unwrap();
    assert_eq!(map.valid_through(), -1);

    let map = map.add_table(single_entry_table(temp.path(), 1, 1, 500), 500).map;
    let map = map.add_table(single_entry_table(temp.path(), 2, 2, 100), 100).map;
    assert_eq!(map.valid_through(), 500);
}

#[test]
fn test_rejects_single_table_levels() {
    let temp = TempDir::new().unwrap();
    let result = IndexMap::create_empty(temp.path(), 1, u32::MAX);
    assert!(matches!(result, Err(IndexError::OutOfRangeConfiguration(_))));
}

// =============================================================================
// Auto-merge Ceiling Tests
// =============================================================================

#[test]
fn test_auto_merge_ceiling_and_manual_merge() {
    let temp = TempDir::new().unwrap();
    let next_id = AtomicU64::new(900);
    let mut map = IndexMap::create_empty(temp.path(), 2, 1).unwrap();

    // Level 0 merges into level 1; level 1 is never merged automatically
    for i in 0..6u64 {
        map = add_and_settle(map, single_entry_table(temp.path(), i + 1, i + 1, i as i64), i as i64, &next_id);
    }
    assert_eq!(level_sizes(&map), vec![0, 3]);
    assert!(!map.can_merge());

    let result = map
        .try_manual_merge(&PTableOptions::default(), &next_id, &AlwaysValid)
        .unwrap();
    assert!(result.merged_any);
    assert_eq!(result.to_delete.len(), 3);
    assert_eq!(level_sizes(&result.map), vec![0, 1]);
    assert_eq!(result.map.levels()[1][0].entry_count(), 6);
}

#[test]
fn test_manual_merge_needs_two_tables() {
    let temp = TempDir::new().unwrap();
    let map = IndexMap::create_empty(temp.path(), 2, 0).unwrap();
    let map = map.add_table(single_entry_table(temp.path(), 1, 1, 0), 0).map;

    let result = map
        .try_manual_merge(&PTableOptions::default(), &AtomicU64::new(10), &AlwaysValid)
        .unwrap();
    assert!(!result.merged_any);
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_save_and_load() {
    let temp = TempDir::new().unwrap();
    let next_id = AtomicU64::new(1_000);
    let mut map = IndexMap::create_empty(temp.path(), 3, u32::MAX).unwrap();
    for i in 0..5u64 {
        map = add_and_settle(map, single_entry_table(temp.path(), i + 1, i + 1, i as i64 * 10), i as i64 * 10, &next_id);
    }
    map.save().unwrap();
    let before: Vec<u64> = map.in_order().map(|t| t.id()).collect();
    drop(map);

    let loaded = IndexMap::load(&config(temp.path(), 3), 0).unwrap();
    let after: Vec<u64> = loaded.in_order().map(|t| t.id()).collect();
    assert_eq!(after, before);
    assert_eq!(loaded.valid_through(), 40);
    assert_eq!(level_sizes(&loaded), vec![2, 1]);
    assert_eq!(loaded.max_table_id(), 1_000);
}

#[test]
fn test_load_without_manifest_is_empty() {
    let temp = TempDir::new().unwrap();
    let map = IndexMap::load(&config(temp.path(), 4), 0).unwrap();
    assert_eq!(map.table_count(), 0);
    assert_eq!(map.valid_through(), -1);
}

#[test]
fn test_load_with_missing_table() {
    let temp = TempDir::new().unwrap();
    let map = IndexMap::create_empty(temp.path(), 4, u32::MAX).unwrap();
    let map = map.add_table(single_entry_table(temp.path(), 1, 1, 0), 0).map;
    map.save().unwrap();
    drop(map);

    std::fs::remove_file(temp.path().join(table_file_name(1))).unwrap();

    let err = IndexMap::load(&config(temp.path(), 4), 0).unwrap_err();
    assert!(matches!(err, IndexError::ManifestFileMissing { rebuild_attempts: 1, .. }));

    let err = IndexMap::load(&config(temp.path(), 4), err.rebuild_attempts()).unwrap_err();
    assert_eq!(err.rebuild_attempts(), 2);
}

#[test]
fn test_load_with_corrupt_manifest() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("indexmap"), b"not a manifest").unwrap();

    let err = IndexMap::load(&config(temp.path(), 4), 0).unwrap_err();
    assert!(matches!(err, IndexError::CorruptedManifest { rebuild_attempts: 1, .. }));
}
