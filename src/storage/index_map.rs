//! IndexMap
//!
//! The leveled set of PTables plus the merge policy over it.
//!
//! ## Responsibilities
//! - Track which tables live at which level, oldest to newest
//! - Decide when a level is full and merge it into the next one
//! - Persist the layout and the covered log position as the manifest
//! - Reopen every referenced table on startup
//!
//! ## Copy-on-write
//! An `IndexMap` is never mutated. `add_table` and the merge operations
//! return a new map sharing the untouched `Arc<PTable>` handles, so readers
//! holding the previous generation keep a consistent view.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{validate_tables_per_level, Config};
use crate::error::{IndexError, Result};
use crate::replay::EntryValidity;

use super::manifest::{self, ManifestRecord, TableRecord};
use super::merge::merge_tables;
use super::ptable::{table_file_name, PTable, PTableOptions};

/// Outcome of `IndexMap::add_table`
pub struct AddResult {
    pub map: IndexMap,
    /// Some level now holds enough tables for an automatic merge
    pub can_merge: bool,
}

/// Outcome of a merge step
pub struct MergeResult {
    pub map: IndexMap,
    /// Superseded inputs; mark them for destruction once `map` is published
    pub to_delete: Vec<Arc<PTable>>,
    pub merged_any: bool,
    /// Another automatic merge is possible on `map`
    pub can_merge_more: bool,
}

#[derive(Clone)]
pub struct IndexMap {
    dir: PathBuf,
    /// `levels[L][p]`: position 0 is the oldest table of the level
    levels: Vec<Vec<Arc<PTable>>>,
    valid_through: i64,
    tables_per_level: usize,
    max_auto_merge_level: u32,
}

impl IndexMap {
    /// A map without tables, covering nothing
    pub fn create_empty(dir: &Path, tables_per_level: usize, max_auto_merge_level: u32) -> Result<Self> {
        validate_tables_per_level(tables_per_level)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            levels: Vec::new(),
            valid_through: -1,
            tables_per_level,
            max_auto_merge_level,
        })
    }

    /// Load the manifest in `config.index_dir` and open every table it lists.
    ///
    /// A directory without a manifest yields an empty map. Corruption errors
    /// carry `prior_attempts + 1`.
    pub fn load(config: &Config, prior_attempts: u32) -> Result<Self> {
        validate_tables_per_level(config.tables_per_level)?;
        let dir = &config.index_dir;
        let attempt = prior_attempts.saturating_add(1);

        let record = match manifest::load(dir).map_err(|e| e.with_rebuild_attempts(attempt))? {
            Some(record) => record,
            None => {
                debug!(dir = ?dir, "no manifest, starting with an empty index map");
                return Self::create_empty(dir, config.tables_per_level, config.max_auto_merge_level);
            }
        };

        let options = PTableOptions::from(config);
        let mut slots = record.tables.clone();
        slots.sort_by_key(|t| (t.level, t.position));

        let mut levels: Vec<Vec<Arc<PTable>>> = Vec::new();
        for slot in &slots {
            let path = dir.join(&slot.file_name);
            let table = PTable::open_with_attempts(&path, &options, prior_attempts)?;
            check_slot(slot, &table, &manifest::manifest_path(dir), attempt)?;

            let level = slot.level as usize;
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(Arc::new(table));
        }

        let map = Self {
            dir: dir.to_path_buf(),
            levels,
            valid_through: record.valid_through,
            tables_per_level: config.tables_per_level,
            // The configured value wins over the persisted one
            max_auto_merge_level: config.max_auto_merge_level,
        };
        info!(
            tables = map.table_count(),
            levels = map.levels.len(),
            valid_through = map.valid_through,
            "index map loaded"
        );
        Ok(map)
    }

    /// Persist this map as the current manifest
    pub fn save(&self) -> Result<()> {
        let mut tables = Vec::with_capacity(self.table_count());
        for (level, level_tables) in self.levels.iter().enumerate() {
            for (position, table) in level_tables.iter().enumerate() {
                tables.push(TableRecord {
                    id: table.id(),
                    level: level as u32,
                    position: position as u32,
                    version: table.version().as_u8(),
                    entry_count: table.entry_count() as i64,
                    min_key: table.min_key(),
                    max_key: table.max_key(),
                    file_name: file_name_of(table),
                });
            }
        }
        let record = ManifestRecord::new(self.valid_through, self.max_auto_merge_level, tables);
        manifest::save(&self.dir, &record)
    }

    // =========================================================================
    // Mutation (copy-on-write)
    // =========================================================================

    /// Register a freshly written table as the newest table of level 0 and
    /// advance the covered log position to `valid_through`.
    pub fn add_table(&self, table: Arc<PTable>, valid_through: i64) -> AddResult {
        let mut map = self.clone();
        if map.levels.is_empty() {
            map.levels.push(Vec::new());
        }
        debug!(table = table.id(), entries = table.entry_count(), "adding ptable at level 0");
        map.levels[0].push(table);
        map.valid_through = map.valid_through.max(valid_through);

        let can_merge = map.can_merge();
        AddResult { map, can_merge }
    }

    /// Merge the lowest full level below `max_auto_merge_level` into the
    /// next one. Does nothing when no level is full.
    pub fn try_merge_one_level(
        &self,
        options: &PTableOptions,
        next_id: &AtomicU64,
        validity: &dyn EntryValidity,
    ) -> Result<MergeResult> {
        let level = match self.first_mergeable_level() {
            Some(level) => level,
            None => return Ok(self.unchanged()),
        };

        let inputs = self.levels[level].clone();
        info!(
            level,
            tables = inputs.len(),
            target_level = level + 1,
            "merging level"
        );

        let id = next_id.fetch_add(1, Ordering::SeqCst);
        let output = merge_tables(&inputs, id, &self.dir.join(table_file_name(id)), options, validity)?;

        let mut map = self.clone();
        map.levels[level].clear();
        if let Some(table) = output {
            if map.levels.len() <= level + 1 {
                map.levels.resize_with(level + 2, Vec::new);
            }
            map.levels[level + 1].push(Arc::new(table));
        }
        map.trim_empty_levels();

        let can_merge_more = map.can_merge();
        Ok(MergeResult {
            map,
            to_delete: inputs,
            merged_any: true,
            can_merge_more,
        })
    }

    /// Merge every table at or above `max_auto_merge_level` into a single
    /// table at that level. Needs at least two such tables.
    pub fn try_manual_merge(
        &self,
        options: &PTableOptions,
        next_id: &AtomicU64,
        validity: &dyn EntryValidity,
    ) -> Result<MergeResult> {
        let floor = self.max_auto_merge_level as usize;
        if floor >= self.levels.len() {
            return Ok(self.unchanged());
        }

        // Oldest first: highest level first, then by position
        let inputs: Vec<Arc<PTable>> = self.levels[floor..]
            .iter()
            .rev()
            .flat_map(|level| level.iter().cloned())
            .collect();
        if inputs.len() < 2 {
            return Ok(self.unchanged());
        }

        info!(level = floor, tables = inputs.len(), "manual merge");
        let id = next_id.fetch_add(1, Ordering::SeqCst);
        let output = merge_tables(&inputs, id, &self.dir.join(table_file_name(id)), options, validity)?;

        let mut map = self.clone();
        map.levels.truncate(floor);
        map.levels.resize_with(floor + 1, Vec::new);
        if let Some(table) = output {
            map.levels[floor].push(Arc::new(table));
        }
        map.trim_empty_levels();

        let can_merge_more = map.can_merge();
        Ok(MergeResult {
            map,
            to_delete: inputs,
            merged_any: true,
            can_merge_more,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// True when some level below `max_auto_merge_level` is full
    pub fn can_merge(&self) -> bool {
        self.first_mergeable_level().is_some()
    }

    /// Tables newest first: level 0 from its last table back, then level 1, ...
    pub fn in_order(&self) -> impl Iterator<Item = &Arc<PTable>> {
        self.levels.iter().flat_map(|level| level.iter().rev())
    }

    /// Tables oldest first
    pub fn in_reverse_order(&self) -> impl Iterator<Item = &Arc<PTable>> {
        self.levels.iter().rev().flat_map(|level| level.iter())
    }

    pub fn levels(&self) -> &[Vec<Arc<PTable>>] {
        &self.levels
    }

    pub fn table_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Highest log position whose entries are all in the tables; -1 if none
    pub fn valid_through(&self) -> i64 {
        self.valid_through
    }

    pub fn tables_per_level(&self) -> usize {
        self.tables_per_level
    }

    pub fn max_auto_merge_level(&self) -> u32 {
        self.max_auto_merge_level
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File names of every referenced table
    pub fn file_names(&self) -> Vec<String> {
        self.in_order().map(|t| file_name_of(t)).collect()
    }

    /// Largest table id in use, 0 when empty
    pub fn max_table_id(&self) -> u64 {
        self.in_order().map(|t| t.id()).max().unwrap_or(0)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn first_mergeable_level(&self) -> Option<usize> {
        self.levels
            .iter()
            .enumerate()
            .take_while(|(level, _)| (*level as u64) < self.max_auto_merge_level as u64)
            .find(|(_, tables)| tables.len() >= self.tables_per_level)
            .map(|(level, _)| level)
    }

    fn unchanged(&self) -> MergeResult {
        MergeResult {
            map: self.clone(),
            to_delete: Vec::new(),
            merged_any: false,
            can_merge_more: false,
        }
    }

    fn trim_empty_levels(&mut self) {
        while matches!(self.levels.last(), Some(level) if level.is_empty()) {
            self.levels.pop();
        }
    }
}

impl fmt::Debug for IndexMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape: Vec<usize> = self.levels.iter().map(Vec::len).collect();
        f.debug_struct("IndexMap")
            .field("dir", &self.dir)
            .field("levels", &shape)
            .field("valid_through", &self.valid_through)
            .field("tables_per_level", &self.tables_per_level)
            .finish()
    }
}

fn file_name_of(table: &PTable) -> String {
    table
        .path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| table_file_name(table.id()))
}

/// The manifest's view of a table must agree with the file itself
fn check_slot(slot: &TableRecord, table: &PTable, manifest_path: &Path, attempt: u32) -> Result<()> {
    let mismatch = |what: &str| {
        warn!(table = slot.id, file = %slot.file_name, what, "manifest disagrees with ptable");
        Err(IndexError::CorruptedManifest {
            path: manifest_path.to_path_buf(),
            reason: format!("{} of {} does not match the file", what, slot.file_name),
            rebuild_attempts: attempt,
        })
    };

    if slot.version != table.version().as_u8() {
        return mismatch("index version");
    }
    if slot.entry_count != table.entry_count() as i64 {
        return mismatch("entry count");
    }
    if slot.min_key != table.min_key() || slot.max_key != table.max_key() {
        return mismatch("key range");
    }
    Ok(())
}
