//! Configuration for the event index
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::entry::IndexVersion;
use crate::error::{IndexError, Result};

/// Largest midpoint cache depth accepted (2^28 midpoints per table).
pub const MAX_CACHE_DEPTH: i32 = 28;

/// Main configuration for a TableIndex instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding the manifest and every PTable file
    /// Internal structure:
    ///   {index_dir}/
    ///     ├── indexmap             (manifest)
    ///     └── {id:016x}.ptable     (one per table)
    pub index_dir: PathBuf,

    /// Entry codec used for every PTable this instance writes
    pub index_version: IndexVersion,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Number of entries a MemTable holds before it is drained to a PTable
    pub max_entries_in_memory: usize,

    // -------------------------------------------------------------------------
    // Merge Configuration
    // -------------------------------------------------------------------------
    /// A level is merged into the next one once it holds this many tables
    pub tables_per_level: usize,

    /// Levels at or above this one are only merged by `merge_indexes`
    pub max_auto_merge_level: u32,

    // -------------------------------------------------------------------------
    // PTable Configuration
    // -------------------------------------------------------------------------
    /// Midpoint cache depth: up to 2^depth samples per table
    pub cache_depth: i32,

    /// Open read handles kept per PTable
    pub reader_pool_size: usize,

    /// Verify the footer checksum when a PTable is opened
    pub verify_on_open: bool,

    // -------------------------------------------------------------------------
    // Recovery Configuration
    // -------------------------------------------------------------------------
    /// Rebuilds tolerated during one initialisation before giving up
    pub max_rebuild_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from("./eventindex_data"),
            index_version: IndexVersion::V64,
            max_entries_in_memory: 1_000_000,
            tables_per_level: 4,
            max_auto_merge_level: u32::MAX,
            cache_depth: 16,
            reader_pool_size: 4,
            verify_on_open: true,
            max_rebuild_attempts: 3,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        validate_tables_per_level(self.tables_per_level)?;
        validate_cache_depth(self.cache_depth)?;
        if self.max_entries_in_memory == 0 {
            return Err(IndexError::OutOfRangeConfiguration(
                "max_entries_in_memory must be positive".to_string(),
            ));
        }
        if self.reader_pool_size == 0 {
            return Err(IndexError::OutOfRangeConfiguration(
                "reader_pool_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// A single table per level would cascade forever, so two is the floor.
pub(crate) fn validate_tables_per_level(tables_per_level: usize) -> Result<()> {
    if tables_per_level < 2 {
        return Err(IndexError::OutOfRangeConfiguration(format!(
            "tables_per_level must be at least 2, got {}",
            tables_per_level
        )));
    }
    Ok(())
}

pub(crate) fn validate_cache_depth(cache_depth: i32) -> Result<()> {
    if !(0..=MAX_CACHE_DEPTH).contains(&cache_depth) {
        return Err(IndexError::OutOfRangeConfiguration(format!(
            "cache_depth must be within 0..={}, got {}",
            MAX_CACHE_DEPTH, cache_depth
        )));
    }
    Ok(())
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the index directory
    pub fn index_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.index_dir = path.into();
        self
    }

    /// Set the entry codec for new tables
    pub fn index_version(mut self, version: IndexVersion) -> Self {
        self.config.index_version = version;
        self
    }

    /// Set the MemTable capacity (in entries)
    pub fn max_entries_in_memory(mut self, count: usize) -> Self {
        self.config.max_entries_in_memory = count;
        self
    }

    /// Set the number of tables per level before a merge
    pub fn tables_per_level(mut self, count: usize) -> Self {
        self.config.tables_per_level = count;
        self
    }

    /// Set the highest automatically merged level
    pub fn max_auto_merge_level(mut self, level: u32) -> Self {
        self.config.max_auto_merge_level = level;
        self
    }

    /// Set the midpoint cache depth
    pub fn cache_depth(mut self, depth: i32) -> Self {
        self.config.cache_depth = depth;
        self
    }

    /// Set the number of pooled read handles per PTable
    pub fn reader_pool_size(mut self, size: usize) -> Self {
        self.config.reader_pool_size = size;
        self
    }

    /// Enable or disable checksum verification on open
    pub fn verify_on_open(mut self, verify: bool) -> Self {
        self.config.verify_on_open = verify;
        self
    }

    /// Set how many rebuilds are tolerated before failing hard
    pub fn max_rebuild_attempts(mut self, attempts: u32) -> Self {
        self.config.max_rebuild_attempts = attempts;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
