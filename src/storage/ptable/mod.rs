//! PTable Module
//!
//! Persistent table - immutable on-disk sorted segment of index entries.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (10 bytes)                                            │
//! │   FormatVersion: u8 | IndexVersion: u8 (32|64) | Count: i64  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Entries (Count * 20|24 bytes, index order)                   │
//! │   [Hash: u32|u64][EventNumber: i64][Position: i64]           │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Midpoints                                                    │
//! │   MidpointCount: u32                                         │
//! │   [Hash: u32|u64][EventNumber: i64][ItemIndex: u64] * Count  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Footer (4 bytes)                                             │
//! │   CRC32 over everything above                                │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Tables are written to a `.tmp` sibling, fsynced and renamed into place,
//! so a reader never sees a half-written table.

mod builder;
mod iterator;
mod midpoints;
mod reader;

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::queue::ArrayQueue;
use tracing::{debug, warn};

use crate::config::Config;
use crate::entry::{EntryCodec, IndexKey, IndexVersion};

pub use builder::PTableBuilder;
pub use iterator::PTableIterator;
pub use midpoints::{Midpoint, MidpointCache};

// =============================================================================
// Shared Constants (used by builder, reader, iterator)
// =============================================================================

/// Current PTable format version
pub(crate) const FORMAT_VERSION: u8 = 1;

/// Header size: FormatVersion (1) + IndexVersion (1) + EntryCount (8) = 10 bytes
pub const HEADER_SIZE: u64 = 10;

/// Midpoint count prefix of the midpoint section
pub(crate) const MIDPOINT_COUNT_SIZE: u64 = 4;

/// Footer size: CRC32 (4)
pub const FOOTER_SIZE: u64 = 4;

/// File extension of table files
pub const PTABLE_EXTENSION: &str = "ptable";

// =============================================================================
// Options
// =============================================================================

/// Settings used when building or opening a table
#[derive(Debug, Clone)]
pub struct PTableOptions {
    /// Codec for newly written tables; opened tables use their header's
    pub version: IndexVersion,
    /// Midpoint cache depth for newly written tables
    pub cache_depth: i32,
    /// Pooled read handles
    pub reader_pool_size: usize,
    /// Verify the footer checksum on open
    pub verify_on_open: bool,
}

impl Default for PTableOptions {
    fn default() -> Self {
        Self {
            version: IndexVersion::V64,
            cache_depth: 16,
            reader_pool_size: 4,
            verify_on_open: true,
        }
    }
}

impl From<&Config> for PTableOptions {
    fn from(config: &Config) -> Self {
        Self {
            version: config.index_version,
            cache_depth: config.cache_depth,
            reader_pool_size: config.reader_pool_size,
            verify_on_open: config.verify_on_open,
        }
    }
}

// =============================================================================
// PTable
// =============================================================================

/// An open, immutable table.
///
/// Shared as `Arc<PTable>`: cloning the Arc acquires the table, dropping it
/// releases. Once a merge supersedes the table it is marked for destruction
/// and the file is removed when the last holder lets go.
pub struct PTable {
    id: u64,
    path: PathBuf,
    version: IndexVersion,
    entry_count: u64,
    file_size: u64,
    midpoints: MidpointCache,
    /// Idle read handles
    readers: ArrayQueue<File>,
    destroy_on_drop: AtomicBool,
}

impl PTable {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> IndexVersion {
        self.version
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Smallest key in index order (the newest event of the lowest hash)
    pub fn min_key(&self) -> Option<IndexKey> {
        self.midpoints.first_key()
    }

    /// Largest key in index order (the oldest event of the highest hash)
    pub fn max_key(&self) -> Option<IndexKey> {
        self.midpoints.last_key()
    }

    pub fn midpoints(&self) -> &MidpointCache {
        &self.midpoints
    }

    /// Schedule the file for removal once every holder has released it
    pub fn mark_for_destruction(&self) {
        self.destroy_on_drop.store(true, Ordering::Release);
    }

    pub fn is_marked_for_destruction(&self) -> bool {
        self.destroy_on_drop.load(Ordering::Acquire)
    }

    pub(crate) fn codec(&self) -> &'static dyn EntryCodec {
        self.version.codec()
    }

    fn entry_offset(&self, index: u64) -> u64 {
        HEADER_SIZE + index * self.codec().entry_size() as u64
    }
}

impl std::fmt::Debug for PTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PTable")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("version", &self.version)
            .field("entry_count", &self.entry_count)
            .field("midpoints", &self.midpoints.len())
            .finish()
    }
}

impl Drop for PTable {
    fn drop(&mut self) {
        if !self.destroy_on_drop.load(Ordering::Acquire) {
            return;
        }

        // Close pooled handles before unlinking
        while self.readers.pop().is_some() {}

        match fs::remove_file(&self.path) {
            Ok(()) => debug!(table = self.id, path = ?self.path, "deleted superseded ptable"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(table = self.id, path = ?self.path, error = %e, "failed to delete ptable"),
        }
    }
}

// =============================================================================
// File Naming
// =============================================================================

/// "{id:016x}.ptable"
pub fn table_file_name(id: u64) -> String {
    format!("{:016x}.{}", id, PTABLE_EXTENSION)
}

/// "00000000000000ff.ptable" → Some(255)
pub fn table_id_from_path(path: &Path) -> Option<u64> {
    if path.extension()? != PTABLE_EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    u64::from_str_radix(stem, 16).ok()
}

/// Sibling path a table or manifest is staged under before the rename
pub(crate) fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Best-effort fsync of the directory holding `path`, making a rename durable
pub(crate) fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}
