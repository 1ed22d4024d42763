//! Manifest
//!
//! Durable record of which PTables form the IndexMap, at which
//! `(level, position)` slot, and the log position the tables cover.
//!
//! ## File Format
//! ```text
//! ┌──────────────┬───────────────┬───────────────────────────────┐
//! │ CRC32 (4)    │ BodyLen (4)   │ Body: bincode(ManifestRecord) │
//! └──────────────┴───────────────┴───────────────────────────────┘
//! ```
//!
//! Rewritten whole on every change: `indexmap.tmp` is written, fsynced and
//! renamed over `indexmap`.
//!
//! A second file, `rebuilding`, holds the number of consecutive rebuilds
//! (`CRC32 (4) | Attempts (4)`). It survives restarts so an index that keeps
//! coming back corrupt is eventually reported instead of rebuilt forever.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::entry::IndexKey;
use crate::error::{IndexError, Result};

use super::ptable::{sync_parent_dir, tmp_path_for};

/// File name of the manifest inside the index directory
pub const MANIFEST_FILENAME: &str = "indexmap";

/// Current manifest body version
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// File counting consecutive rebuilds, removed after a clean load
pub const REBUILD_MARKER_FILENAME: &str = "rebuilding";

/// Highest level a manifest may reference
pub const MAX_LEVELS: u32 = 64;

/// CRC32 (4) + body length (4)
const FRAME_HEADER_SIZE: usize = 8;

/// One table slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRecord {
    pub id: u64,
    pub level: u32,
    pub position: u32,
    pub version: u8,
    pub entry_count: i64,
    pub min_key: Option<IndexKey>,
    pub max_key: Option<IndexKey>,
    pub file_name: String,
}

/// Everything persisted about an IndexMap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub format_version: u32,
    /// Highest log position covered by the tables; -1 when none
    pub valid_through: i64,
    pub max_auto_merge_level: u32,
    pub tables: Vec<TableRecord>,
}

impl ManifestRecord {
    pub fn new(valid_through: i64, max_auto_merge_level: u32, tables: Vec<TableRecord>) -> Self {
        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            valid_through,
            max_auto_merge_level,
            tables,
        }
    }
}

/// Path of the manifest inside `dir`
pub fn manifest_path(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_FILENAME)
}

/// Atomically replace the manifest in `dir`
pub fn save(dir: &Path, record: &ManifestRecord) -> Result<()> {
    let path = manifest_path(dir);

    let body = bincode::serialize(record).map_err(|e| IndexError::Serialization(e.to_string()))?;
    let body_len = u32::try_from(body.len()).map_err(|_| {
        IndexError::Serialization(format!("manifest body too large ({} bytes)", body.len()))
    })?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
    frame.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    frame.extend_from_slice(&body_len.to_le_bytes());
    frame.extend_from_slice(&body);

    write_atomically(&path, &frame)?;

    debug!(
        tables = record.tables.len(),
        valid_through = record.valid_through,
        "manifest saved"
    );
    Ok(())
}

/// Load the manifest from `dir`; `Ok(None)` when there is none yet
pub fn load(dir: &Path) -> Result<Option<ManifestRecord>> {
    let path = manifest_path(dir);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let corrupted = |reason: String| IndexError::CorruptedManifest {
        path: path.clone(),
        reason,
        rebuild_attempts: 0,
    };

    if bytes.len() < FRAME_HEADER_SIZE {
        return Err(corrupted(format!("truncated frame ({} bytes)", bytes.len())));
    }
    let (frame, body) = bytes.split_at(FRAME_HEADER_SIZE);
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&frame[0..4]);
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&frame[4..8]);
    let expected_crc = u32::from_le_bytes(crc_bytes);
    let body_len = u32::from_le_bytes(len_bytes) as usize;

    if body.len() != body_len {
        return Err(corrupted(format!(
            "body is {} bytes, frame declares {}",
            body.len(),
            body_len
        )));
    }
    let actual_crc = crc32fast::hash(body);
    if actual_crc != expected_crc {
        return Err(corrupted(format!(
            "checksum mismatch: expected {:#010x}, computed {:#010x}",
            expected_crc, actual_crc
        )));
    }

    let record: ManifestRecord =
        bincode::deserialize(body).map_err(|e| corrupted(format!("undecodable body: {}", e)))?;
    if record.format_version != MANIFEST_FORMAT_VERSION {
        return Err(corrupted(format!(
            "unsupported format version {}",
            record.format_version
        )));
    }
    validate_slots(&record).map_err(corrupted)?;

    Ok(Some(record))
}

/// Rebuilds recorded by earlier runs, 0 when there is no marker.
///
/// An unreadable marker counts as one rebuild rather than none.
pub fn load_rebuild_attempts(dir: &Path) -> Result<u32> {
    let path = dir.join(REBUILD_MARKER_FILENAME);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    if bytes.len() == 8 {
        let (crc, attempts) = bytes.split_at(4);
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(crc);
        if u32::from_le_bytes(crc_bytes) == crc32fast::hash(attempts) {
            let mut attempt_bytes = [0u8; 4];
            attempt_bytes.copy_from_slice(attempts);
            return Ok(u32::from_le_bytes(attempt_bytes));
        }
    }
    warn!(path = ?path, "unreadable rebuild marker");
    Ok(1)
}

/// Record `attempts` consecutive rebuilds
pub fn save_rebuild_attempts(dir: &Path, attempts: u32) -> Result<()> {
    let attempts = attempts.to_le_bytes();
    let mut frame = Vec::with_capacity(8);
    frame.extend_from_slice(&crc32fast::hash(&attempts).to_le_bytes());
    frame.extend_from_slice(&attempts);
    write_atomically(&dir.join(REBUILD_MARKER_FILENAME), &frame)
}

/// Forget earlier rebuilds
pub fn clear_rebuild_attempts(dir: &Path) -> Result<()> {
    match fs::remove_file(dir.join(REBUILD_MARKER_FILENAME)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Write `bytes` to a `.tmp` sibling, fsync, rename over `path`
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = tmp_path_for(path);
    {
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    sync_parent_dir(path);
    Ok(())
}

/// Positions inside every level must run 0, 1, 2, ... without gaps
fn validate_slots(record: &ManifestRecord) -> std::result::Result<(), String> {
    let mut slots: Vec<(u32, u32)> = record.tables.iter().map(|t| (t.level, t.position)).collect();
    slots.sort_unstable();

    let mut expected_position = 0u32;
    let mut current_level = None;
    for (level, position) in slots {
        if level >= MAX_LEVELS {
            return Err(format!("level {} is beyond the last level {}", level, MAX_LEVELS - 1));
        }
        if current_level != Some(level) {
            current_level = Some(level);
            expected_position = 0;
        }
        if position != expected_position {
            return Err(format!(
                "level {} has position {} where {} was expected",
                level, position, expected_position
            ));
        }
        expected_position += 1;
    }
    Ok(())
}
