//! Error types for the event index
//!
//! Provides a unified error type for all operations. Open-time corruption
//! errors carry the number of rebuild attempts made so far, so the caller
//! can thread it into the next attempt and decide when to give up.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using IndexError
pub type Result<T> = std::result::Result<T, IndexError>;

/// Unified error type for event index operations
#[derive(Debug, Error)]
pub enum IndexError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // PTable / Manifest Corruption
    // -------------------------------------------------------------------------
    #[error("Corrupted index file {path:?}: {reason} (rebuild attempt {rebuild_attempts})")]
    CorruptedFile {
        path: PathBuf,
        reason: String,
        rebuild_attempts: u32,
    },

    #[error(
        "Checksum mismatch in {path:?}: expected {expected:#010x}, computed {actual:#010x} \
         (rebuild attempt {rebuild_attempts})"
    )]
    CorruptedChecksum {
        path: PathBuf,
        expected: u32,
        actual: u32,
        rebuild_attempts: u32,
    },

    #[error(
        "Size mismatch in {path:?}: header declares {expected} bytes, file has {actual} \
         (rebuild attempt {rebuild_attempts})"
    )]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
        rebuild_attempts: u32,
    },

    #[error("PTable {path:?} referenced by the manifest is missing (rebuild attempt {rebuild_attempts})")]
    ManifestFileMissing { path: PathBuf, rebuild_attempts: u32 },

    #[error("Corrupted manifest {path:?}: {reason} (rebuild attempt {rebuild_attempts})")]
    CorruptedManifest {
        path: PathBuf,
        reason: String,
        rebuild_attempts: u32,
    },

    #[error("Index rebuilt {attempts} times and is still corrupt: {source}")]
    RebuildLimitExceeded {
        attempts: u32,
        #[source]
        source: Box<IndexError>,
    },

    // -------------------------------------------------------------------------
    // Usage Errors
    // -------------------------------------------------------------------------
    #[error("Configuration out of range: {0}")]
    OutOfRangeConfiguration(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid index entry: {0}")]
    InvalidEntry(String),

    #[error("Background index task failed: {0}")]
    BackgroundTask(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl IndexError {
    /// True for errors that mean an on-disk artifact cannot be trusted and
    /// the index has to be rebuilt from the log.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            IndexError::CorruptedFile { .. }
                | IndexError::CorruptedChecksum { .. }
                | IndexError::SizeMismatch { .. }
                | IndexError::ManifestFileMissing { .. }
                | IndexError::CorruptedManifest { .. }
        )
    }

    /// Rebuild attempts recorded in a corruption error, 0 for anything else.
    pub fn rebuild_attempts(&self) -> u32 {
        match self {
            IndexError::CorruptedFile { rebuild_attempts, .. }
            | IndexError::CorruptedChecksum { rebuild_attempts, .. }
            | IndexError::SizeMismatch { rebuild_attempts, .. }
            | IndexError::ManifestFileMissing { rebuild_attempts, .. }
            | IndexError::CorruptedManifest { rebuild_attempts, .. } => *rebuild_attempts,
            IndexError::RebuildLimitExceeded { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    /// Re-stamp a corruption error with a different attempt count.
    pub(crate) fn with_rebuild_attempts(self, attempts: u32) -> Self {
        match self {
            IndexError::CorruptedFile { path, reason, .. } => IndexError::CorruptedFile {
                path,
                reason,
                rebuild_attempts: attempts,
            },
            IndexError::CorruptedChecksum {
                path,
                expected,
                actual,
                ..
            } => IndexError::CorruptedChecksum {
                path,
                expected,
                actual,
                rebuild_attempts: attempts,
            },
            IndexError::SizeMismatch {
                path,
                expected,
                actual,
                ..
            } => IndexError::SizeMismatch {
                path,
                expected,
                actual,
                rebuild_attempts: attempts,
            },
            IndexError::ManifestFileMissing { path, .. } => IndexError::ManifestFileMissing {
                path,
                rebuild_attempts: attempts,
            },
            IndexError::CorruptedManifest { path, reason, .. } => IndexError::CorruptedManifest {
                path,
                reason,
                rebuild_attempts: attempts,
            },
            other => other,
        }
    }
}
