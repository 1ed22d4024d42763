//! MemTable Module
//!
//! In-memory buffer of the most recent index entries.
//!
//! ## Responsibilities
//! - Fast inserts and lookups in memory
//! - Single-writer/multi-reader access pattern
//! - Track fill level and highest log position for drain triggers
//! - Ordered iteration for PTable creation
//!
//! ## Lifecycle
//! ```text
//!   Writable ──mark_draining()──▶ Draining ──mark_drained()──▶ Drained
//! ```
//! A draining table keeps answering queries until its PTable is published,
//! but rejects new entries; the writer moves on to a fresh MemTable.

mod table;

pub use table::{DrainedSnapshot, MemTable};

/// Lifecycle state of a MemTable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemTableState {
    /// Accepting new entries
    Writable,

    /// Frozen; a PTable is being built from its contents
    Draining,

    /// Contents are captured by a published PTable
    Drained,
}

impl MemTableState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            MemTableState::Writable => 0,
            MemTableState::Draining => 1,
            MemTableState::Drained => 2,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => MemTableState::Writable,
            1 => MemTableState::Draining,
            _ => MemTableState::Drained,
        }
    }
}
