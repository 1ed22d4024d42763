//! # eventindex
//!
//! The index engine of an event-sourcing database: it maps a
//! `(stream, event number)` pair to the position of the event's record in
//! the transaction log.
//! - Sorted in-memory MemTable for recent entries
//! - Immutable on-disk PTables with a midpoint cache and CRC footer
//! - Leveled merging with crash-safe manifest updates
//! - Single-writer/multi-reader concurrency model
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       TableIndex                             │
//! │        add / try_get_one_value / get_range / latest          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  MemTable   │  drain   │  IndexMap   │
//!   │  (RwLock)   │ ───────▶ │  (levels)   │
//!   └─────────────┘          └──────┬──────┘
//!                                   │ merge
//!                                   ▼
//!                           ┌─────────────┐
//!                           │   PTables   │
//!                           │ (immutable) │
//!                           └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod entry;
pub mod hasher;
pub mod memtable;
pub mod storage;
pub mod replay;
pub mod table_index;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{IndexError, Result};
pub use config::Config;
pub use entry::{IndexEntry, IndexKey, IndexVersion};
pub use hasher::{Fnv1aStreamHasher, StreamHasher};
pub use replay::{AlwaysValid, EntryValidity, LogReplay};
pub use table_index::{IndexState, TableIndex};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of eventindex
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
