//! Storage Module
//!
//! Persistent side of the index: immutable PTables, the merge that
//! combines them, and the IndexMap that arranges them into levels.
//!
//! ## Responsibilities
//! - Write sorted entries to disk once, never modify them afterwards
//! - Point lookups and range scans through the midpoint cache
//! - Leveled merging with a caller-supplied validity predicate
//! - Crash-safe manifest updates (write tmp, fsync, rename)
//!
//! ## Directory Layout
//! ```text
//! {index_dir}/
//! ├── indexmap                 manifest: levels, slots, valid_through
//! ├── 0000000000000001.ptable
//! ├── 0000000000000002.ptable
//! └── ...
//! ```

pub mod index_map;
pub mod manifest;
pub mod merge;
pub mod ptable;

pub use index_map::{AddResult, IndexMap, MergeResult};
pub use merge::{merge_tables, MergeIterator};
pub use ptable::{
    table_file_name, table_id_from_path, Midpoint, MidpointCache, PTable, PTableBuilder,
    PTableIterator, PTableOptions, PTABLE_EXTENSION,
};
