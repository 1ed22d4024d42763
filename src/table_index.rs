//! TableIndex
//!
//! The facade the rest of the system talks to. It routes new entries into
//! the current MemTable and answers queries across MemTables and PTables.
//!
//! ## Responsibilities
//! - Swap a full MemTable for a fresh one without blocking on disk I/O
//! - Convert drained MemTables into PTables on a background worker
//! - Run merges on the same worker, one at a time
//! - Rebuild the index from the log when on-disk state is corrupt
//!
//! ## Read order
//! ```text
//!   current MemTable → awaiting MemTables (newest first) → IndexMap::in_order()
//! ```
//! A drained MemTable stays in the awaiting list until the IndexMap that
//! holds its PTable is published, so a read issued after `add` returns
//! always sees the entry.
//!
//! Awaiting tables are converted strictly oldest first. A failed conversion
//! leaves the table at the head of the list and is retried by the next
//! conversion task; nothing behind it is persisted in the meantime, so the
//! manifest checkpoint never skips over unpersisted entries.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::entry::{IndexEntry, IndexVersion};
use crate::error::{IndexError, Result};
use crate::hasher::StreamHasher;
use crate::memtable::{DrainedSnapshot, MemTable};
use crate::replay::{EntryValidity, LogReplay};
use crate::storage::manifest::{self, MANIFEST_FILENAME};
use crate::storage::{table_file_name, IndexMap, PTable, PTableOptions, PTABLE_EXTENSION};

/// Lifecycle of a TableIndex
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Initializing,
    Ready,
    Closing,
    Closed,
}

impl IndexState {
    fn as_u8(self) -> u8 {
        match self {
            IndexState::Initializing => 0,
            IndexState::Ready => 1,
            IndexState::Closing => 2,
            IndexState::Closed => 3,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => IndexState::Initializing,
            1 => IndexState::Ready,
            2 => IndexState::Closing,
            _ => IndexState::Closed,
        }
    }
}

/// Work for the background worker
enum Task {
    /// Persist every awaiting MemTable, then settle the levels
    Convert,
    Merge,
    ManualMerge,
}

/// The event index
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader
///
/// - **Writes** (`add`, `flush`): serialized by `write_lock`
/// - **Reads**: lock-free apart from brief read locks taken to clone the
///   current MemTable, the awaiting list and the IndexMap snapshot
/// - **Background**: one worker thread converts MemTables and merges; it
///   is the only writer of the IndexMap
pub struct TableIndex {
    shared: Arc<Shared>,
    tasks: Mutex<Option<Sender<Task>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    config: Config,
    options: PTableOptions,
    hasher: Arc<dyn StreamHasher>,
    validity: Arc<dyn EntryValidity>,

    state: AtomicU8,

    /// Table receiving new entries
    memtable: RwLock<Arc<MemTable>>,

    /// Drained tables whose PTable is not yet published, oldest first
    awaiting: RwLock<Vec<Arc<DrainedSnapshot>>>,

    /// Current IndexMap generation
    index_map: RwLock<Arc<IndexMap>>,

    /// Ids for MemTables and PTables alike
    next_table_id: AtomicU64,

    /// Serializes writers
    write_lock: Mutex<()>,

    /// Queued background tasks not yet finished
    pending: Mutex<usize>,
    pending_done: Condvar,

    /// Outstanding background failure; cleared once the worker has caught up
    background_error: Mutex<Option<String>>,
}

/// A queryable source, MemTable or PTable
enum Source {
    Memory(Arc<MemTable>),
    Disk(Arc<PTable>),
}

impl Source {
    fn try_get_one_value(&self, hash: u64, event_number: i64) -> Result<Option<i64>> {
        match self {
            Source::Memory(table) => Ok(table.try_get_one_value(hash, event_number)),
            Source::Disk(table) => table.try_get_one_value(hash, event_number),
        }
    }

    fn get_range(&self, hash: u64, from: i64, to: i64, limit: Option<usize>) -> Result<Vec<IndexEntry>> {
        match self {
            Source::Memory(table) => {
                let mut entries = table.get_range(hash, from, to);
                if let Some(limit) = limit {
                    entries.truncate(limit);
                }
                Ok(entries)
            }
            Source::Disk(table) => table.get_range_limited(hash, from, to, limit),
        }
    }

    fn try_get_latest_entry(&self, hash: u64) -> Result<Option<IndexEntry>> {
        match self {
            Source::Memory(table) => Ok(table.try_get_latest_entry(hash)),
            Source::Disk(table) => table.try_get_latest_entry(hash),
        }
    }

    fn try_get_oldest_entry(&self, hash: u64) -> Result<Option<IndexEntry>> {
        match self {
            Source::Memory(table) => Ok(table.try_get_oldest_entry(hash)),
            Source::Disk(table) => table.try_get_oldest_entry(hash),
        }
    }
}

impl TableIndex {
    /// Create an index over `config.index_dir`. Nothing is loaded until
    /// `initialize` runs.
    pub fn open(
        config: Config,
        hasher: Arc<dyn StreamHasher>,
        validity: Arc<dyn EntryValidity>,
    ) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.index_dir)?;

        let index_map = IndexMap::create_empty(
            &config.index_dir,
            config.tables_per_level,
            config.max_auto_merge_level,
        )?;
        let memtable = MemTable::new(0, config.max_entries_in_memory);

        let shared = Arc::new(Shared {
            options: PTableOptions::from(&config),
            config,
            hasher,
            validity,
            state: AtomicU8::new(IndexState::Initializing.as_u8()),
            memtable: RwLock::new(Arc::new(memtable)),
            awaiting: RwLock::new(Vec::new()),
            index_map: RwLock::new(Arc::new(index_map)),
            next_table_id: AtomicU64::new(1),
            write_lock: Mutex::new(()),
            pending: Mutex::new(0),
            pending_done: Condvar::new(),
            background_error: Mutex::new(None),
        });

        let (sender, receiver) = channel::unbounded();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("eventindex-worker".to_string())
            .spawn(move || run_worker(worker_shared, receiver))?;

        Ok(Self {
            shared,
            tasks: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Load the IndexMap, rebuilding it from `log` if it is corrupt, then
    /// replay everything after the covered log position.
    ///
    /// Steps:
    /// 1. Load the manifest and open every table
    /// 2. On corruption, or when the index is ahead of the log's writer
    ///    checkpoint, wipe the directory and retry. Rebuilds are counted
    ///    across restarts and fail hard past `max_rebuild_attempts`
    /// 3. Delete files the manifest does not reference
    /// 4. Replay the log into MemTables
    pub fn initialize(&self, log: &dyn LogReplay) -> Result<()> {
        let shared = &self.shared;
        if shared.state() != IndexState::Initializing {
            return Err(IndexError::InvalidState(format!(
                "initialize called in state {:?}",
                shared.state()
            )));
        }
        let started = Instant::now();
        let config = &shared.config;

        // Step 1 + 2: load, wiping on corruption
        let writer_checkpoint = log.writer_checkpoint();
        let prior_attempts = manifest::load_rebuild_attempts(&config.index_dir)?;
        let mut attempts = prior_attempts;
        let mut rebuilt = false;
        let map = loop {
            let loaded = IndexMap::load(config, attempts)
                .and_then(|map| ensure_behind_log(map, writer_checkpoint, attempts.saturating_add(1)));
            match loaded {
                Ok(map) => break map,
                Err(e) if e.is_corruption() => {
                    attempts = e.rebuild_attempts();
                    if attempts > config.max_rebuild_attempts {
                        error!(attempts, error = %e, "index keeps coming back corrupt");
                        return Err(IndexError::RebuildLimitExceeded {
                            attempts,
                            source: Box::new(e),
                        });
                    }
                    warn!(attempts, error = %e, "index is corrupt, rebuilding from the log");
                    wipe_index_dir(&config.index_dir)?;
                    manifest::save_rebuild_attempts(&config.index_dir, attempts)?;
                    rebuilt = true;
                }
                Err(e) => return Err(e),
            }
        };
        if !rebuilt && prior_attempts > 0 {
            manifest::clear_rebuild_attempts(&config.index_dir)?;
            info!(prior_attempts, "index loaded cleanly, rebuild counter reset");
        }

        // Step 3: stray files
        remove_unreferenced_files(&config.index_dir, &map)?;

        let next_id = map.max_table_id() + 1;
        shared.next_table_id.store(next_id + 1, Ordering::SeqCst);
        *shared.memtable.write() = Arc::new(MemTable::new(next_id, config.max_entries_in_memory));
        let valid_through = map.valid_through();
        let can_merge = map.can_merge();
        *shared.index_map.write() = Arc::new(map);

        // Step 4: replay
        let mut replayed = 0u64;
        {
            let _write_guard = shared.write_lock.lock();
            for record in log.for_each_committed_record_since(valid_through) {
                let record = record?;
                self.add_locked(IndexEntry::from(record))?;
                replayed += 1;
            }
        }

        shared.set_state(IndexState::Ready);
        if can_merge {
            self.enqueue(Task::Merge)?;
        }

        info!(
            valid_through,
            replayed,
            rebuild_attempts = attempts,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "table index ready"
        );
        Ok(())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Add an entry for an already hashed stream
    pub fn add(&self, hash: u64, event_number: i64, position: i64) -> Result<()> {
        let _write_guard = self.shared.write_lock.lock();
        // Checked under the lock: `close` swaps the MemTable out while holding it
        self.ensure_state(IndexState::Ready)?;
        self.add_locked(IndexEntry::new(hash, event_number, position))
    }

    /// Hash `stream_id` and add the entry
    pub fn add_stream(&self, stream_id: &str, event_number: i64, position: i64) -> Result<()> {
        self.add(self.stream_hash(stream_id), event_number, position)
    }

    /// Hash of `stream_id` at the configured width
    pub fn stream_hash(&self, stream_id: &str) -> u64 {
        self.shared
            .hasher
            .hash_for(stream_id, self.shared.config.index_version)
    }

    /// Drain the current MemTable into a PTable, even if not full.
    ///
    /// Also retries conversions and merges that failed earlier.
    pub fn flush(&self) -> Result<()> {
        let _write_guard = self.shared.write_lock.lock();
        self.ensure_state(IndexState::Ready)?;
        self.flush_locked()
    }

    /// Merge every table at or above `max_auto_merge_level` into one
    pub fn merge_indexes(&self) -> Result<()> {
        self.ensure_state(IndexState::Ready)?;
        self.enqueue(Task::ManualMerge)
    }

    /// Block until every queued conversion and merge has finished
    pub fn wait_for_background_tasks(&self) {
        let mut pending = self.shared.pending.lock();
        while *pending > 0 {
            self.shared.pending_done.wait(&mut pending);
        }
    }

    /// Flush, wait for background work and stop the worker.
    ///
    /// Fails with `BackgroundTask` when some entries could not be persisted;
    /// they are still in the log and get replayed on the next start.
    pub fn close(&self) -> Result<()> {
        let shared = &self.shared;
        if shared
            .state
            .compare_exchange(
                IndexState::Ready.as_u8(),
                IndexState::Closing.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return match shared.state() {
                IndexState::Closed | IndexState::Closing => Ok(()),
                state => {
                    // Never initialized: nothing to flush
                    debug!(?state, "closing uninitialized table index");
                    self.stop_worker();
                    shared.set_state(IndexState::Closed);
                    Ok(())
                }
            };
        }

        let flushed = {
            let _write_guard = shared.write_lock.lock();
            self.flush_locked()
        };
        self.wait_for_background_tasks();
        self.stop_worker();
        shared.set_state(IndexState::Closed);

        let unpersisted = shared.awaiting.read().len();
        let failure = shared.background_error.lock().clone();
        info!(
            tables = shared.index_map().table_count(),
            valid_through = shared.index_map().valid_through(),
            unpersisted,
            "table index closed"
        );
        flushed?;
        match failure {
            Some(message) => Err(IndexError::BackgroundTask(message)),
            None if unpersisted > 0 => Err(IndexError::BackgroundTask(format!(
                "{} memtables were never persisted",
                unpersisted
            ))),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Position of `(hash, event_number)`; the newest source wins
    pub fn try_get_one_value(&self, hash: u64, event_number: i64) -> Result<Option<i64>> {
        self.ensure_readable()?;
        if event_number < 0 {
            return Ok(None);
        }
        for source in self.sources_newest_first() {
            if let Some(position) = source.try_get_one_value(hash, event_number)? {
                return Ok(Some(position));
            }
        }
        Ok(None)
    }

    /// Entries of `hash` with `from <= event_number <= to`, newest first.
    ///
    /// Each event number appears once, taken from the newest source holding
    /// it. `limit` keeps only the newest `limit` entries.
    pub fn get_range(
        &self,
        hash: u64,
        from_event_number: i64,
        to_event_number: i64,
        limit: Option<usize>,
    ) -> Result<Vec<IndexEntry>> {
        self.ensure_readable()?;
        if from_event_number > to_event_number || to_event_number < 0 || limit == Some(0) {
            return Ok(Vec::new());
        }

        let mut found: BTreeMap<i64, IndexEntry> = BTreeMap::new();
        for source in self.sources_newest_first() {
            for entry in source.get_range(hash, from_event_number, to_event_number, limit)? {
                if let Entry::Vacant(slot) = found.entry(entry.event_number) {
                    slot.insert(entry);
                }
            }
        }

        let entries = found.into_values().rev();
        Ok(match limit {
            Some(limit) => entries.take(limit).collect(),
            None => entries.collect(),
        })
    }

    /// Newest entry of `hash` from the newest source that has one
    pub fn try_get_latest_entry(&self, hash: u64) -> Result<Option<IndexEntry>> {
        self.ensure_readable()?;
        for source in self.sources_newest_first() {
            if let Some(entry) = source.try_get_latest_entry(hash)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Oldest entry of `hash`, consulting the oldest sources first
    pub fn try_get_oldest_entry(&self, hash: u64) -> Result<Option<IndexEntry>> {
        self.ensure_readable()?;
        for source in self.sources_newest_first().into_iter().rev() {
            if let Some(entry) = source.try_get_oldest_entry(hash)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> IndexState {
        self.shared.state()
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn index_version(&self) -> IndexVersion {
        self.shared.config.index_version
    }

    /// Current IndexMap generation
    pub fn index_map(&self) -> Arc<IndexMap> {
        self.shared.index_map()
    }

    /// Entries in the current MemTable
    pub fn memtable_len(&self) -> usize {
        self.shared.memtable.read().len()
    }

    /// Drained MemTables whose PTable is not yet published
    pub fn awaiting_count(&self) -> usize {
        self.shared.awaiting.read().len()
    }

    /// Highest log position persisted in PTables
    pub fn valid_through(&self) -> i64 {
        self.shared.index_map().valid_through()
    }

    /// Message of the last background failure not yet recovered from
    pub fn last_background_error(&self) -> Option<String> {
        self.shared.background_error.lock().clone()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Insert with `write_lock` held; drains the MemTable once it is full
    fn add_locked(&self, entry: IndexEntry) -> Result<()> {
        let shared = &self.shared;
        if shared.config.index_version == IndexVersion::V32 && entry.hash > u32::MAX as u64 {
            return Err(IndexError::InvalidEntry(format!(
                "hash {:#x} does not fit a 32-bit index",
                entry.hash
            )));
        }

        if shared.memtable.read().is_full() {
            self.swap_memtable()?;
        }
        let memtable = shared.memtable.read().clone();
        memtable.add(entry)?;

        if memtable.is_full() {
            self.swap_memtable()?;
        }
        Ok(())
    }

    /// Swap out the current MemTable and make sure a conversion task runs
    /// even when there was nothing to swap, so earlier failures are retried
    fn flush_locked(&self) -> Result<()> {
        if !self.swap_memtable()? {
            self.enqueue(Task::Convert)?;
        }
        Ok(())
    }

    /// Freeze the current MemTable and queue its conversion.
    ///
    /// The old table joins the awaiting list before the fresh one is
    /// installed, so readers never miss it.
    ///
    /// Returns false when the MemTable was empty and nothing was queued.
    fn swap_memtable(&self) -> Result<bool> {
        let shared = &self.shared;
        let old = shared.memtable.read().clone();
        if old.is_empty() {
            return Ok(false);
        }

        let snapshot = old.mark_draining()?;
        let fresh = MemTable::new(
            shared.next_table_id.fetch_add(1, Ordering::SeqCst),
            shared.config.max_entries_in_memory,
        );

        debug!(
            memtable = snapshot.id(),
            entries = snapshot.len(),
            max_position = snapshot.max_position(),
            "memtable swapped out"
        );
        shared.awaiting.write().push(Arc::new(snapshot));
        *shared.memtable.write() = Arc::new(fresh);

        self.enqueue(Task::Convert)?;
        Ok(true)
    }

    /// Snapshot every source, newest first.
    ///
    /// Taken in read order (MemTable, awaiting, IndexMap) so a table moving
    /// between them is seen at least once.
    fn sources_newest_first(&self) -> Vec<Source> {
        let shared = &self.shared;
        let memtable = shared.memtable.read().clone();
        let awaiting = shared.awaiting.read().clone();
        let map = shared.index_map();

        let mut sources = Vec::with_capacity(1 + awaiting.len() + map.table_count());
        sources.push(Source::Memory(memtable));
        sources.extend(
            awaiting
                .iter()
                .rev()
                .map(|snapshot| Source::Memory(Arc::clone(snapshot.table()))),
        );
        sources.extend(map.in_order().cloned().map(Source::Disk));
        sources
    }

    fn enqueue(&self, task: Task) -> Result<()> {
        let tasks = self.tasks.lock();
        let sender = tasks
            .as_ref()
            .ok_or_else(|| IndexError::InvalidState("background worker stopped".to_string()))?;

        *self.shared.pending.lock() += 1;
        if sender.send(task).is_err() {
            self.shared.finish_task();
            return Err(IndexError::InvalidState("background worker stopped".to_string()));
        }
        Ok(())
    }

    fn stop_worker(&self) {
        // Closing the channel ends the worker loop
        self.tasks.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("index worker panicked");
            }
        }
    }

    fn ensure_state(&self, expected: IndexState) -> Result<()> {
        let state = self.shared.state();
        if state != expected {
            return Err(IndexError::InvalidState(format!(
                "table index is {:?}, expected {:?}",
                state, expected
            )));
        }
        Ok(())
    }

    fn ensure_readable(&self) -> Result<()> {
        match self.shared.state() {
            IndexState::Ready | IndexState::Closing => Ok(()),
            state => Err(IndexError::InvalidState(format!(
                "table index is {:?}, queries need Ready",
                state
            ))),
        }
    }
}

impl Drop for TableIndex {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

impl Shared {
    fn state(&self) -> IndexState {
        IndexState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: IndexState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn index_map(&self) -> Arc<IndexMap> {
        self.index_map.read().clone()
    }

    fn finish_task(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.pending_done.notify_all();
        }
    }

    /// Persist awaiting MemTables oldest first, publishing each at level 0.
    ///
    /// Stops at the first failure; the failed table stays at the head of the
    /// awaiting list for the next attempt.
    fn convert_pending(&self) -> Result<()> {
        loop {
            let next = self.awaiting.read().first().cloned();
            let snapshot = match next {
                Some(snapshot) => snapshot,
                None => return Ok(()),
            };
            let path = self.config.index_dir.join(table_file_name(snapshot.id()));
            let table = Arc::new(PTable::from_snapshot(&snapshot, &path, &self.options)?);

            // Never claim positions of a table that is still only in memory
            let checkpoint = self
                .awaiting
                .read()
                .iter()
                .skip(1)
                .filter_map(|newer| newer.min_position())
                .map(|position| position - 1)
                .fold(snapshot.max_position(), i64::min);

            let added = self.index_map().add_table(Arc::clone(&table), checkpoint);
            if let Err(e) = added.map.save() {
                table.mark_for_destruction();
                return Err(e);
            }
            *self.index_map.write() = Arc::new(added.map);

            self.awaiting.write().retain(|s| !Arc::ptr_eq(s, &snapshot));
            snapshot.table().mark_drained();
        }
    }

    /// True when no conversion or automatic merge is left to do
    fn caught_up(&self) -> bool {
        self.awaiting.read().is_empty() && !self.index_map().can_merge()
    }

    /// Run automatic merges until no level below the auto-merge ceiling is full
    fn merge_until_settled(&self) -> Result<()> {
        loop {
            let result = self.index_map().try_merge_one_level(
                &self.options,
                &self.next_table_id,
                self.validity.as_ref(),
            )?;
            if !result.merged_any {
                return Ok(());
            }
            let more = result.can_merge_more;
            self.publish_merge(result.map, result.to_delete)?;
            if !more {
                return Ok(());
            }
        }
    }

    fn manual_merge(&self) -> Result<()> {
        let result = self.index_map().try_manual_merge(
            &self.options,
            &self.next_table_id,
            self.validity.as_ref(),
        )?;
        if !result.merged_any {
            debug!("manual merge found nothing to merge");
            return Ok(());
        }
        self.publish_merge(result.map, result.to_delete)
    }

    /// Save and install a merged map, then retire its inputs
    fn publish_merge(&self, map: IndexMap, to_delete: Vec<Arc<PTable>>) -> Result<()> {
        let current = self.index_map();
        if let Err(e) = map.save() {
            // The merge output is not referenced anywhere; drop it
            let kept: HashSet<u64> = current.in_order().map(|t| t.id()).collect();
            for table in map.in_order().filter(|t| !kept.contains(&t.id())) {
                table.mark_for_destruction();
            }
            return Err(e);
        }
        *self.index_map.write() = Arc::new(map);

        for table in to_delete {
            table.mark_for_destruction();
        }
        Ok(())
    }
}

fn run_worker(shared: Arc<Shared>, tasks: Receiver<Task>) {
    debug!("index worker started");
    while let Ok(task) = tasks.recv() {
        let result = match task {
            Task::Convert => shared
                .convert_pending()
                .and_then(|()| shared.merge_until_settled()),
            Task::Merge => shared.merge_until_settled(),
            Task::ManualMerge => shared.manual_merge(),
        };
        match result {
            Err(e) => {
                error!(error = %e, "background index task failed");
                *shared.background_error.lock() = Some(e.to_string());
            }
            Ok(()) if shared.caught_up() => {
                if let Some(previous) = shared.background_error.lock().take() {
                    info!(previous = %previous, "background work recovered");
                }
            }
            Ok(()) => {}
        }
        shared.finish_task();
    }
    debug!("index worker stopped");
}

/// An index covering positions the log has not written is stale
fn ensure_behind_log(map: IndexMap, writer_checkpoint: Option<i64>, attempt: u32) -> Result<IndexMap> {
    match writer_checkpoint {
        Some(writer) if map.valid_through() >= writer => Err(IndexError::CorruptedManifest {
            path: manifest::manifest_path(map.dir()),
            reason: format!(
                "index covers log position {} but the log ends before {}",
                map.valid_through(),
                writer
            ),
            rebuild_attempts: attempt,
        }),
        _ => Ok(map),
    }
}

/// Remove the manifest and every table file so the index is rebuilt
fn wipe_index_dir(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            fs::remove_file(&path)?;
        }
    }
    info!(dir = ?dir, "index directory wiped");
    Ok(())
}

/// Delete `.ptable` and `.tmp` files the manifest does not list
fn remove_unreferenced_files(dir: &Path, map: &IndexMap) -> Result<()> {
    let referenced: HashSet<String> = map.file_names().into_iter().collect();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        let extension = path.extension().and_then(|e| e.to_str());
        let stray = match extension {
            Some("tmp") => true,
            Some(ext) if ext == PTABLE_EXTENSION => !referenced.contains(&name),
            _ => false,
        };
        if stray && name != MANIFEST_FILENAME {
            warn!(file = %name, "removing unreferenced index file");
            fs::remove_file(&path)?;
        }
    }
    debug!(referenced = referenced.len(), "stray files checked");
    Ok(())
}
