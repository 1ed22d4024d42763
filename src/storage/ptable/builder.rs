//! PTable Builder
//!
//! Streams sorted entries into a staged table file, samples the midpoint
//! cache, seals it with a CRC32 footer and renames it into place.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use bytes::BufMut;
use crossbeam::queue::ArrayQueue;
use tracing::{debug, trace};

use crate::config::validate_cache_depth;
use crate::entry::{EntryCodec, IndexEntry, IndexKey};
use crate::error::{IndexError, Result};
use crate::memtable::DrainedSnapshot;

use super::midpoints::{midpoint_count, midpoint_item_index, Midpoint, MidpointCache};
use super::{
    sync_parent_dir, tmp_path_for, PTable, PTableOptions, FORMAT_VERSION, HEADER_SIZE,
};

/// Builder for creating new PTables from sorted entries
pub struct PTableBuilder {
    id: u64,
    /// Final location of the table
    path: PathBuf,
    /// Staging file, renamed to `path` by `finish()`
    tmp_path: PathBuf,
    /// Buffered writer over the staging file; `None` once finished
    writer: Option<BufWriter<File>>,
    codec: &'static dyn EntryCodec,
    options: PTableOptions,
    /// Number of entries written
    entry_count: u64,
    /// Last key written, for the ordering check
    last_key: Option<IndexKey>,
    /// Running CRC over everything after the header
    body_hasher: crc32fast::Hasher,
    scratch: Vec<u8>,
}

impl PTableBuilder {
    /// Create a new builder staging at `<path>.tmp`
    ///
    /// Reserves the header immediately; call `add()` in index order, then
    /// `finish()` to write midpoints and footer.
    pub fn create(id: u64, path: &Path, options: &PTableOptions) -> Result<Self> {
        validate_cache_depth(options.cache_depth)?;

        let tmp_path = tmp_path_for(path);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;

        let mut writer = BufWriter::with_capacity(64 * 1024, file);
        // Header is rewritten once the entry count is known
        writer.write_all(&[0u8; HEADER_SIZE as usize])?;

        let codec = options.version.codec();
        Ok(Self {
            id,
            path: path.to_path_buf(),
            tmp_path,
            writer: Some(writer),
            codec,
            options: options.clone(),
            entry_count: 0,
            last_key: None,
            body_hasher: crc32fast::Hasher::new(),
            scratch: Vec::with_capacity(codec.entry_size()),
        })
    }

    /// Append an entry; keys must be strictly increasing in index order
    pub fn add(&mut self, entry: &IndexEntry) -> Result<()> {
        let key = entry.key();
        if let Some(last) = self.last_key {
            if key <= last {
                return Err(IndexError::InvalidEntry(format!(
                    "entry {:?} added after {:?}; ptable input must be sorted and unique",
                    key, last
                )));
            }
        }

        self.scratch.clear();
        self.codec.encode(entry, &mut self.scratch)?;

        let writer = self.writer.as_mut().ok_or_else(|| {
            IndexError::InvalidState("ptable builder already finished".to_string())
        })?;
        writer.write_all(&self.scratch)?;
        self.body_hasher.update(&self.scratch);

        self.last_key = Some(key);
        self.entry_count += 1;
        Ok(())
    }

    /// Number of entries added so far
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Finish building: write midpoints, header and footer, fsync, rename
    pub fn finish(mut self) -> Result<PTable> {
        let writer = self.writer.take().ok_or_else(|| {
            IndexError::InvalidState("ptable builder already finished".to_string())
        })?;
        let mut file = writer.into_inner().map_err(|e| {
            IndexError::Io(e.into_error())
        })?;

        let entry_size = self.codec.entry_size() as u64;
        let entries_end = HEADER_SIZE + self.entry_count * entry_size;

        // Sample midpoints straight from the written entries
        let count = midpoint_count(self.entry_count, self.options.cache_depth);
        let mut points = Vec::with_capacity(count as usize);
        let mut key_buf = vec![0u8; self.codec.key_size()];
        for k in 0..count {
            let item_index = midpoint_item_index(k, count, self.entry_count);
            file.seek(SeekFrom::Start(HEADER_SIZE + item_index * entry_size))?;
            file.read_exact(&mut key_buf)?;
            let key = self.codec.decode_key(&mut key_buf.as_slice())?;
            points.push(Midpoint { key, item_index });
        }

        // Midpoint section
        let mut section = Vec::with_capacity(4 + points.len() * (self.codec.key_size() + 8));
        section.put_u32_le(points.len() as u32);
        for point in &points {
            self.codec.encode_key(&point.key, &mut section)?;
            section.put_u64_le(point.item_index);
        }
        file.seek(SeekFrom::Start(entries_end))?;
        file.write_all(&section)?;
        self.body_hasher.update(&section);

        // Header
        let mut header = Vec::with_capacity(HEADER_SIZE as usize);
        header.put_u8(FORMAT_VERSION);
        header.put_u8(self.codec.version().as_u8());
        header.put_i64_le(self.entry_count as i64);
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header)?;

        // Footer: CRC32(header ++ body)
        let mut crc = crc32fast::Hasher::new();
        crc.update(&header);
        crc.combine(&self.body_hasher);
        let checksum = crc.finalize();
        file.seek(SeekFrom::End(0))?;
        file.write_all(&checksum.to_le_bytes())?;

        file.sync_all()?;
        let file_size = file.metadata()?.len();
        drop(file);

        fs::rename(&self.tmp_path, &self.path)?;
        sync_parent_dir(&self.path);

        debug!(
            table = self.id,
            entries = self.entry_count,
            midpoints = points.len(),
            path = ?self.path,
            "ptable written"
        );

        let readers = ArrayQueue::new(self.options.reader_pool_size.max(1));
        Ok(PTable {
            id: self.id,
            path: self.path.clone(),
            version: self.codec.version(),
            entry_count: self.entry_count,
            file_size,
            midpoints: MidpointCache::new(points),
            readers,
            destroy_on_drop: Default::default(),
        })
    }
}

impl Drop for PTableBuilder {
    fn drop(&mut self) {
        // Abandoned or failed build: never leave the staging file behind
        self.writer.take();
        if self.tmp_path.exists() {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

impl PTable {
    /// Persist a drained MemTable as a new table at `dest_path`
    pub fn from_memtable(
        snapshot: DrainedSnapshot,
        dest_path: &Path,
        options: &PTableOptions,
    ) -> Result<PTable> {
        Self::from_snapshot(&snapshot, dest_path, options)
    }

    /// Same as `from_memtable`, but the snapshot survives a failed write
    pub(crate) fn from_snapshot(
        snapshot: &DrainedSnapshot,
        dest_path: &Path,
        options: &PTableOptions,
    ) -> Result<PTable> {
        let id = snapshot.id();
        let started = Instant::now();
        trace!(memtable = id, entries = snapshot.len(), "dumping memtable into ptable");

        let mut builder = PTableBuilder::create(id, dest_path, options)?;
        for entry in snapshot.entries() {
            builder.add(&entry)?;
        }
        let table = builder.finish()?;

        debug!(
            table = id,
            entries = table.entry_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "memtable dumped into ptable"
        );
        Ok(table)
    }
}
