//! PTable Reader
//!
//! Opens and validates table files and answers point and range queries.
//! Every lookup binary-searches the midpoint cache first, then reads only
//! the entries between two neighbouring samples.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Instant;

use bytes::Buf;
use crossbeam::queue::ArrayQueue;
use tracing::{debug, trace};

use crate::entry::{IndexEntry, IndexKey, IndexVersion};
use crate::error::{IndexError, Result};

use super::midpoints::{Midpoint, MidpointCache};
use super::{
    table_id_from_path, PTable, PTableOptions, FOOTER_SIZE, FORMAT_VERSION, HEADER_SIZE,
    MIDPOINT_COUNT_SIZE,
};

impl PTable {
    /// Open an existing table, validating header, size and footer
    pub fn open(path: &Path, options: &PTableOptions) -> Result<PTable> {
        Self::open_with_attempts(path, options, 0)
    }

    /// Open a table after `prior_attempts` failed rebuilds.
    ///
    /// Corruption errors report `prior_attempts + 1`, so feeding the error's
    /// counter back into the next call keeps counting.
    pub fn open_with_attempts(path: &Path, options: &PTableOptions, prior_attempts: u32) -> Result<PTable> {
        let attempt = prior_attempts.saturating_add(1);
        Self::open_inner(path, options).map_err(|e| e.with_rebuild_attempts(attempt))
    }

    fn open_inner(path: &Path, options: &PTableOptions) -> Result<PTable> {
        let started = Instant::now();

        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexError::ManifestFileMissing {
                    path: path.to_path_buf(),
                    rebuild_attempts: 0,
                })
            }
            Err(e) => return Err(e.into()),
        };
        let file_size = file.metadata()?.len();

        let corrupted = |reason: String| IndexError::CorruptedFile {
            path: path.to_path_buf(),
            reason,
            rebuild_attempts: 0,
        };

        // Read and validate header
        if file_size < HEADER_SIZE + MIDPOINT_COUNT_SIZE + FOOTER_SIZE {
            return Err(corrupted(format!("file too short for a header ({} bytes)", file_size)));
        }
        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;
        let mut buf = &header[..];

        let format_version = buf.get_u8();
        if format_version != FORMAT_VERSION {
            return Err(corrupted(format!("unsupported format version {}", format_version)));
        }
        let version_tag = buf.get_u8();
        let version = IndexVersion::from_u8(version_tag)
            .ok_or_else(|| corrupted(format!("unknown index version {}", version_tag)))?;
        let declared_count = buf.get_i64_le();
        if declared_count < 0 {
            return Err(corrupted(format!("negative entry count {}", declared_count)));
        }
        let entry_count = declared_count as u64;

        let codec = version.codec();
        let entry_size = codec.entry_size() as u64;
        let midpoint_size = codec.key_size() as u64 + 8;

        // Size checks against the declared layout
        let entries_end = entry_count
            .checked_mul(entry_size)
            .and_then(|bytes| bytes.checked_add(HEADER_SIZE))
            .ok_or_else(|| corrupted(format!("entry count {} overflows", entry_count)))?;
        let minimum = entries_end + MIDPOINT_COUNT_SIZE + FOOTER_SIZE;
        if file_size < minimum {
            return Err(IndexError::SizeMismatch {
                path: path.to_path_buf(),
                expected: minimum,
                actual: file_size,
                rebuild_attempts: 0,
            });
        }

        file.seek(SeekFrom::Start(entries_end))?;
        let mut count_buf = [0u8; MIDPOINT_COUNT_SIZE as usize];
        file.read_exact(&mut count_buf)?;
        let midpoint_count = u32::from_le_bytes(count_buf) as u64;

        let expected = minimum + midpoint_count * midpoint_size;
        if file_size != expected {
            return Err(IndexError::SizeMismatch {
                path: path.to_path_buf(),
                expected,
                actual: file_size,
                rebuild_attempts: 0,
            });
        }

        if options.verify_on_open {
            verify_checksum(&mut file, path, file_size)?;
        }

        // Load the midpoint cache
        file.seek(SeekFrom::Start(entries_end + MIDPOINT_COUNT_SIZE))?;
        let mut section = vec![0u8; (midpoint_count * midpoint_size) as usize];
        file.read_exact(&mut section)?;
        let mut buf = &section[..];
        let mut points: Vec<Midpoint> = Vec::with_capacity(midpoint_count as usize);
        for k in 0..midpoint_count {
            let key = codec.decode_key(&mut buf)?;
            let item_index = buf.get_u64_le();
            if item_index >= entry_count {
                return Err(corrupted(format!(
                    "midpoint {} points at item {} of {}",
                    k, item_index, entry_count
                )));
            }
            if let Some(prev) = points.last() {
                if key < prev.key || item_index < prev.item_index {
                    return Err(corrupted(format!("midpoint {} is out of order", k)));
                }
            }
            points.push(Midpoint { key, item_index });
        }
        if entry_count > 0 && points.len() < 2 {
            return Err(corrupted(format!(
                "{} midpoints cached for {} entries",
                points.len(),
                entry_count
            )));
        }
        if entry_count == 0 && !points.is_empty() {
            return Err(corrupted("midpoints cached for an empty table".to_string()));
        }
        if let (Some(first), Some(last)) = (points.first(), points.last()) {
            if first.item_index != 0 || last.item_index != entry_count - 1 {
                return Err(corrupted("midpoints do not cover the whole table".to_string()));
            }
        }

        let readers = ArrayQueue::new(options.reader_pool_size.max(1));
        let _ = readers.push(file);

        let id = table_id_from_path(path).unwrap_or(0);
        debug!(
            table = id,
            version = version.as_u8(),
            entries = entry_count,
            midpoints = points.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ptable opened"
        );

        Ok(PTable {
            id,
            path: path.to_path_buf(),
            version,
            entry_count,
            file_size,
            midpoints: MidpointCache::new(points),
            readers,
            destroy_on_drop: Default::default(),
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Position of the exact `(hash, event_number)` key
    pub fn try_get_one_value(&self, hash: u64, event_number: i64) -> Result<Option<i64>> {
        if event_number < 0 {
            return Ok(None);
        }
        let target = IndexKey::new(hash, event_number);
        if !self.might_contain(&target) {
            return Ok(None);
        }

        self.with_reader(|file| {
            let index = self.lower_bound(file, &target)?;
            if index >= self.entry_count {
                return Ok(None);
            }
            let entry = self.read_entry(file, index)?;
            Ok((entry.key() == target).then_some(entry.position))
        })
    }

    /// Entries of `hash` with `from <= event_number <= to`, newest first
    pub fn get_range(&self, hash: u64, from_event_number: i64, to_event_number: i64) -> Result<Vec<IndexEntry>> {
        self.get_range_limited(hash, from_event_number, to_event_number, None)
    }

    /// `get_range` returning at most `limit` entries (the newest ones)
    pub fn get_range_limited(
        &self,
        hash: u64,
        from_event_number: i64,
        to_event_number: i64,
        limit: Option<usize>,
    ) -> Result<Vec<IndexEntry>> {
        if from_event_number > to_event_number || to_event_number < 0 || limit == Some(0) {
            return Ok(Vec::new());
        }
        let start_key = IndexKey::new(hash, to_event_number);
        let end_key = IndexKey::new(hash, from_event_number);
        if !self.overlaps(&start_key, &end_key) {
            return Ok(Vec::new());
        }

        self.with_reader(|file| {
            let start = self.lower_bound(file, &start_key)?;
            let mut end = self.upper_bound(file, &end_key)?;
            if let Some(limit) = limit {
                end = end.min(start.saturating_add(limit as u64));
            }
            if start >= end {
                return Ok(Vec::new());
            }
            self.read_entries(file, start, end)
        })
    }

    /// Newest entry of `hash`: the first one of its run
    pub fn try_get_latest_entry(&self, hash: u64) -> Result<Option<IndexEntry>> {
        let target = IndexKey::new(hash, i64::MAX);
        if !self.overlaps(&target, &IndexKey::new(hash, i64::MIN)) {
            return Ok(None);
        }

        self.with_reader(|file| {
            let index = self.lower_bound(file, &target)?;
            if index >= self.entry_count {
                return Ok(None);
            }
            let entry = self.read_entry(file, index)?;
            Ok((entry.hash == hash).then_some(entry))
        })
    }

    /// Oldest entry of `hash`: the last one of its run
    pub fn try_get_oldest_entry(&self, hash: u64) -> Result<Option<IndexEntry>> {
        let target = IndexKey::new(hash, i64::MIN);
        if !self.overlaps(&IndexKey::new(hash, i64::MAX), &target) {
            return Ok(None);
        }

        self.with_reader(|file| {
            let index = self.upper_bound(file, &target)?;
            if index == 0 {
                return Ok(None);
            }
            let entry = self.read_entry(file, index - 1)?;
            Ok((entry.hash == hash).then_some(entry))
        })
    }

    /// Quick check if a key is inside [min_key, max_key]
    pub fn might_contain(&self, key: &IndexKey) -> bool {
        self.overlaps(key, key)
    }

    /// Quick check if [low, high] intersects [min_key, max_key]
    fn overlaps(&self, low: &IndexKey, high: &IndexKey) -> bool {
        match (self.min_key(), self.max_key()) {
            (Some(min), Some(max)) => *low <= max && *high >= min,
            _ => false,
        }
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Index of the first entry with key `>= target`
    fn lower_bound(&self, file: &mut File, target: &IndexKey) -> Result<u64> {
        match self.midpoints.lower_bound_window(target, self.entry_count) {
            Err(index) => Ok(index),
            Ok((lo, hi)) => self.search_window(file, lo, hi, |key| key < *target),
        }
    }

    /// Index of the first entry with key `> target`
    fn upper_bound(&self, file: &mut File, target: &IndexKey) -> Result<u64> {
        match self.midpoints.upper_bound_window(target, self.entry_count) {
            Err(index) => Ok(index),
            Ok((lo, hi)) => self.search_window(file, lo, hi, |key| key <= *target),
        }
    }

    /// Binary search in `[lo, hi]` for the first item where `before` is
    /// false; `hi` is known to satisfy that already.
    fn search_window<F>(&self, file: &mut File, mut lo: u64, mut hi: u64, before: F) -> Result<u64>
    where
        F: Fn(IndexKey) -> bool,
    {
        trace!(table = self.id, lo, hi, "searching midpoint window");
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let key = self.read_key(file, mid)?;
            if before(key) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(hi)
    }

    fn read_key(&self, file: &mut File, index: u64) -> Result<IndexKey> {
        let codec = self.codec();
        let mut buf = [0u8; 16];
        let key_buf = &mut buf[..codec.key_size()];
        file.seek(SeekFrom::Start(self.entry_offset(index)))?;
        file.read_exact(key_buf)?;
        codec.decode_key(&mut &key_buf[..])
    }

    fn read_entry(&self, file: &mut File, index: u64) -> Result<IndexEntry> {
        let codec = self.codec();
        let mut buf = [0u8; 24];
        let entry_buf = &mut buf[..codec.entry_size()];
        file.seek(SeekFrom::Start(self.entry_offset(index)))?;
        file.read_exact(entry_buf)?;
        codec.decode(entry_buf)
    }

    /// Entries `[start, end)` in one read; `end` is clamped to the table
    fn read_entries(&self, file: &mut File, start: u64, end: u64) -> Result<Vec<IndexEntry>> {
        let end = end.min(self.entry_count);
        if start >= end {
            return Ok(Vec::new());
        }
        let codec = self.codec();
        let entry_size = codec.entry_size();
        let mut raw = vec![0u8; (end - start) as usize * entry_size];
        file.seek(SeekFrom::Start(self.entry_offset(start)))?;
        file.read_exact(&mut raw)?;
        raw.chunks_exact(entry_size)
            .map(|chunk| codec.decode(chunk))
            .collect()
    }

    /// Run `f` with a pooled read handle, opening a fresh one if all are busy
    fn with_reader<T>(&self, f: impl FnOnce(&mut File) -> Result<T>) -> Result<T> {
        let mut file = match self.readers.pop() {
            Some(file) => file,
            None => File::open(&self.path)?,
        };
        let result = f(&mut file);
        // Pool full: the extra handle is simply closed
        let _ = self.readers.push(file);
        result
    }
}

/// Recompute the CRC32 of everything before the footer and compare
fn verify_checksum(file: &mut File, path: &Path, file_size: u64) -> Result<()> {
    let body_len = file_size - FOOTER_SIZE;

    file.seek(SeekFrom::Start(0))?;
    let mut reader = BufReader::with_capacity(64 * 1024, &mut *file).take(body_len);
    let mut hasher = crc32fast::Hasher::new();
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
    }
    let actual = hasher.finalize();

    file.seek(SeekFrom::Start(body_len))?;
    let mut footer = [0u8; FOOTER_SIZE as usize];
    file.read_exact(&mut footer)?;
    let expected = u32::from_le_bytes(footer);

    if expected != actual {
        return Err(IndexError::CorruptedChecksum {
            path: path.to_path_buf(),
            expected,
            actual,
            rebuild_attempts: 0,
        });
    }
    Ok(())
}
