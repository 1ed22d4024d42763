//! PTable Iterator
//!
//! Sequential iteration over all entries of a PTable in index order.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

use crate::entry::{EntryCodec, IndexEntry};
use crate::error::Result;

use super::{PTable, HEADER_SIZE};

/// Iterator over PTable entries, owning its own file handle so it can run
/// while the table keeps serving lookups.
pub struct PTableIterator {
    reader: BufReader<File>,
    codec: &'static dyn EntryCodec,
    remaining: u64,
    buf: Vec<u8>,
}

impl PTableIterator {
    fn new(table: &PTable) -> Result<Self> {
        let mut file = File::open(table.path())?;
        // Seek to start of data (after header)
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        let codec = table.codec();
        Ok(Self {
            reader: BufReader::with_capacity(64 * 1024, file),
            codec,
            remaining: table.entry_count(),
            buf: vec![0u8; codec.entry_size()],
        })
    }

    /// Entries not yet yielded
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl Iterator for PTableIterator {
    type Item = Result<IndexEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        if let Err(e) = self.reader.read_exact(&mut self.buf) {
            self.remaining = 0;
            return Some(Err(e.into()));
        }
        Some(self.codec.decode(&self.buf))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl PTable {
    /// Iterate every entry in index order
    pub fn iter(&self) -> Result<PTableIterator> {
        PTableIterator::new(self)
    }
}
