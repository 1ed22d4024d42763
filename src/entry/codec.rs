//! Entry codecs
//!
//! Fixed-width little-endian encoding of index entries. One algorithm,
//! parameterized by the width of the stream hash:
//!
//! ```text
//! V32: [hash: u32][event_number: i64][position: i64]  = 20 bytes
//! V64: [hash: u64][event_number: i64][position: i64]  = 24 bytes
//! ```

use bytes::{Buf, BufMut};

use crate::error::{IndexError, Result};

use super::{IndexEntry, IndexKey};

/// Width variant recorded in every PTable header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexVersion {
    /// Legacy tables with 32-bit stream hashes
    V32,
    /// Current tables with 64-bit stream hashes
    V64,
}

impl IndexVersion {
    /// On-disk tag
    pub fn as_u8(self) -> u8 {
        match self {
            IndexVersion::V32 => 32,
            IndexVersion::V64 => 64,
        }
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            32 => Some(IndexVersion::V32),
            64 => Some(IndexVersion::V64),
            _ => None,
        }
    }

    /// Codec strategy for this width
    pub fn codec(self) -> &'static dyn EntryCodec {
        match self {
            IndexVersion::V32 => &Hash32Codec,
            IndexVersion::V64 => &Hash64Codec,
        }
    }

    /// Reduce a 64-bit stream digest to the hash domain of this width.
    pub fn truncate_hash(self, hash: u64) -> u64 {
        match self {
            IndexVersion::V32 => hash & u32::MAX as u64,
            IndexVersion::V64 => hash,
        }
    }

    pub fn entry_size(self) -> usize {
        self.codec().entry_size()
    }
}

/// Encoding strategy for one entry width.
///
/// Implementors only describe how the hash is stored; keys and entries are
/// laid out identically for every width.
pub trait EntryCodec: Send + Sync {
    fn version(&self) -> IndexVersion;

    /// Bytes used by the stream hash
    fn hash_size(&self) -> usize;

    fn put_hash(&self, hash: u64, out: &mut Vec<u8>) -> Result<()>;

    fn get_hash(&self, buf: &mut &[u8]) -> u64;

    /// Bytes used by `(hash, event_number)`
    fn key_size(&self) -> usize {
        self.hash_size() + 8
    }

    /// Bytes used by a full entry
    fn entry_size(&self) -> usize {
        self.key_size() + 8
    }

    fn encode_key(&self, key: &IndexKey, out: &mut Vec<u8>) -> Result<()> {
        self.put_hash(key.hash, out)?;
        out.put_i64_le(key.event_number);
        Ok(())
    }

    fn decode_key(&self, buf: &mut &[u8]) -> Result<IndexKey> {
        if buf.remaining() < self.key_size() {
            return Err(IndexError::Serialization(format!(
                "need {} bytes for an index key, have {}",
                self.key_size(),
                buf.remaining()
            )));
        }
        let hash = self.get_hash(buf);
        let event_number = buf.get_i64_le();
        Ok(IndexKey::new(hash, event_number))
    }

    fn encode(&self, entry: &IndexEntry, out: &mut Vec<u8>) -> Result<()> {
        self.encode_key(&entry.key(), out)?;
        out.put_i64_le(entry.position);
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<IndexEntry> {
        if bytes.len() < self.entry_size() {
            return Err(IndexError::Serialization(format!(
                "need {} bytes for an index entry, have {}",
                self.entry_size(),
                bytes.len()
            )));
        }
        let mut buf = bytes;
        let key = self.decode_key(&mut buf)?;
        let position = buf.get_i64_le();
        Ok(IndexEntry::new(key.hash, key.event_number, position))
    }

    fn encode_to_vec(&self, entry: &IndexEntry) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.entry_size());
        self.encode(entry, &mut out)?;
        Ok(out)
    }
}

/// 32-bit hash codec (legacy tables)
#[derive(Debug, Clone, Copy, Default)]
pub struct Hash32Codec;

impl EntryCodec for Hash32Codec {
    fn version(&self) -> IndexVersion {
        IndexVersion::V32
    }

    fn hash_size(&self) -> usize {
        4
    }

    fn put_hash(&self, hash: u64, out: &mut Vec<u8>) -> Result<()> {
        let narrow = u32::try_from(hash).map_err(|_| {
            IndexError::InvalidEntry(format!(
                "hash {:#x} does not fit a 32-bit index entry",
                hash
            ))
        })?;
        out.put_u32_le(narrow);
        Ok(())
    }

    fn get_hash(&self, buf: &mut &[u8]) -> u64 {
        buf.get_u32_le() as u64
    }
}

/// 64-bit hash codec (current tables)
#[derive(Debug, Clone, Copy, Default)]
pub struct Hash64Codec;

impl EntryCodec for Hash64Codec {
    fn version(&self) -> IndexVersion {
        IndexVersion::V64
    }

    fn hash_size(&self) -> usize {
        8
    }

    fn put_hash(&self, hash: u64, out: &mut Vec<u8>) -> Result<()> {
        out.put_u64_le(hash);
        Ok(())
    }

    fn get_hash(&self, buf: &mut &[u8]) -> u64 {
        buf.get_u64_le()
    }
}
