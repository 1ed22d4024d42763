//! Stream hashing
//!
//! Maps a stream identifier to the 64-bit digest stored in index entries.
//! Collisions are expected; the index never resolves them, callers verify
//! stream identity against the log.

use crate::entry::IndexVersion;

/// Capability mapping a stream identifier to a 64-bit digest
pub trait StreamHasher: Send + Sync {
    fn hash(&self, stream_id: &str) -> u64;

    /// Digest reduced to the hash width of `version`
    fn hash_for(&self, stream_id: &str, version: IndexVersion) -> u64 {
        version.truncate_hash(self.hash(stream_id))
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_ALT_BASIS: u64 = 0x517cc1b727220a95;
const FNV_PRIME: u64 = 0x00000100000001b3;

/// Default hasher: two FNV-1a passes folded into one digest.
///
/// The low 32 bits come from the first pass, so truncating to the legacy
/// width keeps a full-quality 32-bit hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fnv1aStreamHasher;

impl StreamHasher for Fnv1aStreamHasher {
    fn hash(&self, stream_id: &str) -> u64 {
        let bytes = stream_id.as_bytes();
        let low = fold32(fnv1a_64(bytes, FNV_OFFSET_BASIS));
        let high = fold32(fnv1a_64(bytes, FNV_ALT_BASIS));
        ((high as u64) << 32) | low as u64
    }
}

fn fnv1a_64(data: &[u8], basis: u64) -> u64 {
    let mut hash = basis;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn fold32(hash: u64) -> u32 {
    (hash ^ (hash >> 32)) as u32
}
