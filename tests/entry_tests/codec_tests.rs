//! Tests for IndexEntry ordering and the entry codecs
//!
//! These tests verify:
//! - Hash ascending, event number descending ordering
//! - Exact byte layout of both widths
//! - Rejection of hashes wider than the codec
//! - Short buffers are reported, not read past

use std::cmp::Ordering;

use eventindex::entry::{compare, EntryCodec, Hash32Codec, Hash64Codec};
use eventindex::{IndexEntry, IndexError, IndexKey, IndexVersion};

// =============================================================================
// Ordering Tests
// =============================================================================

#[test]
fn test_order_is_hash_ascending() {
    let a = IndexEntry::new(1, 100, 0);
    let b = IndexEntry::new(2, 0, 0);
    assert_eq!(compare(&a, &b), Ordering::Less);
}

#[test]
fn test_order_is_event_number_descending_within_hash() {
    let newer = IndexEntry::new(7, 3, 10);
    let older = IndexEntry::new(7, 2, 20);
    assert_eq!(compare(&newer, &older), Ordering::Less);
    assert!(IndexKey::new(7, 3) < IndexKey::new(7, 0));
}

#[test]
fn test_position_does_not_take_part_in_order() {
    let a = IndexEntry::new(7, 3, 10);
    let b = IndexEntry::new(7, 3, 999);
    assert_eq!(compare(&a, &b), Ordering::Equal);
}

#[test]
fn test_sorting_groups_runs_newest_first() {
    let mut keys = vec![
        IndexKey::new(9, 5),
        IndexKey::new(7, 0),
        IndexKey::new(7, 3),
        IndexKey::new(7, 2),
    ];
    keys.sort();
    assert_eq!(
        keys,
        vec![
            IndexKey::new(7, 3),
            IndexKey::new(7, 2),
            IndexKey::new(7, 0),
            IndexKey::new(9, 5),
        ]
    );
}

// =============================================================================
// Layout Tests
// =============================================================================

#[test]
fn test_entry_sizes() {
    assert_eq!(IndexVersion::V32.entry_size(), 20);
    assert_eq!(IndexVersion::V64.entry_size(), 24);
    assert_eq!(Hash32Codec.key_size(), 12);
    assert_eq!(Hash64Codec.key_size(), 16);
}

#[test]
fn test_v64_layout_is_little_endian() {
    let entry = IndexEntry::new(0x0102030405060708, 2, 3);
    let bytes = Hash64Codec.encode_to_vec(&entry).unwrap();

    assert_eq!(bytes.len(), 24);
    assert_eq!(&bytes[0..8], &[8, 7, 6, 5, 4, 3, 2, 1]);
    assert_eq!(&bytes[8..16], &2i64.to_le_bytes());
    assert_eq!(&bytes[16..24], &3i64.to_le_bytes());
}

#[test]
fn test_v32_layout() {
    let entry = IndexEntry::new(0xdeadbeef, 42, 1_000);
    let bytes = Hash32Codec.encode_to_vec(&entry).unwrap();

    assert_eq!(bytes.len(), 20);
    assert_eq!(&bytes[0..4], &0xdeadbeefu32.to_le_bytes());
    assert_eq!(Hash32Codec.decode(&bytes).unwrap(), entry);
}

#[test]
fn test_decode_both_widths() {
    for version in [IndexVersion::V32, IndexVersion::V64] {
        let codec = version.codec();
        let entry = IndexEntry::new(0x1234, i64::MAX, 77);
        let bytes = codec.encode_to_vec(&entry).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), entry, "{:?}", version);
    }
}

// =============================================================================
// Error Tests
// =============================================================================

#[test]
fn test_v32_rejects_wide_hash() {
    let entry = IndexEntry::new(u32::MAX as u64 + 1, 0, 0);
    let result = Hash32Codec.encode_to_vec(&entry);
    assert!(matches!(result, Err(IndexError::InvalidEntry(_))));
}

#[test]
fn test_decode_short_buffer() {
    let result = Hash64Codec.decode(&[0u8; 23]);
    assert!(matches!(result, Err(IndexError::Serialization(_))));
}

#[test]
fn test_version_tags() {
    assert_eq!(IndexVersion::from_u8(32), Some(IndexVersion::V32));
    assert_eq!(IndexVersion::from_u8(64), Some(IndexVersion::V64));
    assert_eq!(IndexVersion::from_u8(1), None);
    assert_eq!(IndexVersion::V32.truncate_hash(0xaaaa_bbbb_cccc_dddd), 0xcccc_dddd);
}
