//! Tests for the bit-packing primitives and the paged physical layer
//!
//! These tests verify:
//! - Bit run packing/unpacking at assorted widths (0, 1, 7, 32, 64)
//! - Byte-boundary padding per run
//! - Truncated-run detection
//! - PagedFile logical read/write across page boundaries

use bytes::BytesMut;
use tempfile::TempDir;
use voxfile::codec::bitpack::{pack, packed_len, unpack};
use voxfile::file::paged::{PagedFile, PAGE_PAYLOAD};
use voxfile::VoxError;

// =============================================================================
// Bit Packing
// =============================================================================

#[test]
fn test_packed_len() {
    assert_eq!(packed_len(0, 7), 0);
    assert_eq!(packed_len(8, 1), 1);
    assert_eq!(packed_len(9, 1), 2);
    assert_eq!(packed_len(3, 7), 3); // 21 bits -> 3 bytes
    assert_eq!(packed_len(4, 64), 32);
    assert_eq!(packed_len(100, 0), 0);
}

#[test]
fn test_pack_unpack_roundtrip_widths() {
    for width in [1u32, 2, 3, 7, 8, 13, 31, 32, 33, 63, 64] {
        let limit = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
        let values: Vec<u64> = (0..37)
            .map(|i| (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) & limit)
            .collect();
        let mut out = BytesMut::new();
        pack(&values, width, &mut out);
        assert_eq!(out.len(), packed_len(values.len(), width), "width {width}");
        let decoded = unpack(&out, width, values.len()).unwrap();
        assert_eq!(decoded, values, "width {width}");
    }
}

#[test]
fn test_width_zero_stores_nothing() {
    let mut out = BytesMut::new();
    pack(&[0, 0, 0], 0, &mut out);
    assert!(out.is_empty());
    assert_eq!(unpack(&[], 0, 3).unwrap(), vec![0, 0, 0]);
}

#[test]
fn test_one_bit_width_layout() {
    // LSB-first: bits 1,0,1,1 -> 0b00001101
    let mut out = BytesMut::new();
    pack(&[1, 0, 1, 1], 1, &mut out);
    assert_eq!(&out[..], &[0b0000_1101]);
}

#[test]
fn test_pack_masks_oversized_values() {
    let mut out = BytesMut::new();
    pack(&[0xFF], 4, &mut out);
    assert_eq!(unpack(&out, 4, 1).unwrap(), vec![0x0F]);
}

#[test]
fn test_unpack_truncated_run_fails() {
    let mut out = BytesMut::new();
    pack(&[5, 6, 7], 13, &mut out);
    let short = &out[..out.len() - 1];
    let err = unpack(short, 13, 3).unwrap_err();
    assert!(matches!(err, VoxError::CorruptPacket(_)));
}

// =============================================================================
// Paged Physical Layer
// =============================================================================

#[test]
fn test_paged_file_roundtrip_across_pages() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("pages.bin");

    let data: Vec<u8> = (0..3 * PAGE_PAYLOAD as usize + 57)
        .map(|i| (i % 251) as u8)
        .collect();
    {
        let mut paged = PagedFile::create(&path, true).unwrap();
        // Straddle the first page boundary with one write
        paged.write_at(PAGE_PAYLOAD - 10, &data[..100]).unwrap();
        paged.write_at(0, &data).unwrap();
        paged.sync().unwrap();
    }

    let mut paged = PagedFile::open(&path, true).unwrap();
    assert!(paged.logical_len() >= data.len() as u64);
    let mut back = vec![0u8; data.len()];
    paged.read_at(0, &mut back).unwrap();
    assert_eq!(back, data);

    // Unaligned read spanning two pages
    let mut mid = vec![0u8; 64];
    paged.read_at(PAGE_PAYLOAD - 32, &mut mid).unwrap();
    let start = PAGE_PAYLOAD as usize - 32;
    assert_eq!(mid, &data[start..start + 64]);
}

#[test]
fn test_paged_file_rejects_bit_rot() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("rot.bin");
    {
        let mut paged = PagedFile::create(&path, true).unwrap();
        paged.write_at(0, &[0xAB; 200]).unwrap();
        paged.sync().unwrap();
    }
    // Corrupt a payload byte behind the checksum's back
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[50] ^= 0x01;
    std::fs::write(&path, &bytes).unwrap();

    let mut paged = PagedFile::open(&path, true).unwrap();
    let mut buf = [0u8; 200];
    let err = paged.read_at(0, &mut buf).unwrap_err();
    assert!(matches!(err, VoxError::CorruptPacket(_)));
}

#[test]
fn test_paged_file_read_past_eof_fails_in_read_mode() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("short.bin");
    {
        let mut paged = PagedFile::create(&path, true).unwrap();
        paged.write_at(0, &[0x42; 100]).unwrap();
        paged.sync().unwrap();
    }
    // One page on disk; the second page does not exist
    let mut paged = PagedFile::open(&path, true).unwrap();
    let mut buf = [0u8; 8];
    let err = paged.read_at(PAGE_PAYLOAD, &mut buf).unwrap_err();
    assert!(matches!(err, VoxError::Format(_)));
}

#[test]
fn test_paged_file_checksum_verification_can_be_disabled() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("noverify.bin");
    {
        let mut paged = PagedFile::create(&path, true).unwrap();
        paged.write_at(0, &[0x11; 64]).unwrap();
        paged.sync().unwrap();
    }
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[10] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let mut paged = PagedFile::open(&path, false).unwrap();
    let mut buf = [0u8; 64];
    paged.read_at(0, &mut buf).unwrap();
    assert_eq!(buf[10], 0x11 ^ 0xFF);
}
