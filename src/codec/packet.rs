//! Packet Framing
//!
//! Records are grouped into self-delimited, length-prefixed packets. All
//! offsets and lengths here are logical (the paged layer hides the physical
//! CRC overhead).
//!
//! ## Packet Formats (little-endian)
//! ```text
//! Common header (6 bytes)
//!   Kind: u8 | Reserved: u8 | LogicalLength: u32 (whole packet)
//!
//! Data packet
//!   Header (6) | RecordCount: u32 | Reserved: u16
//!   then one bit-packed run per prototype field, in field order,
//!   each run padded to a byte boundary (column-major layout)
//!
//! Index packet
//!   Header (6) | EntryCount: u32 | Reserved: u16
//!   then EntryCount entries: FirstRecord: u64 | PacketOffset: u64
//!
//! Empty packet
//!   Header (6) only — a zero-record placeholder
//! ```

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, VoxError};

use super::bitpack;
use super::field::FieldDesc;

// =============================================================================
// Format Contract Constants
// =============================================================================

/// Maximum logical length of a data packet, header included. Bounds the
/// staging buffer a reader must allocate.
pub const DATA_PACKET_MAX: usize = 64 * 1024;

pub(crate) const KIND_INDEX: u8 = 0;
pub(crate) const KIND_DATA: u8 = 1;
pub(crate) const KIND_EMPTY: u8 = 2;

pub(crate) const PACKET_HEADER_SIZE: usize = 6;
pub(crate) const DATA_HEADER_SIZE: usize = PACKET_HEADER_SIZE + 6;
pub(crate) const INDEX_HEADER_SIZE: usize = PACKET_HEADER_SIZE + 6;
pub(crate) const INDEX_ENTRY_SIZE: usize = 16;

// =============================================================================
// Common Header
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub(crate) struct PacketHeader {
    pub kind: u8,
    /// Logical length of the whole packet, header included
    pub length: u32,
}

pub(crate) fn decode_header(bytes: &[u8; PACKET_HEADER_SIZE]) -> Result<PacketHeader> {
    let kind = bytes[0];
    if kind != KIND_INDEX && kind != KIND_DATA && kind != KIND_EMPTY {
        return Err(VoxError::CorruptPacket(format!("unknown packet kind {kind}")));
    }
    let length = u32::from_le_bytes(bytes[2..6].try_into().unwrap());
    if (length as usize) < PACKET_HEADER_SIZE {
        return Err(VoxError::CorruptPacket(format!(
            "packet length {length} shorter than its header"
        )));
    }
    Ok(PacketHeader { kind, length })
}

fn put_header(out: &mut BytesMut, kind: u8, length: usize) {
    out.put_u8(kind);
    out.put_u8(0);
    out.put_u32_le(length as u32);
}

// =============================================================================
// Data Packets
// =============================================================================

/// Logical length of a data packet carrying `records` records
pub(crate) fn data_packet_len(fields: &[FieldDesc], records: usize) -> usize {
    DATA_HEADER_SIZE
        + fields
            .iter()
            .map(|f| bitpack::packed_len(records * f.values_per_record(), f.run_width()))
            .sum::<usize>()
}

/// Assemble a data packet from per-field raw value columns
///
/// `columns[i]` holds `records * fields[i].values_per_record()` raw values.
pub(crate) fn encode_data_packet(
    fields: &[FieldDesc],
    columns: &[Vec<u64>],
    records: usize,
) -> BytesMut {
    let total = data_packet_len(fields, records);
    let mut out = BytesMut::with_capacity(total);
    put_header(&mut out, KIND_DATA, total);
    out.put_u32_le(records as u32);
    out.put_u16_le(0);
    for (field, column) in fields.iter().zip(columns) {
        bitpack::pack(column, field.run_width(), &mut out);
    }
    debug_assert_eq!(out.len(), total);
    out
}

/// A decoded data packet: raw value columns in prototype field order
pub(crate) struct DataPacket {
    pub record_count: usize,
    pub columns: Vec<Vec<u64>>,
}

/// Parse a whole data packet, validating the header length against the
/// per-field runs it implies
pub(crate) fn decode_data_packet(bytes: &[u8], fields: &[FieldDesc]) -> Result<DataPacket> {
    if bytes.len() < DATA_HEADER_SIZE {
        return Err(VoxError::CorruptPacket(format!(
            "data packet truncated at {} bytes",
            bytes.len()
        )));
    }
    let mut cursor = &bytes[..];
    let header = decode_header(&bytes[..PACKET_HEADER_SIZE].try_into().unwrap())?;
    if header.kind != KIND_DATA {
        return Err(VoxError::CorruptPacket(format!(
            "expected data packet, found kind {}",
            header.kind
        )));
    }
    if header.length as usize != bytes.len() {
        return Err(VoxError::CorruptPacket(format!(
            "data packet length {} disagrees with section ({} bytes)",
            header.length,
            bytes.len()
        )));
    }
    cursor.advance(PACKET_HEADER_SIZE);
    let record_count = cursor.get_u32_le() as usize;
    cursor.advance(2);

    if data_packet_len(fields, record_count) != bytes.len() {
        return Err(VoxError::CorruptPacket(format!(
            "data packet length {} inconsistent with {record_count} records",
            bytes.len()
        )));
    }

    let mut columns = Vec::with_capacity(fields.len());
    for field in fields {
        let values = record_count * field.values_per_record();
        let run_len = bitpack::packed_len(values, field.run_width());
        let column = bitpack::unpack(&cursor[..run_len], field.run_width(), values)?;
        cursor.advance(run_len);
        columns.push(column);
    }
    Ok(DataPacket {
        record_count,
        columns,
    })
}

// =============================================================================
// Index Packets
// =============================================================================

/// Sparse map entry: first record number carried by the data packet at
/// `offset` (logical)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IndexEntry {
    pub first_record: u64,
    pub offset: u64,
}

pub(crate) fn encode_index_packet(entries: &[IndexEntry]) -> BytesMut {
    let total = INDEX_HEADER_SIZE + entries.len() * INDEX_ENTRY_SIZE;
    let mut out = BytesMut::with_capacity(total);
    put_header(&mut out, KIND_INDEX, total);
    out.put_u32_le(entries.len() as u32);
    out.put_u16_le(0);
    for entry in entries {
        out.put_u64_le(entry.first_record);
        out.put_u64_le(entry.offset);
    }
    out
}

pub(crate) fn decode_index_packet(bytes: &[u8]) -> Result<Vec<IndexEntry>> {
    if bytes.len() < INDEX_HEADER_SIZE {
        return Err(VoxError::CorruptPacket(format!(
            "index packet truncated at {} bytes",
            bytes.len()
        )));
    }
    let header = decode_header(&bytes[..PACKET_HEADER_SIZE].try_into().unwrap())?;
    if header.kind != KIND_INDEX {
        return Err(VoxError::CorruptPacket(format!(
            "expected index packet, found kind {}",
            header.kind
        )));
    }
    let mut cursor = &bytes[PACKET_HEADER_SIZE..];
    let entry_count = cursor.get_u32_le() as usize;
    cursor.advance(2);
    if header.length as usize != INDEX_HEADER_SIZE + entry_count * INDEX_ENTRY_SIZE
        || header.length as usize != bytes.len()
    {
        return Err(VoxError::CorruptPacket(format!(
            "index packet length {} inconsistent with {entry_count} entries",
            header.length
        )));
    }
    let mut entries = Vec::with_capacity(entry_count);
    for _ in 0..entry_count {
        entries.push(IndexEntry {
            first_record: cursor.get_u64_le(),
            offset: cursor.get_u64_le(),
        });
    }
    Ok(entries)
}

// =============================================================================
// Empty Packets
// =============================================================================

pub(crate) fn encode_empty_packet() -> [u8; PACKET_HEADER_SIZE] {
    let mut out = [0u8; PACKET_HEADER_SIZE];
    out[0] = KIND_EMPTY;
    out[2..6].copy_from_slice(&(PACKET_HEADER_SIZE as u32).to_le_bytes());
    out
}
