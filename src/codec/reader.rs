//! CompressedVector Reader
//!
//! Stateful streaming session that decodes successive data packets into
//! bound buffers. The record cursor advances by exactly the delivered count;
//! end of stream is reported as 0 and is terminal and idempotent. Seeks go
//! through the index packet.

use std::fmt;

use tracing::trace;

use crate::buffer::{shared_capacity, SourceDestBuffer};
use crate::error::{Result, VoxError};
use crate::file::ImageFile;
use crate::tree::NodeId;

use super::field::{decode_scalar, prototype_fields, FieldDesc, FieldType};
use super::packet::{
    decode_data_packet, decode_header, decode_index_packet, IndexEntry, DATA_PACKET_MAX,
    INDEX_ENTRY_SIZE, INDEX_HEADER_SIZE, KIND_DATA, PACKET_HEADER_SIZE,
};

/// One decoded data packet held for the cursor's current position
struct CachedPacket {
    entry_index: usize,
    first_record: u64,
    records: usize,
    columns: Vec<Vec<u64>>,
}

/// Reader session over one CompressedVector node
///
/// Buffers bound at construction may cover any subset of the prototype
/// fields; `read_with` rebinds per call.
pub struct CompressedVectorReader<'f, 'b> {
    file: &'f mut ImageFile,
    fields: Vec<FieldDesc>,
    buffers: Vec<SourceDestBuffer<'b>>,
    /// (field index, buffer index) for each bound field
    binding: Vec<(usize, usize)>,
    entries: Vec<IndexEntry>,
    record_count: u64,
    side_offset: Option<u64>,
    cursor: u64,
    cached: Option<CachedPacket>,
}

impl fmt::Debug for CompressedVectorReader<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressedVectorReader")
            .field("record_count", &self.record_count)
            .field("cursor", &self.cursor)
            .field("packets", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl<'f, 'b> CompressedVectorReader<'f, 'b> {
    pub(crate) fn new(
        file: &'f mut ImageFile,
        node: NodeId,
        buffers: Vec<SourceDestBuffer<'b>>,
    ) -> Result<Self> {
        file.assert_cv(node)?;
        let (prototype, record_count, index_offset, side_offset, writing) =
            file.tree().cv_parts(node)?;
        if writing {
            return Err(VoxError::SessionConflict(format!(
                "a writer session is active on {}",
                file.tree().path_name(node)?
            )));
        }
        let fields = prototype_fields(file.tree(), prototype)?;
        let binding = bind_subset(&fields, &buffers)?;
        shared_capacity(&buffers)?;

        let entries = match index_offset {
            Some(offset) => load_index(file, offset, record_count)?,
            None if record_count == 0 => Vec::new(),
            None => {
                return Err(VoxError::Format(format!(
                    "{} has records but no index packet",
                    file.tree().path_name(node)?
                )))
            }
        };
        trace!(record_count, packets = entries.len(), "reader session opened");
        Ok(Self {
            file,
            fields,
            buffers,
            binding,
            entries,
            record_count,
            side_offset,
            cursor: 0,
            cached: None,
        })
    }

    /// Fill the session's bound buffers from the cursor, returning the number
    /// of records delivered; 0 means end of stream (terminal)
    pub fn read(&mut self) -> Result<usize> {
        fill_records(
            self.file,
            &self.fields,
            &self.entries,
            self.record_count,
            self.side_offset,
            &mut self.cursor,
            &mut self.cached,
            &self.binding,
            &mut self.buffers,
        )
    }

    /// Rebind overload: fill `buffers` instead of the session's bound set
    pub fn read_with(&mut self, buffers: &mut [SourceDestBuffer<'_>]) -> Result<usize> {
        let binding = bind_subset(&self.fields, buffers)?;
        shared_capacity(buffers)?;
        fill_records(
            self.file,
            &self.fields,
            &self.entries,
            self.record_count,
            self.side_offset,
            &mut self.cursor,
            &mut self.cached,
            &binding,
            buffers,
        )
    }

    /// Reposition the cursor to absolute record number `n`
    ///
    /// `n == record_count` positions at end of stream; anything larger fails
    /// with `OutOfRange`.
    pub fn seek(&mut self, record_number: u64) -> Result<()> {
        if record_number > self.record_count {
            return Err(VoxError::OutOfRange {
                requested: record_number,
                available: self.record_count,
            });
        }
        self.cursor = record_number;
        Ok(())
    }

    /// Total committed records in the vector
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Release the session without modifying file state
    pub fn close(self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Buffers may cover a non-empty subset of prototype fields, and each must
/// name one
fn bind_subset(
    fields: &[FieldDesc],
    buffers: &[SourceDestBuffer<'_>],
) -> Result<Vec<(usize, usize)>> {
    if buffers.is_empty() {
        return Err(VoxError::TypeMismatch(
            "a reader needs at least one bound buffer".into(),
        ));
    }
    let mut binding = Vec::with_capacity(buffers.len());
    for (bi, buffer) in buffers.iter().enumerate() {
        let fi = fields
            .iter()
            .position(|f| f.path == buffer.path_name())
            .ok_or_else(|| {
                VoxError::UndefinedPath(format!(
                    "buffer '{}' does not name a prototype field",
                    buffer.path_name()
                ))
            })?;
        binding.push((fi, bi));
    }
    Ok(binding)
}

fn load_index(file: &mut ImageFile, offset: u64, record_count: u64) -> Result<Vec<IndexEntry>> {
    let mut header = [0u8; PACKET_HEADER_SIZE];
    file.read_payload(offset, &mut header)?;
    let parsed = decode_header(&header)?;
    // A data packet carries at least one record, so the index cannot have
    // more entries than records; bounds the staging allocation.
    let max_len = (record_count.saturating_mul(INDEX_ENTRY_SIZE as u64))
        .saturating_add(INDEX_HEADER_SIZE as u64);
    if parsed.length as u64 > max_len {
        return Err(VoxError::CorruptPacket(format!(
            "index packet length {} exceeds the maximum for {record_count} records",
            parsed.length
        )));
    }
    let mut bytes = vec![0u8; parsed.length as usize];
    file.read_payload(offset, &mut bytes)?;
    decode_index_packet(&bytes)
}

fn load_packet(
    file: &mut ImageFile,
    fields: &[FieldDesc],
    entry: IndexEntry,
    entry_index: usize,
) -> Result<CachedPacket> {
    let mut header = [0u8; PACKET_HEADER_SIZE];
    file.read_payload(entry.offset, &mut header)?;
    let parsed = decode_header(&header)?;
    if parsed.kind != KIND_DATA {
        return Err(VoxError::CorruptPacket(format!(
            "index entry points at packet kind {}",
            parsed.kind
        )));
    }
    if parsed.length as usize > DATA_PACKET_MAX {
        return Err(VoxError::CorruptPacket(format!(
            "data packet length {} exceeds the format maximum",
            parsed.length
        )));
    }
    let mut bytes = vec![0u8; parsed.length as usize];
    file.read_payload(entry.offset, &mut bytes)?;
    let packet = decode_data_packet(&bytes, fields)?;
    trace!(
        offset = entry.offset,
        records = packet.record_count,
        "decoded data packet"
    );
    Ok(CachedPacket {
        entry_index,
        first_record: entry.first_record,
        records: packet.record_count,
        columns: packet.columns,
    })
}

fn read_side(file: &mut ImageFile, side_offset: Option<u64>, offset: u64, length: u64) -> Result<Vec<u8>> {
    let base = side_offset.ok_or_else(|| {
        VoxError::CorruptPacket("variable-length field without side storage".into())
    })?;
    let mut bytes = vec![0u8; length as usize];
    file.read_payload(base + offset, &mut bytes)?;
    Ok(bytes)
}

#[allow(clippy::too_many_arguments)]
fn fill_records(
    file: &mut ImageFile,
    fields: &[FieldDesc],
    entries: &[IndexEntry],
    record_count: u64,
    side_offset: Option<u64>,
    cursor: &mut u64,
    cached: &mut Option<CachedPacket>,
    binding: &[(usize, usize)],
    buffers: &mut [SourceDestBuffer<'_>],
) -> Result<usize> {
    let capacity = shared_capacity(buffers)?;
    let mut delivered = 0usize;

    while delivered < capacity && *cursor < record_count {
        let entry_index = entries
            .partition_point(|e| e.first_record <= *cursor)
            .checked_sub(1)
            .ok_or_else(|| {
                VoxError::CorruptPacket(format!("no index entry covers record {cursor}"))
            })?;
        if cached.as_ref().map(|c| c.entry_index) != Some(entry_index) {
            *cached = Some(load_packet(file, fields, entries[entry_index], entry_index)?);
        }
        let Some(packet) = cached.as_ref() else {
            return Err(VoxError::CorruptPacket("packet cache invalidated".into()));
        };

        let intra = (*cursor - packet.first_record) as usize;
        if intra >= packet.records {
            return Err(VoxError::CorruptPacket(format!(
                "index entry does not cover record {cursor}"
            )));
        }
        let take = (capacity - delivered).min(packet.records - intra);

        for &(fi, bi) in binding {
            let field = &fields[fi];
            let column = &packet.columns[fi];
            if field.is_variable() {
                for j in 0..take {
                    let offset = column[(intra + j) * 2];
                    let length = column[(intra + j) * 2 + 1];
                    let bytes = read_side(file, side_offset, offset, length)?;
                    match field.ty {
                        FieldType::String => {
                            let text = String::from_utf8(bytes).map_err(|_| {
                                VoxError::CorruptPacket(format!(
                                    "invalid UTF-8 in string field '{}'",
                                    field.path
                                ))
                            })?;
                            buffers[bi].store_string(delivered + j, text)?;
                        }
                        _ => buffers[bi].store_bytes(delivered + j, bytes)?,
                    }
                }
            } else {
                for j in 0..take {
                    decode_scalar(field, column[intra + j], &mut buffers[bi], delivered + j)?;
                }
            }
        }

        *cursor += take as u64;
        delivered += take;
    }
    Ok(delivered)
}
