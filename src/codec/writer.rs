//! CompressedVector Writer
//!
//! Stateful streaming session that encodes records from bound buffers into
//! data packets. Exactly one session may be active per CompressedVector
//! node; the session mutably borrows the ImageFile, so tree mutation while
//! writing is rejected at compile time.

use std::fmt;

use tracing::{error, trace};

use crate::buffer::{shared_capacity, SourceDestBuffer};
use crate::error::{Result, VoxError};
use crate::file::ImageFile;
use crate::tree::NodeId;

use super::field::{encode_scalar, prototype_fields, FieldDesc, FieldType};
use super::packet::{
    data_packet_len, encode_data_packet, encode_empty_packet, encode_index_packet, IndexEntry,
    DATA_HEADER_SIZE,
};

/// Writer session over one CompressedVector node
///
/// Buffers are bound at construction and retained for the whole session;
/// `write_with` rebinds per call. `close()` flushes the final packet, writes
/// the index packet and side storage, and commits the record count.
pub struct CompressedVectorWriter<'f, 'b> {
    file: &'f mut ImageFile,
    node: NodeId,
    fields: Vec<FieldDesc>,
    buffers: Vec<SourceDestBuffer<'b>>,
    /// field index → index into the bound buffer set
    binding: Vec<usize>,
    capacity: usize,
    /// Staged raw values per field, drained a packet at a time
    columns: Vec<Vec<u64>>,
    staged: usize,
    records_per_packet: usize,
    entries: Vec<IndexEntry>,
    /// Side-storage bytes for String/Blob record fields, written at close
    side: Vec<u8>,
    total_records: u64,
    open: bool,
}

impl fmt::Debug for CompressedVectorWriter<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressedVectorWriter")
            .field("node", &self.node)
            .field("total_records", &self.total_records)
            .field("staged", &self.staged)
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}

impl<'f, 'b> CompressedVectorWriter<'f, 'b> {
    pub(crate) fn new(
        file: &'f mut ImageFile,
        node: NodeId,
        buffers: Vec<SourceDestBuffer<'b>>,
    ) -> Result<Self> {
        file.assert_cv(node)?;
        let (prototype, record_count, index_offset, _, writing) = file.tree().cv_parts(node)?;
        if writing {
            return Err(VoxError::SessionConflict(format!(
                "a session is already active on {}",
                file.tree().path_name(node)?
            )));
        }
        if record_count > 0 || index_offset.is_some() {
            return Err(VoxError::SessionConflict(format!(
                "{} already has committed records",
                file.tree().path_name(node)?
            )));
        }

        let fields = prototype_fields(file.tree(), prototype)?;
        if fields.is_empty() {
            return Err(VoxError::TypeMismatch(
                "prototype has no terminal fields".into(),
            ));
        }
        let binding = bind_all_fields(&fields, &buffers)?;
        let capacity = shared_capacity(&buffers)?;
        let records_per_packet = records_per_packet(&fields, file.config().effective_packet_size());

        file.tree_internal().cv_set_writing(node, true)?;
        let columns = vec![Vec::new(); fields.len()];
        Ok(Self {
            file,
            node,
            fields,
            buffers,
            binding,
            capacity,
            columns,
            staged: 0,
            records_per_packet,
            entries: Vec::new(),
            side: Vec::new(),
            total_records: 0,
            open: true,
        })
    }

    /// Encode `count` records from the session's bound buffers
    ///
    /// `count` must not exceed the shared buffer capacity. A range or type
    /// failure mid-call leaves previously flushed packets in place (only
    /// `ImageFile::cancel` discards them) but never stages a partial record.
    pub fn write(&mut self, count: usize) -> Result<()> {
        if !self.open {
            return Err(VoxError::SessionClosed);
        }
        if count > self.capacity {
            return Err(VoxError::BufferSizeMismatch {
                expected: self.capacity,
                actual: count,
            });
        }
        for record in 0..count {
            if let Err(e) = stage_record(
                &self.fields,
                &self.binding,
                &self.buffers,
                record,
                &mut self.columns,
                &mut self.side,
            ) {
                // Drop the partially staged record
                for (field, column) in self.fields.iter().zip(&mut self.columns) {
                    column.truncate(self.staged * field.values_per_record());
                }
                return Err(e);
            }
            self.staged += 1;
        }
        self.flush_full_packets()
    }

    /// Rebind overload: encode `count` records from `buffers` instead of the
    /// session's bound set
    pub fn write_with(&mut self, buffers: &[SourceDestBuffer<'_>], count: usize) -> Result<()> {
        if !self.open {
            return Err(VoxError::SessionClosed);
        }
        let binding = bind_all_fields(&self.fields, buffers)?;
        let capacity = shared_capacity(buffers)?;
        if count > capacity {
            return Err(VoxError::BufferSizeMismatch {
                expected: capacity,
                actual: count,
            });
        }
        for record in 0..count {
            if let Err(e) = stage_record(
                &self.fields,
                &binding,
                buffers,
                record,
                &mut self.columns,
                &mut self.side,
            ) {
                for (field, column) in self.fields.iter().zip(&mut self.columns) {
                    column.truncate(self.staged * field.values_per_record());
                }
                return Err(e);
            }
            self.staged += 1;
        }
        self.flush_full_packets()
    }

    /// Records committed or staged so far
    pub fn record_count(&self) -> u64 {
        self.total_records + self.staged as u64
    }

    /// Flush the final packet, write index and side storage, commit the
    /// record count, and release the session
    pub fn close(mut self) -> Result<()> {
        self.finalize()
    }

    fn flush_full_packets(&mut self) -> Result<()> {
        while self.staged >= self.records_per_packet {
            self.flush_packet(self.records_per_packet)?;
        }
        Ok(())
    }

    fn flush_packet(&mut self, records: usize) -> Result<()> {
        let front: Vec<Vec<u64>> = self
            .fields
            .iter()
            .zip(&mut self.columns)
            .map(|(field, column)| {
                column
                    .drain(..records * field.values_per_record())
                    .collect()
            })
            .collect();
        let bytes = encode_data_packet(&self.fields, &front, records);
        let offset = self.file.append_payload(&bytes)?;
        trace!(
            records,
            offset,
            bytes = bytes.len(),
            "flushed data packet"
        );
        self.entries.push(IndexEntry {
            first_record: self.total_records,
            offset,
        });
        self.total_records += records as u64;
        self.staged -= records;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.open = false;
        if self.staged > 0 {
            let staged = self.staged;
            self.flush_packet(staged)?;
        }
        if self.total_records == 0 {
            self.file.append_payload(&encode_empty_packet())?;
        }
        let index_offset = self
            .file
            .append_payload(&encode_index_packet(&self.entries))?;
        let side_offset = if self.side.is_empty() {
            None
        } else {
            Some(self.file.append_payload(&self.side)?)
        };
        self.file
            .tree_internal()
            .cv_commit(self.node, self.total_records, index_offset, side_offset)?;
        trace!(
            records = self.total_records,
            packets = self.entries.len(),
            "writer session committed"
        );
        Ok(())
    }
}

impl Drop for CompressedVectorWriter<'_, '_> {
    fn drop(&mut self) {
        if self.open {
            // Best effort; on failure the node's session flag stays set and
            // later sessions fail with SessionConflict.
            if let Err(e) = self.finalize() {
                error!(error = %e, "writer session dropped with unflushed data");
            }
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Every prototype field must have exactly one bound buffer, and every
/// buffer must name a prototype field
fn bind_all_fields(fields: &[FieldDesc], buffers: &[SourceDestBuffer<'_>]) -> Result<Vec<usize>> {
    let mut binding = Vec::with_capacity(fields.len());
    for field in fields {
        let index = buffers
            .iter()
            .position(|b| b.path_name() == field.path)
            .ok_or_else(|| {
                VoxError::UndefinedPath(format!("no buffer bound for field '{}'", field.path))
            })?;
        binding.push(index);
    }
    for buffer in buffers {
        if !fields.iter().any(|f| f.path == buffer.path_name()) {
            return Err(VoxError::UndefinedPath(format!(
                "buffer '{}' does not name a prototype field",
                buffer.path_name()
            )));
        }
    }
    Ok(binding)
}

/// Largest record count whose packet stays within the byte budget
fn records_per_packet(fields: &[FieldDesc], budget: usize) -> usize {
    let bits: usize = fields.iter().map(|f| f.bits_per_record()).sum();
    let payload_bits = budget.saturating_sub(DATA_HEADER_SIZE) * 8;
    let mut n = (payload_bits / bits.max(1)).max(1);
    while n > 1 && data_packet_len(fields, n) > budget {
        n -= 1;
    }
    n
}

/// Stage one record across all fields; variable-length fields append their
/// bytes to the side area and stage an (offset, length) reference
///
/// On failure the side area is restored; the caller rolls back the columns.
fn stage_record(
    fields: &[FieldDesc],
    binding: &[usize],
    buffers: &[SourceDestBuffer<'_>],
    record: usize,
    columns: &mut [Vec<u64>],
    side: &mut Vec<u8>,
) -> Result<()> {
    let side_mark = side.len();
    let result = stage_fields(fields, binding, buffers, record, columns, side);
    if result.is_err() {
        side.truncate(side_mark);
    }
    result
}

fn stage_fields(
    fields: &[FieldDesc],
    binding: &[usize],
    buffers: &[SourceDestBuffer<'_>],
    record: usize,
    columns: &mut [Vec<u64>],
    side: &mut Vec<u8>,
) -> Result<()> {
    for (fi, field) in fields.iter().enumerate() {
        let buffer = &buffers[binding[fi]];
        if field.is_variable() {
            let bytes = match field.ty {
                FieldType::String => buffer.fetch_string(record)?.into_bytes(),
                _ => buffer.fetch_bytes(record)?,
            };
            columns[fi].push(side.len() as u64);
            columns[fi].push(bytes.len() as u64);
            side.extend_from_slice(&bytes);
        } else {
            let raw = encode_scalar(field, buffer, record)?;
            columns[fi].push(raw);
        }
    }
    Ok(())
}
