//! Paged Physical Layer
//!
//! The physical file is a sequence of fixed-size pages; the last 4 bytes of
//! each page hold the CRC32 of the rest. Everything above this layer works in
//! the logical address space (concatenated page payloads); all length fields
//! in the format are logical lengths.
//!
//! ## Page Format
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Payload (1020 bytes)                         │
//! ├──────────────────────────────────────────────┤
//! │ CRC32 of payload: u32 LE (4 bytes)           │
//! └──────────────────────────────────────────────┘
//! ```

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Result, VoxError};

// =============================================================================
// Format Contract Constants
// =============================================================================

/// Physical page size, CRC included
pub const PAGE_SIZE: u64 = 1024;

/// Payload bytes per page
pub const PAGE_PAYLOAD: u64 = PAGE_SIZE - 4;

/// Translate a logical payload offset to its physical file offset
pub fn logical_to_physical(logical: u64) -> u64 {
    (logical / PAGE_PAYLOAD) * PAGE_SIZE + logical % PAGE_PAYLOAD
}

/// Translate a physical file offset back to a logical payload offset
///
/// Fails if the physical offset lands inside a page's CRC trailer.
pub fn physical_to_logical(physical: u64) -> Result<u64> {
    let in_page = physical % PAGE_SIZE;
    if in_page >= PAGE_PAYLOAD {
        return Err(VoxError::Format(format!(
            "physical offset {physical} points into a page checksum"
        )));
    }
    Ok((physical / PAGE_SIZE) * PAGE_PAYLOAD + in_page)
}

// =============================================================================
// PagedFile
// =============================================================================

/// Random-access logical byte stream over a CRC-paged physical file
///
/// Keeps a one-page cache; reads verify the page CRC (when enabled), writes
/// recompute it on flush.
pub struct PagedFile {
    file: File,
    page: Box<[u8]>,
    page_index: Option<u64>,
    dirty: bool,
    writable: bool,
    verify_checksums: bool,
    /// One past the highest logical byte written or read-visible
    logical_len: u64,
}

impl PagedFile {
    /// Create a new empty paged file (read/write)
    pub fn create(path: &Path, verify_checksums: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file,
            page: vec![0u8; PAGE_SIZE as usize].into_boxed_slice(),
            page_index: None,
            dirty: false,
            writable: true,
            verify_checksums,
            logical_len: 0,
        })
    }

    /// Open an existing paged file read-only
    pub fn open(path: &Path, verify_checksums: bool) -> Result<Self> {
        let file = File::open(path)?;
        let physical_len = file.metadata()?.len();
        if physical_len % PAGE_SIZE != 0 {
            return Err(VoxError::Format(format!(
                "physical length {physical_len} is not a multiple of the page size"
            )));
        }
        Ok(Self {
            file,
            page: vec![0u8; PAGE_SIZE as usize].into_boxed_slice(),
            page_index: None,
            dirty: false,
            writable: false,
            verify_checksums,
            logical_len: (physical_len / PAGE_SIZE) * PAGE_PAYLOAD,
        })
    }

    /// Logical payload length (write mode: high-water mark of writes)
    pub fn logical_len(&self) -> u64 {
        self.logical_len
    }

    /// Physical length once all pages are flushed
    pub fn physical_len(&self) -> u64 {
        self.logical_len.div_ceil(PAGE_PAYLOAD) * PAGE_SIZE
    }

    /// Read exactly `buf.len()` bytes at a logical offset
    pub fn read_at(&mut self, mut logical: u64, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            self.load_page(logical / PAGE_PAYLOAD)?;
            let in_page = (logical % PAGE_PAYLOAD) as usize;
            let n = (buf.len() - filled).min(PAGE_PAYLOAD as usize - in_page);
            buf[filled..filled + n].copy_from_slice(&self.page[in_page..in_page + n]);
            filled += n;
            logical += n as u64;
        }
        Ok(())
    }

    /// Write `buf` at a logical offset, extending the file as needed
    pub fn write_at(&mut self, mut logical: u64, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(VoxError::ReadOnly("paged file opened read-only".into()));
        }
        let mut written = 0;
        while written < buf.len() {
            self.load_page(logical / PAGE_PAYLOAD)?;
            let in_page = (logical % PAGE_PAYLOAD) as usize;
            let n = (buf.len() - written).min(PAGE_PAYLOAD as usize - in_page);
            self.page[in_page..in_page + n].copy_from_slice(&buf[written..written + n]);
            self.dirty = true;
            written += n;
            logical += n as u64;
        }
        self.logical_len = self.logical_len.max(logical);
        Ok(())
    }

    /// Flush the cached page (if dirty) to disk
    pub fn flush(&mut self) -> Result<()> {
        self.flush_page()?;
        self.file.flush()?;
        Ok(())
    }

    /// Flush and fsync
    pub fn sync(&mut self) -> Result<()> {
        self.flush_page()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn load_page(&mut self, index: u64) -> Result<()> {
        if self.page_index == Some(index) {
            return Ok(());
        }
        self.flush_page()?;

        let physical_len = self.file.metadata()?.len();
        let offset = index * PAGE_SIZE;
        if offset + PAGE_SIZE <= physical_len {
            self.file.seek(SeekFrom::Start(offset))?;
            self.file.read_exact(&mut self.page)?;
            if self.verify_checksums {
                let stored = u32::from_le_bytes(
                    self.page[PAGE_PAYLOAD as usize..].try_into().unwrap(),
                );
                let computed = crc32fast::hash(&self.page[..PAGE_PAYLOAD as usize]);
                if stored != computed {
                    self.page_index = None;
                    return Err(VoxError::CorruptPacket(format!(
                        "page {index} checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
                    )));
                }
            }
        } else if self.writable {
            // Page past EOF: fresh zeroed payload
            self.page.fill(0);
        } else {
            return Err(VoxError::Format(format!(
                "page {index} is past the end of the file"
            )));
        }
        self.page_index = Some(index);
        Ok(())
    }

    fn flush_page(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let Some(index) = self.page_index else {
            return Ok(());
        };
        let crc = crc32fast::hash(&self.page[..PAGE_PAYLOAD as usize]);
        self.page[PAGE_PAYLOAD as usize..].copy_from_slice(&crc.to_le_bytes());
        self.file.seek(SeekFrom::Start(index * PAGE_SIZE))?;
        self.file.write_all(&self.page)?;
        self.dirty = false;
        Ok(())
    }
}
