//! File Header
//!
//! Fixed-size header at logical offset 0.
//!
//! ## Layout (48 bytes, little-endian)
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Magic: "VOXFILE\0" (8)                                   │
//! │ VersionMajor: u16 (2) | VersionMinor: u16 (2)            │
//! │ PhysicalLength: u64 (8)                                  │
//! │ MetadataPhysicalOffset: u64 (8)                          │
//! │ MetadataLogicalLength: u64 (8)                           │
//! │ Reserved (12)                                            │
//! └──────────────────────────────────────────────────────────┘
//! ```

use crate::error::{Result, VoxError};

/// Magic bytes identifying a voxfile container
pub(crate) const MAGIC: &[u8; 8] = b"VOXFILE\0";

/// Current format major version; readers reject anything newer
pub(crate) const VERSION_MAJOR: u16 = 1;

/// Current format minor version
pub(crate) const VERSION_MINOR: u16 = 0;

/// Header size in logical bytes
pub(crate) const HEADER_SIZE: u64 = 48;

/// Decoded file header
#[derive(Debug, Clone)]
pub(crate) struct FileHeader {
    pub version_major: u16,
    pub version_minor: u16,
    /// Physical length of the whole file, pages included
    pub physical_length: u64,
    /// Physical offset of the structural metadata section
    pub metadata_physical_offset: u64,
    /// Logical length of the structural metadata section
    pub metadata_logical_length: u64,
}

impl FileHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut out = [0u8; HEADER_SIZE as usize];
        out[0..8].copy_from_slice(MAGIC);
        out[8..10].copy_from_slice(&self.version_major.to_le_bytes());
        out[10..12].copy_from_slice(&self.version_minor.to_le_bytes());
        out[12..20].copy_from_slice(&self.physical_length.to_le_bytes());
        out[20..28].copy_from_slice(&self.metadata_physical_offset.to_le_bytes());
        out[28..36].copy_from_slice(&self.metadata_logical_length.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8; HEADER_SIZE as usize]) -> Result<Self> {
        if &bytes[0..8] != MAGIC {
            return Err(VoxError::Format(format!(
                "invalid magic: expected VOXFILE, got {:?}",
                &bytes[0..8]
            )));
        }
        let version_major = u16::from_le_bytes(bytes[8..10].try_into().unwrap());
        let version_minor = u16::from_le_bytes(bytes[10..12].try_into().unwrap());
        if version_major > VERSION_MAJOR {
            return Err(VoxError::Format(format!(
                "unsupported major version: {version_major}"
            )));
        }
        Ok(Self {
            version_major,
            version_minor,
            physical_length: u64::from_le_bytes(bytes[12..20].try_into().unwrap()),
            metadata_physical_offset: u64::from_le_bytes(bytes[20..28].try_into().unwrap()),
            metadata_logical_length: u64::from_le_bytes(bytes[28..36].try_into().unwrap()),
        })
    }
}
