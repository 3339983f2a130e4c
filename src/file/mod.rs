//! Container File Module
//!
//! `ImageFile` owns exactly one node tree (rooted at a Structure), the
//! extension-namespace table, and the single random-access handle the codec
//! engine issues I/O against.
//!
//! ## File Layout (logical view)
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (48 bytes, see header.rs)                        │
//! ├─────────────────────────────────────────────────────────┤
//! │ Record data packets, blob regions, side storage         │
//! │   (appended in write order, addressed via node fields)  │
//! ├─────────────────────────────────────────────────────────┤
//! │ Structural metadata (bincode: tree + extension table)   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//! Physically everything sits on CRC-checked 1 KiB pages (see paged.rs).

mod header;
pub mod paged;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::buffer::SourceDestBuffer;
use crate::codec::{CompressedVectorReader, CompressedVectorWriter};
use crate::config::Config;
use crate::error::{Result, VoxError};
use crate::tree::{NodeData, NodeId, NodeKind, Tree};

use header::{FileHeader, HEADER_SIZE, VERSION_MAJOR, VERSION_MINOR};
use paged::{logical_to_physical, physical_to_logical, PagedFile};

// =============================================================================
// Extension Table
// =============================================================================

/// Bidirectional prefix ↔ URI map for vendor field-name namespaces
///
/// Field names of the form `prefix:name` are disambiguated through this
/// table. Both prefixes and URIs are unique.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ExtensionTable {
    entries: Vec<(String, String)>,
}

impl ExtensionTable {
    /// Register a (prefix, uri) pair; both sides must be new
    pub fn add(&mut self, prefix: &str, uri: &str) -> Result<()> {
        if self.entries.iter().any(|(p, _)| p == prefix) {
            return Err(VoxError::DuplicateField(format!(
                "extension prefix '{prefix}' already registered"
            )));
        }
        if self.entries.iter().any(|(_, u)| u == uri) {
            return Err(VoxError::DuplicateField(format!(
                "extension URI '{uri}' already registered"
            )));
        }
        self.entries.push((prefix.to_string(), uri.to_string()));
        Ok(())
    }

    /// URI registered for a prefix
    pub fn lookup_uri(&self, prefix: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(p, _)| p == prefix)
            .map(|(_, u)| u.as_str())
    }

    /// Prefix registered for a URI
    pub fn lookup_prefix(&self, uri: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, u)| u == uri)
            .map(|(p, _)| p.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate (prefix, uri) pairs in registration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, u)| (p.as_str(), u.as_str()))
    }
}

// =============================================================================
// ImageFile
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

/// One open container file
///
/// Write mode: the tree starts as an empty root Structure; `close()`
/// serializes the structural metadata and finalizes the header. Read mode:
/// the tree is rebuilt from the persisted metadata.
pub struct ImageFile {
    path: PathBuf,
    paged: PagedFile,
    tree: Tree,
    extensions: ExtensionTable,
    mode: Mode,
    config: Config,
    /// Next free logical payload byte (write mode)
    end_cursor: u64,
    closed: bool,
}

impl fmt::Debug for ImageFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageFile")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("end_cursor", &self.end_cursor)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl ImageFile {
    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Create a new container file for writing
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with_config(path, Config::default())
    }

    pub fn create_with_config(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut paged = PagedFile::create(&path, config.verify_checksums)?;
        // Placeholder header; rewritten with real lengths at close()
        paged.write_at(0, &[0u8; HEADER_SIZE as usize])?;
        debug!(path = %path.display(), "created container file");
        Ok(Self {
            path,
            paged,
            tree: Tree::new(),
            extensions: ExtensionTable::default(),
            mode: Mode::Write,
            config,
            end_cursor: HEADER_SIZE,
            closed: false,
        })
    }

    /// Open an existing container file read-only
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, Config::default())
    }

    pub fn open_with_config(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut paged = PagedFile::open(&path, config.verify_checksums)?;

        let mut header_bytes = [0u8; HEADER_SIZE as usize];
        paged.read_at(0, &mut header_bytes)?;
        let header = FileHeader::decode(&header_bytes)?;

        let metadata_logical = physical_to_logical(header.metadata_physical_offset)?;
        let mut metadata = vec![0u8; header.metadata_logical_length as usize];
        paged.read_at(metadata_logical, &mut metadata)?;
        let (tree, extensions): (Tree, ExtensionTable) = bincode::deserialize(&metadata)
            .map_err(|e| VoxError::Serialization(format!("metadata section: {e}")))?;

        debug!(
            path = %path.display(),
            version = format_args!("{}.{}", header.version_major, header.version_minor),
            "opened container file"
        );
        let end_cursor = paged.logical_len();
        Ok(Self {
            path,
            paged,
            tree,
            extensions,
            mode: Mode::Read,
            config,
            end_cursor,
            closed: false,
        })
    }

    /// Finalize and release the file
    ///
    /// Write mode: serializes the structural metadata, patches the header
    /// with the final physical length and metadata location, flushes all
    /// pages and fsyncs. Either mode: the handle is unusable afterwards.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(VoxError::SessionClosed);
        }
        if self.mode == Mode::Write {
            let metadata = bincode::serialize(&(&self.tree, &self.extensions))
                .map_err(|e| VoxError::Serialization(format!("metadata section: {e}")))?;
            let metadata_offset = self.end_cursor;
            self.paged.write_at(metadata_offset, &metadata)?;
            self.end_cursor += metadata.len() as u64;

            let header = FileHeader {
                version_major: VERSION_MAJOR,
                version_minor: VERSION_MINOR,
                physical_length: self.paged.physical_len(),
                metadata_physical_offset: logical_to_physical(metadata_offset),
                metadata_logical_length: metadata.len() as u64,
            };
            self.paged.write_at(0, &header.encode())?;
            self.paged.sync()?;
            debug!(
                path = %self.path.display(),
                metadata_bytes = metadata.len(),
                "closed container file"
            );
        }
        self.closed = true;
        Ok(())
    }

    /// Abort an in-progress write: discard all written bytes and remove the
    /// file. No valid container remains.
    pub fn cancel(&mut self) -> Result<()> {
        if self.closed {
            return Err(VoxError::SessionClosed);
        }
        if self.mode != Mode::Write {
            return Err(VoxError::ReadOnly(
                "cancel() is only valid on a file open for writing".into(),
            ));
        }
        self.closed = true;
        std::fs::remove_file(&self.path)?;
        debug!(path = %self.path.display(), "cancelled container file");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Tree Access
    // -------------------------------------------------------------------------

    /// The root Structure
    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    // -------------------------------------------------------------------------
    // Extension Table
    // -------------------------------------------------------------------------

    pub fn extensions(&self) -> &ExtensionTable {
        &self.extensions
    }

    /// Register an extension namespace (write mode)
    pub fn extensions_add(&mut self, prefix: &str, uri: &str) -> Result<()> {
        if self.mode != Mode::Write {
            return Err(VoxError::ReadOnly(
                "extension table of a read-only file is fixed".into(),
            ));
        }
        self.extensions.add(prefix, uri)
    }

    // -------------------------------------------------------------------------
    // Blob I/O
    // -------------------------------------------------------------------------

    /// Create a detached Blob node and reserve its out-of-line region
    pub fn new_blob(&mut self, length: u64) -> Result<NodeId> {
        if self.mode != Mode::Write {
            return Err(VoxError::ReadOnly("cannot create a blob in read mode".into()));
        }
        let section = self.end_cursor;
        self.end_cursor += length;
        Ok(self.tree.alloc(NodeData::Blob {
            length,
            section: Some(section),
        }))
    }

    /// Partial blob read at a byte offset
    pub fn blob_read(&mut self, blob: NodeId, offset: u64, buf: &mut [u8]) -> Result<()> {
        if self.closed {
            return Err(VoxError::SessionClosed);
        }
        let (length, section) = self.blob_parts(blob)?;
        if offset + buf.len() as u64 > length {
            return Err(VoxError::OutOfRange {
                requested: offset + buf.len() as u64,
                available: length,
            });
        }
        self.paged.read_at(section + offset, buf)
    }

    /// Partial blob write at a byte offset (write mode)
    pub fn blob_write(&mut self, blob: NodeId, offset: u64, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(VoxError::SessionClosed);
        }
        if self.mode != Mode::Write {
            return Err(VoxError::ReadOnly("cannot write a blob in read mode".into()));
        }
        let (length, section) = self.blob_parts(blob)?;
        if offset + data.len() as u64 > length {
            return Err(VoxError::OutOfRange {
                requested: offset + data.len() as u64,
                available: length,
            });
        }
        self.paged.write_at(section + offset, data)
    }

    fn blob_parts(&self, blob: NodeId) -> Result<(u64, u64)> {
        match self.tree.data(blob)? {
            NodeData::Blob {
                length,
                section: Some(section),
            } => Ok((*length, *section)),
            NodeData::Blob { section: None, .. } => Err(VoxError::Format(
                "blob has no reserved region".into(),
            )),
            _ => Err(VoxError::TypeMismatch(format!(
                "{} is not a Blob",
                self.tree.path_name(blob)?
            ))),
        }
    }

    // -------------------------------------------------------------------------
    // Sessions
    // -------------------------------------------------------------------------

    /// Open a writer session on a CompressedVector node
    ///
    /// The buffer set is bound for the whole session; every prototype field
    /// must be covered.
    pub fn writer<'f, 'b>(
        &'f mut self,
        node: NodeId,
        buffers: Vec<SourceDestBuffer<'b>>,
    ) -> Result<CompressedVectorWriter<'f, 'b>> {
        if self.closed {
            return Err(VoxError::SessionClosed);
        }
        if self.mode != Mode::Write {
            return Err(VoxError::ReadOnly(
                "cannot open a writer on a read-only file".into(),
            ));
        }
        CompressedVectorWriter::new(self, node, buffers)
    }

    /// Open a reader session on a CompressedVector node
    pub fn reader<'f, 'b>(
        &'f mut self,
        node: NodeId,
        buffers: Vec<SourceDestBuffer<'b>>,
    ) -> Result<CompressedVectorReader<'f, 'b>> {
        if self.closed {
            return Err(VoxError::SessionClosed);
        }
        CompressedVectorReader::new(self, node, buffers)
    }

    // -------------------------------------------------------------------------
    // Codec Engine Internals
    // -------------------------------------------------------------------------

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn tree_internal(&mut self) -> &mut Tree {
        &mut self.tree
    }

    /// Append payload bytes at the logical end, returning their offset
    pub(crate) fn append_payload(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = self.end_cursor;
        self.paged.write_at(offset, bytes)?;
        self.end_cursor += bytes.len() as u64;
        Ok(offset)
    }

    /// Read payload bytes at a logical offset
    pub(crate) fn read_payload(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.paged.read_at(offset, buf)
    }

    pub(crate) fn assert_cv(&self, node: NodeId) -> Result<()> {
        if self.tree.kind(node)? != NodeKind::CompressedVector {
            return Err(VoxError::TypeMismatch(format!(
                "{} is not a CompressedVector",
                self.tree.path_name(node)?
            )));
        }
        Ok(())
    }
}

impl Drop for ImageFile {
    fn drop(&mut self) {
        if !self.closed && self.mode == Mode::Write {
            warn!(
                path = %self.path.display(),
                "ImageFile dropped without close(); file has no metadata section"
            );
        }
    }
}
