//! # voxfile
//!
//! A self-describing, hierarchical binary container format for large
//! point-cloud and imaging datasets, with:
//! - A typed node tree (Integer, ScaledInteger, Float, String, Blob,
//!   Structure, Vector, CompressedVector)
//! - A prototype-driven bit-packing codec for bulk record data
//! - CRC-checked 1 KiB physical pages beneath a logical byte stream
//! - Streaming reader/writer sessions bound to caller-owned buffers
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Caller                                  │
//! │        (builds tree, binds SourceDestBuffers)                │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                    ImageFile                                 │
//! │       (node tree arena + extension table + lifecycle)        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ Reader /    │          │  Metadata   │
//!   │ Writer      │          │  (bincode)  │
//!   └──────┬──────┘          └──────┬──────┘
//!          │                        │
//!          ▼                        ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ Codec Engine│          │  PagedFile  │
//!   │ (bit-packed │─────────▶│ (CRC pages) │
//!   │  packets)   │          └─────────────┘
//!   └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod tree;
pub mod file;
pub mod buffer;
pub mod codec;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, VoxError};
pub use config::Config;
pub use tree::{NodeData, NodeId, NodeKind, Precision, Tree};
pub use file::{ExtensionTable, ImageFile};
pub use buffer::{BufferData, SourceDestBuffer};
pub use codec::{CompressedVectorReader, CompressedVectorWriter};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of voxfile
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
