//! Error types for voxfile
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using VoxError
pub type Result<T> = std::result::Result<T, VoxError>;

/// Unified error type for voxfile operations
#[derive(Debug, Error)]
pub enum VoxError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Container Format Errors
    // -------------------------------------------------------------------------
    #[error("Format error: {0}")]
    Format(String),

    #[error("Corrupt packet: {0}")]
    CorruptPacket(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Node Tree Errors
    // -------------------------------------------------------------------------
    #[error("Type constraint violation: {0}")]
    TypeConstraint(String),

    #[error("Duplicate field: {0}")]
    DuplicateField(String),

    #[error("Undefined path: {0}")]
    UndefinedPath(String),

    // -------------------------------------------------------------------------
    // Buffer Binding Errors
    // -------------------------------------------------------------------------
    #[error("Buffer size mismatch: expected capacity {expected}, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Value out of range: {0}")]
    Range(String),

    // -------------------------------------------------------------------------
    // Session Errors
    // -------------------------------------------------------------------------
    #[error("Session conflict: {0}")]
    SessionConflict(String),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Out of range: requested {requested}, available {available}")]
    OutOfRange { requested: u64, available: u64 },

    // -------------------------------------------------------------------------
    // Mode Errors
    // -------------------------------------------------------------------------
    #[error("File is read-only: {0}")]
    ReadOnly(String),
}
