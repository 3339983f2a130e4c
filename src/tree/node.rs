//! Node definitions
//!
//! Defines the eight node variants of the container tree and their
//! construction-time validation.

use serde::{Deserialize, Serialize};

use crate::error::{Result, VoxError};

/// Index of a node in its ImageFile's arena.
///
/// Parent links and child lists are stored as arena indices, so the tree
/// has no reference cycles and no dangling parent pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Discriminant of a node variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Integer,
    ScaledInteger,
    Float,
    String,
    Blob,
    Structure,
    Vector,
    CompressedVector,
}

/// On-disk width of a Float leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precision {
    /// IEEE 754 single precision, 32 bits on disk
    Single,
    /// IEEE 754 double precision, 64 bits on disk
    Double,
}

/// Payload of one node in the arena
///
/// Leaf values and their bounds are fixed at construction; container
/// variants hold child NodeIds. A CompressedVector's prototype is a
/// Structure node parented to the CompressedVector itself, never reachable
/// from the tree root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeData {
    /// 64-bit signed value with inclusive bounds; on-disk width is the
    /// minimal number of bits for `maximum - minimum`.
    Integer {
        value: i64,
        minimum: i64,
        maximum: i64,
    },

    /// Integer plus scale/offset; logical value = raw * scale + offset.
    ScaledInteger {
        raw: i64,
        minimum: i64,
        maximum: i64,
        scale: f64,
        offset: f64,
    },

    /// IEEE float at single or double precision.
    Float { value: f64, precision: Precision },

    /// Variable-length text.
    String { value: std::string::String },

    /// Opaque byte range of fixed length, stored out-of-line.
    /// `section` is the logical offset of the reserved region.
    Blob { length: u64, section: Option<u64> },

    /// Named children, insertion order preserved for serialization.
    Structure { children: Vec<(std::string::String, NodeId)> },

    /// Ordered children; when `allow_hetero` is false every child after the
    /// first must share the first child's shape.
    Vector {
        children: Vec<NodeId>,
        allow_hetero: bool,
    },

    /// Ordered out-of-line sequence of fixed-schema records.
    CompressedVector {
        prototype: NodeId,
        record_count: u64,
        /// Logical offset of this vector's index packet, set at writer close.
        index_offset: Option<u64>,
        /// Logical offset of this vector's side-storage area (String/Blob
        /// record fields), set at writer close.
        side_offset: Option<u64>,
        /// True while a writer session is open (or was dropped unfinalized).
        #[serde(skip)]
        writing: bool,
    },
}

impl NodeData {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeData::Integer { .. } => NodeKind::Integer,
            NodeData::ScaledInteger { .. } => NodeKind::ScaledInteger,
            NodeData::Float { .. } => NodeKind::Float,
            NodeData::String { .. } => NodeKind::String,
            NodeData::Blob { .. } => NodeKind::Blob,
            NodeData::Structure { .. } => NodeKind::Structure,
            NodeData::Vector { .. } => NodeKind::Vector,
            NodeData::CompressedVector { .. } => NodeKind::CompressedVector,
        }
    }

    /// Validated Integer payload
    pub fn integer(value: i64, minimum: i64, maximum: i64) -> Result<Self> {
        if minimum > maximum {
            return Err(VoxError::Range(format!(
                "integer bounds inverted: [{minimum}, {maximum}]"
            )));
        }
        if value < minimum || value > maximum {
            return Err(VoxError::Range(format!(
                "integer value {value} outside [{minimum}, {maximum}]"
            )));
        }
        Ok(NodeData::Integer {
            value,
            minimum,
            maximum,
        })
    }

    /// Validated ScaledInteger payload; bounds apply to the raw value.
    pub fn scaled_integer(
        raw: i64,
        minimum: i64,
        maximum: i64,
        scale: f64,
        offset: f64,
    ) -> Result<Self> {
        if minimum > maximum {
            return Err(VoxError::Range(format!(
                "scaled integer bounds inverted: [{minimum}, {maximum}]"
            )));
        }
        if raw < minimum || raw > maximum {
            return Err(VoxError::Range(format!(
                "scaled integer raw {raw} outside [{minimum}, {maximum}]"
            )));
        }
        if !scale.is_finite() || scale == 0.0 || !offset.is_finite() {
            return Err(VoxError::Range(format!(
                "invalid scale/offset: {scale}/{offset}"
            )));
        }
        Ok(NodeData::ScaledInteger {
            raw,
            minimum,
            maximum,
            scale,
            offset,
        })
    }

    pub fn float(value: f64, precision: Precision) -> Self {
        NodeData::Float { value, precision }
    }

    pub fn string(value: impl Into<std::string::String>) -> Self {
        NodeData::String {
            value: value.into(),
        }
    }

    pub fn structure() -> Self {
        NodeData::Structure {
            children: Vec::new(),
        }
    }

    pub fn vector(allow_hetero: bool) -> Self {
        NodeData::Vector {
            children: Vec::new(),
            allow_hetero,
        }
    }
}
