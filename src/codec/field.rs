//! Prototype Fields
//!
//! The depth-first leaf traversal of a CompressedVector's prototype defines
//! an ordered list of named, typed fields; each field's on-disk bit width is
//! derived from its type, bounds, or precision. This module extracts that
//! list and converts single scalars between memory values and raw bits.

use crate::buffer::SourceDestBuffer;
use crate::error::{Result, VoxError};
use crate::tree::{NodeData, NodeId, Precision, Tree};

/// Type descriptor of one terminal prototype field
#[derive(Debug, Clone)]
pub(crate) enum FieldType {
    Integer {
        minimum: i64,
        maximum: i64,
    },
    ScaledInteger {
        minimum: i64,
        maximum: i64,
        scale: f64,
        offset: f64,
    },
    Float {
        precision: Precision,
    },
    String,
    Blob,
}

/// One terminal field of a prototype, in depth-first order
#[derive(Debug, Clone)]
pub(crate) struct FieldDesc {
    /// Slash-joined path relative to the prototype root
    pub path: String,
    pub ty: FieldType,
}

impl FieldDesc {
    /// Raw values stored per record in this field's bit run
    ///
    /// Variable-length fields store a side-storage reference as two 64-bit
    /// values (offset, length); everything else stores one value.
    pub fn values_per_record(&self) -> usize {
        match self.ty {
            FieldType::String | FieldType::Blob => 2,
            _ => 1,
        }
    }

    /// Bit width of one raw value in this field's run
    pub fn run_width(&self) -> u32 {
        match &self.ty {
            FieldType::Integer { minimum, maximum }
            | FieldType::ScaledInteger {
                minimum, maximum, ..
            } => int_bit_width(*minimum, *maximum),
            FieldType::Float {
                precision: Precision::Single,
            } => 32,
            FieldType::Float {
                precision: Precision::Double,
            } => 64,
            FieldType::String | FieldType::Blob => 64,
        }
    }

    /// Total bits this field contributes per record
    pub fn bits_per_record(&self) -> usize {
        self.run_width() as usize * self.values_per_record()
    }

    pub fn is_variable(&self) -> bool {
        matches!(self.ty, FieldType::String | FieldType::Blob)
    }
}

/// Minimal bits to represent any value in `[minimum, maximum]` as an offset
/// from `minimum`; 0 for a constant field, at most 64
pub(crate) fn int_bit_width(minimum: i64, maximum: i64) -> u32 {
    let range = (maximum as i128 - minimum as i128) as u128;
    if range == 0 {
        0
    } else {
        128 - range.leading_zeros()
    }
}

/// Depth-first leaf traversal of a prototype Structure
///
/// Nested Structures contribute their leaves with slash-joined paths.
/// Vector and CompressedVector nodes cannot appear inside a prototype.
pub(crate) fn prototype_fields(tree: &Tree, prototype: NodeId) -> Result<Vec<FieldDesc>> {
    let mut fields = Vec::new();
    collect_fields(tree, prototype, "", &mut fields)?;
    Ok(fields)
}

fn collect_fields(
    tree: &Tree,
    node: NodeId,
    prefix: &str,
    fields: &mut Vec<FieldDesc>,
) -> Result<()> {
    match tree.data(node)? {
        NodeData::Structure { children } => {
            for (name, child) in children {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                collect_fields(tree, *child, &path, fields)?;
            }
            Ok(())
        }
        NodeData::Integer {
            minimum, maximum, ..
        } => {
            fields.push(FieldDesc {
                path: prefix.to_string(),
                ty: FieldType::Integer {
                    minimum: *minimum,
                    maximum: *maximum,
                },
            });
            Ok(())
        }
        NodeData::ScaledInteger {
            minimum,
            maximum,
            scale,
            offset,
            ..
        } => {
            fields.push(FieldDesc {
                path: prefix.to_string(),
                ty: FieldType::ScaledInteger {
                    minimum: *minimum,
                    maximum: *maximum,
                    scale: *scale,
                    offset: *offset,
                },
            });
            Ok(())
        }
        NodeData::Float { precision, .. } => {
            fields.push(FieldDesc {
                path: prefix.to_string(),
                ty: FieldType::Float {
                    precision: *precision,
                },
            });
            Ok(())
        }
        NodeData::String { .. } => {
            fields.push(FieldDesc {
                path: prefix.to_string(),
                ty: FieldType::String,
            });
            Ok(())
        }
        NodeData::Blob { .. } => {
            fields.push(FieldDesc {
                path: prefix.to_string(),
                ty: FieldType::Blob,
            });
            Ok(())
        }
        NodeData::Vector { .. } | NodeData::CompressedVector { .. } => {
            Err(VoxError::TypeConstraint(format!(
                "prototype field '{prefix}' has unsupported container kind"
            )))
        }
    }
}

// =============================================================================
// Scalar Encode / Decode
// =============================================================================

/// Encode one scalar record value from a buffer into its raw bit pattern
///
/// Integer/ScaledInteger become `value - minimum` truncated to the field
/// width; Float becomes its IEEE bit pattern at the declared precision.
/// Out-of-bounds values fail with `Range`, never truncate.
pub(crate) fn encode_scalar(
    field: &FieldDesc,
    buffer: &SourceDestBuffer<'_>,
    record: usize,
) -> Result<u64> {
    match &field.ty {
        FieldType::Integer { minimum, maximum } => {
            let v = buffer.fetch_i64(record)?;
            check_bounds(&field.path, v, *minimum, *maximum)?;
            Ok((v as i128 - *minimum as i128) as u64)
        }
        FieldType::ScaledInteger {
            minimum,
            maximum,
            scale,
            offset,
        } => {
            let raw = if buffer.do_scaling() {
                let logical = buffer.fetch_f64(record, Precision::Double)?;
                logical_to_raw(&field.path, logical, *scale, *offset)?
            } else {
                buffer.fetch_i64(record)?
            };
            check_bounds(&field.path, raw, *minimum, *maximum)?;
            Ok((raw as i128 - *minimum as i128) as u64)
        }
        FieldType::Float { precision } => {
            let v = buffer.fetch_f64(record, *precision)?;
            Ok(match precision {
                Precision::Single => (v as f32).to_bits() as u64,
                Precision::Double => v.to_bits(),
            })
        }
        FieldType::String | FieldType::Blob => Err(VoxError::TypeMismatch(format!(
            "field '{}' is variable-length and has no scalar encoding",
            field.path
        ))),
    }
}

/// Decode one raw bit pattern into a buffer element; exact inverse of
/// `encode_scalar`
pub(crate) fn decode_scalar(
    field: &FieldDesc,
    raw: u64,
    buffer: &mut SourceDestBuffer<'_>,
    record: usize,
) -> Result<()> {
    match &field.ty {
        FieldType::Integer { minimum, .. } => {
            let v = (*minimum as i128 + raw as i128) as i64;
            buffer.store_i64(record, v)
        }
        FieldType::ScaledInteger {
            minimum,
            scale,
            offset,
            ..
        } => {
            let value = (*minimum as i128 + raw as i128) as i64;
            if buffer.do_scaling() {
                buffer.store_f64(record, value as f64 * scale + offset, Precision::Double)
            } else {
                buffer.store_i64(record, value)
            }
        }
        FieldType::Float { precision } => {
            let v = match precision {
                Precision::Single => f32::from_bits(raw as u32) as f64,
                Precision::Double => f64::from_bits(raw),
            };
            buffer.store_f64(record, v, *precision)
        }
        FieldType::String | FieldType::Blob => Err(VoxError::TypeMismatch(format!(
            "field '{}' is variable-length and has no scalar decoding",
            field.path
        ))),
    }
}

fn check_bounds(path: &str, value: i64, minimum: i64, maximum: i64) -> Result<()> {
    if value < minimum || value > maximum {
        return Err(VoxError::Range(format!(
            "field '{path}': {value} outside [{minimum}, {maximum}]"
        )));
    }
    Ok(())
}

/// ScaledInteger logical → raw: `round((logical - offset) / scale)`
fn logical_to_raw(path: &str, logical: f64, scale: f64, offset: f64) -> Result<i64> {
    let raw = ((logical - offset) / scale).round();
    if !raw.is_finite() || raw < i64::MIN as f64 || raw > i64::MAX as f64 {
        return Err(VoxError::Range(format!(
            "field '{path}': logical value {logical} not representable after scaling"
        )));
    }
    Ok(raw as i64)
}
