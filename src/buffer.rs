//! Buffer Binding Module
//!
//! `SourceDestBuffer` is a named, typed, strided view over caller-owned
//! memory — the unit of data transfer between the tree and external arrays.
//! It never copies or retains data itself; the codec engine consumes it
//! during a read/write call.
//!
//! Conversion rules:
//! - `do_conversion = false`: the memory element type must exactly match the
//!   field's logical representation (Integer → i64, ScaledInteger raw → i64,
//!   Float single → f32, Float double → f64, String/Blob → owned variants).
//! - `do_conversion = true`: numeric casts in both directions; values that do
//!   not fit the destination fail with `Range` rather than truncating.
//! - `do_scaling = true`: ScaledInteger fields hold the logical value
//!   (raw * scale + offset) in memory instead of the raw integer.

use crate::error::{Result, VoxError};
use crate::tree::Precision;

// =============================================================================
// Typed Memory Views
// =============================================================================

/// Borrowed, typed view over a caller-owned array
///
/// `Strings` and `ByteArrays` carry variable-length record fields; the rest
/// are scalar element types.
pub enum BufferData<'a> {
    I8(&'a mut [i8]),
    U8(&'a mut [u8]),
    I16(&'a mut [i16]),
    U16(&'a mut [u16]),
    I32(&'a mut [i32]),
    U32(&'a mut [u32]),
    I64(&'a mut [i64]),
    U64(&'a mut [u64]),
    F32(&'a mut [f32]),
    F64(&'a mut [f64]),
    Strings(&'a mut [String]),
    ByteArrays(&'a mut [Vec<u8>]),
}

impl BufferData<'_> {
    fn len(&self) -> usize {
        match self {
            BufferData::I8(s) => s.len(),
            BufferData::U8(s) => s.len(),
            BufferData::I16(s) => s.len(),
            BufferData::U16(s) => s.len(),
            BufferData::I32(s) => s.len(),
            BufferData::U32(s) => s.len(),
            BufferData::I64(s) => s.len(),
            BufferData::U64(s) => s.len(),
            BufferData::F32(s) => s.len(),
            BufferData::F64(s) => s.len(),
            BufferData::Strings(s) => s.len(),
            BufferData::ByteArrays(s) => s.len(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            BufferData::I8(_) => "i8",
            BufferData::U8(_) => "u8",
            BufferData::I16(_) => "i16",
            BufferData::U16(_) => "u16",
            BufferData::I32(_) => "i32",
            BufferData::U32(_) => "u32",
            BufferData::I64(_) => "i64",
            BufferData::U64(_) => "u64",
            BufferData::F32(_) => "f32",
            BufferData::F64(_) => "f64",
            BufferData::Strings(_) => "String",
            BufferData::ByteArrays(_) => "Vec<u8>",
        }
    }
}

// =============================================================================
// SourceDestBuffer
// =============================================================================

/// A binding between one prototype field and one caller-owned array
pub struct SourceDestBuffer<'a> {
    path_name: String,
    data: BufferData<'a>,
    /// Elements between consecutive records (>= 1)
    stride: usize,
    do_conversion: bool,
    do_scaling: bool,
}

impl<'a> SourceDestBuffer<'a> {
    /// Bind `data` to the prototype field at `path_name`
    pub fn new(path_name: impl Into<String>, data: BufferData<'a>) -> Self {
        Self {
            path_name: path_name.into(),
            data,
            stride: 1,
            do_conversion: false,
            do_scaling: false,
        }
    }

    // Convenience constructors per element type

    pub fn i64s(path_name: impl Into<String>, data: &'a mut [i64]) -> Self {
        Self::new(path_name, BufferData::I64(data))
    }

    pub fn f32s(path_name: impl Into<String>, data: &'a mut [f32]) -> Self {
        Self::new(path_name, BufferData::F32(data))
    }

    pub fn f64s(path_name: impl Into<String>, data: &'a mut [f64]) -> Self {
        Self::new(path_name, BufferData::F64(data))
    }

    pub fn strings(path_name: impl Into<String>, data: &'a mut [String]) -> Self {
        Self::new(path_name, BufferData::Strings(data))
    }

    pub fn byte_arrays(path_name: impl Into<String>, data: &'a mut [Vec<u8>]) -> Self {
        Self::new(path_name, BufferData::ByteArrays(data))
    }

    /// Set the record stride in elements (default 1)
    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride.max(1);
        self
    }

    /// Permit casting between the memory type and the field's logical type
    pub fn with_conversion(mut self, convert: bool) -> Self {
        self.do_conversion = convert;
        self
    }

    /// Apply ScaledInteger scale/offset so memory holds logical values
    pub fn with_scaling(mut self, scale: bool) -> Self {
        self.do_scaling = scale;
        self
    }

    pub fn path_name(&self) -> &str {
        &self.path_name
    }

    /// Number of records this buffer can hold
    pub fn capacity(&self) -> usize {
        let len = self.data.len();
        if len == 0 {
            0
        } else {
            (len - 1) / self.stride + 1
        }
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn do_conversion(&self) -> bool {
        self.do_conversion
    }

    pub fn do_scaling(&self) -> bool {
        self.do_scaling
    }

    fn index(&self, record: usize) -> usize {
        record * self.stride
    }

    fn mismatch(&self, expected: &str) -> VoxError {
        VoxError::TypeMismatch(format!(
            "field '{}' requires {expected} memory, buffer holds {} (doConversion = {})",
            self.path_name,
            self.data.type_name(),
            self.do_conversion
        ))
    }

    // -------------------------------------------------------------------------
    // Typed Element Access (codec engine internals)
    // -------------------------------------------------------------------------

    pub(crate) fn fetch_i64(&self, record: usize) -> Result<i64> {
        let i = self.index(record);
        if !self.do_conversion {
            return match &self.data {
                BufferData::I64(s) => Ok(s[i]),
                _ => Err(self.mismatch("i64")),
            };
        }
        match &self.data {
            BufferData::I8(s) => Ok(s[i] as i64),
            BufferData::U8(s) => Ok(s[i] as i64),
            BufferData::I16(s) => Ok(s[i] as i64),
            BufferData::U16(s) => Ok(s[i] as i64),
            BufferData::I32(s) => Ok(s[i] as i64),
            BufferData::U32(s) => Ok(s[i] as i64),
            BufferData::I64(s) => Ok(s[i]),
            BufferData::U64(s) => i64::try_from(s[i]).map_err(|_| {
                VoxError::Range(format!(
                    "field '{}': {} does not fit an i64",
                    self.path_name, s[i]
                ))
            }),
            BufferData::F32(s) => round_to_i64(&self.path_name, s[i] as f64),
            BufferData::F64(s) => round_to_i64(&self.path_name, s[i]),
            _ => Err(self.mismatch("a numeric type")),
        }
    }

    pub(crate) fn fetch_f64(&self, record: usize, required: Precision) -> Result<f64> {
        let i = self.index(record);
        if !self.do_conversion {
            return match (&self.data, required) {
                (BufferData::F32(s), Precision::Single) => Ok(s[i] as f64),
                (BufferData::F64(s), Precision::Double) => Ok(s[i]),
                (_, Precision::Single) => Err(self.mismatch("f32")),
                (_, Precision::Double) => Err(self.mismatch("f64")),
            };
        }
        match &self.data {
            BufferData::I8(s) => Ok(s[i] as f64),
            BufferData::U8(s) => Ok(s[i] as f64),
            BufferData::I16(s) => Ok(s[i] as f64),
            BufferData::U16(s) => Ok(s[i] as f64),
            BufferData::I32(s) => Ok(s[i] as f64),
            BufferData::U32(s) => Ok(s[i] as f64),
            BufferData::I64(s) => Ok(s[i] as f64),
            BufferData::U64(s) => Ok(s[i] as f64),
            BufferData::F32(s) => Ok(s[i] as f64),
            BufferData::F64(s) => Ok(s[i]),
            _ => Err(self.mismatch("a numeric type")),
        }
    }

    pub(crate) fn fetch_string(&self, record: usize) -> Result<String> {
        let i = self.index(record);
        match &self.data {
            BufferData::Strings(s) => Ok(s[i].clone()),
            _ => Err(self.mismatch("String")),
        }
    }

    pub(crate) fn fetch_bytes(&self, record: usize) -> Result<Vec<u8>> {
        let i = self.index(record);
        match &self.data {
            BufferData::ByteArrays(s) => Ok(s[i].clone()),
            _ => Err(self.mismatch("Vec<u8>")),
        }
    }

    pub(crate) fn store_i64(&mut self, record: usize, value: i64) -> Result<()> {
        let i = self.index(record);
        if !self.do_conversion {
            return match &mut self.data {
                BufferData::I64(s) => {
                    s[i] = value;
                    Ok(())
                }
                _ => Err(self.mismatch("i64")),
            };
        }
        match &mut self.data {
            BufferData::I8(s) => s[i] = checked_int(&self.path_name, value)?,
            BufferData::U8(s) => s[i] = checked_int(&self.path_name, value)?,
            BufferData::I16(s) => s[i] = checked_int(&self.path_name, value)?,
            BufferData::U16(s) => s[i] = checked_int(&self.path_name, value)?,
            BufferData::I32(s) => s[i] = checked_int(&self.path_name, value)?,
            BufferData::U32(s) => s[i] = checked_int(&self.path_name, value)?,
            BufferData::I64(s) => s[i] = value,
            BufferData::U64(s) => s[i] = checked_int(&self.path_name, value)?,
            BufferData::F32(s) => s[i] = value as f32,
            BufferData::F64(s) => s[i] = value as f64,
            _ => {
                return Err(VoxError::TypeMismatch(format!(
                    "field '{}' requires a numeric type in memory",
                    self.path_name
                )))
            }
        }
        Ok(())
    }

    pub(crate) fn store_f64(&mut self, record: usize, value: f64, produced: Precision) -> Result<()> {
        let i = self.index(record);
        if !self.do_conversion {
            return match (&mut self.data, produced) {
                (BufferData::F32(s), Precision::Single) => {
                    s[i] = value as f32;
                    Ok(())
                }
                (BufferData::F64(s), Precision::Double) => {
                    s[i] = value;
                    Ok(())
                }
                (_, Precision::Single) => Err(self.mismatch("f32")),
                (_, Precision::Double) => Err(self.mismatch("f64")),
            };
        }
        match &mut self.data {
            BufferData::F32(s) => {
                s[i] = value as f32;
                Ok(())
            }
            BufferData::F64(s) => {
                s[i] = value;
                Ok(())
            }
            BufferData::Strings(_) | BufferData::ByteArrays(_) => Err(VoxError::TypeMismatch(
                format!("field '{}' requires a numeric type in memory", self.path_name),
            )),
            _ => {
                let rounded = round_to_i64(&self.path_name, value)?;
                self.store_i64(record, rounded)
            }
        }
    }

    pub(crate) fn store_string(&mut self, record: usize, value: String) -> Result<()> {
        let i = self.index(record);
        match &mut self.data {
            BufferData::Strings(s) => {
                s[i] = value;
                Ok(())
            }
            _ => Err(self.mismatch("String")),
        }
    }

    pub(crate) fn store_bytes(&mut self, record: usize, value: Vec<u8>) -> Result<()> {
        let i = self.index(record);
        match &mut self.data {
            BufferData::ByteArrays(s) => {
                s[i] = value;
                Ok(())
            }
            _ => Err(self.mismatch("Vec<u8>")),
        }
    }
}

// =============================================================================
// Numeric Helpers
// =============================================================================

fn round_to_i64(path: &str, value: f64) -> Result<i64> {
    if !value.is_finite() {
        return Err(VoxError::Range(format!(
            "field '{path}': non-finite value {value}"
        )));
    }
    let rounded = value.round();
    if rounded < i64::MIN as f64 || rounded > i64::MAX as f64 {
        return Err(VoxError::Range(format!(
            "field '{path}': {value} does not fit an i64"
        )));
    }
    Ok(rounded as i64)
}

fn checked_int<T: TryFrom<i64>>(path: &str, value: i64) -> Result<T> {
    T::try_from(value).map_err(|_| {
        VoxError::Range(format!(
            "field '{path}': {value} does not fit the destination element type"
        ))
    })
}

/// All buffers passed to one call must report the same capacity
pub(crate) fn shared_capacity(buffers: &[SourceDestBuffer<'_>]) -> Result<usize> {
    let mut iter = buffers.iter();
    let first = match iter.next() {
        Some(b) => b.capacity(),
        None => return Ok(0),
    };
    for b in iter {
        if b.capacity() != first {
            return Err(VoxError::BufferSizeMismatch {
                expected: first,
                actual: b.capacity(),
            });
        }
    }
    Ok(first)
}
