//! Bit Packing
//!
//! Packs runs of fixed-width raw values into contiguous bits, LSB-first,
//! padded to a byte boundary per run. Widths from 0 (constant fields, no
//! bits stored) to 64 are supported.

use bytes::{BufMut, BytesMut};

use crate::error::{Result, VoxError};

/// Packed byte length of `count` values at `width` bits each
pub fn packed_len(count: usize, width: u32) -> usize {
    (count * width as usize + 7) / 8
}

/// Mask selecting the low `width` bits
fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Append `values` to `out` at `width` bits each
///
/// Values wider than `width` are masked; callers are expected to have
/// range-checked them already.
pub fn pack(values: &[u64], width: u32, out: &mut BytesMut) {
    if width == 0 {
        return;
    }
    let mut acc: u128 = 0;
    let mut nbits: u32 = 0;
    for &v in values {
        acc |= ((v & mask(width)) as u128) << nbits;
        nbits += width;
        while nbits >= 8 {
            out.put_u8(acc as u8);
            acc >>= 8;
            nbits -= 8;
        }
    }
    if nbits > 0 {
        out.put_u8(acc as u8);
    }
}

/// Decode `count` values at `width` bits each from the front of `bytes`
pub fn unpack(bytes: &[u8], width: u32, count: usize) -> Result<Vec<u64>> {
    if width == 0 {
        return Ok(vec![0u64; count]);
    }
    let needed = packed_len(count, width);
    if bytes.len() < needed {
        return Err(VoxError::CorruptPacket(format!(
            "bit run truncated: need {needed} bytes, have {}",
            bytes.len()
        )));
    }
    let mut values = Vec::with_capacity(count);
    let mut acc: u128 = 0;
    let mut nbits: u32 = 0;
    let mut pos = 0;
    for _ in 0..count {
        while nbits < width {
            acc |= (bytes[pos] as u128) << nbits;
            pos += 1;
            nbits += 8;
        }
        values.push((acc as u64) & mask(width));
        acc >>= width;
        nbits -= width;
    }
    Ok(values)
}
