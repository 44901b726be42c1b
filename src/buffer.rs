//! Bounds-checked field reads out of record buffers.
//!
//! Every accessor takes `(buffer, offset)` explicitly; there is no shared
//! cursor advanced as a side effect of nested decodes. Fixed-width ASCII
//! numerics that fail to parse ("overflow" in the legacy decoders) are
//! substituted with the documented missing-value sentinel by the callers
//! that opt into substitution; the `try_*` forms report the failure.

use tracing::debug;

use crate::constants::missing;

/// Raw bytes of a fixed-width field, clipped to the buffer. Returns an empty
/// slice when the offset is past the end.
pub fn field_bytes(buf: &[u8], offset: usize, width: usize) -> &[u8] {
    let start = offset.min(buf.len());
    let end = (offset + width).min(buf.len());
    &buf[start..end]
}

/// Fixed-width ASCII field as text, lossy on non-UTF8 bytes. Truncated
/// fields keep whatever bytes are present.
pub fn ascii_text(buf: &[u8], offset: usize, width: usize) -> String {
    String::from_utf8_lossy(field_bytes(buf, offset, width)).into_owned()
}

/// Fixed-width ASCII integer; `None` on blank, garbled or truncated text.
pub fn try_ascii_i64(buf: &[u8], offset: usize, width: usize) -> Option<i64> {
    if offset + width > buf.len() {
        return None;
    }
    let text = std::str::from_utf8(&buf[offset..offset + width]).ok()?;
    text.trim().parse::<i64>().ok()
}

/// Fixed-width ASCII float; `None` on blank, garbled or truncated text.
pub fn try_ascii_f64(buf: &[u8], offset: usize, width: usize) -> Option<f64> {
    if offset + width > buf.len() {
        return None;
    }
    let text = std::str::from_utf8(&buf[offset..offset + width]).ok()?;
    text.trim().parse::<f64>().ok()
}

/// ASCII integer with overflow substitution.
pub fn ascii_i32(buf: &[u8], offset: usize, width: usize) -> i32 {
    match try_ascii_i64(buf, offset, width) {
        Some(v) if i32::try_from(v).is_ok() => v as i32,
        _ => {
            overflow(buf, offset, width);
            missing::INT
        }
    }
}

/// ASCII short with overflow substitution.
pub fn ascii_i16(buf: &[u8], offset: usize, width: usize) -> i16 {
    match try_ascii_i64(buf, offset, width) {
        Some(v) if i16::try_from(v).is_ok() => v as i16,
        _ => {
            overflow(buf, offset, width);
            missing::SHORT
        }
    }
}

/// Scaled ASCII float with overflow substitution.
pub fn ascii_f32(buf: &[u8], offset: usize, width: usize, scale: f32) -> f32 {
    match try_ascii_f64(buf, offset, width) {
        Some(v) => scale * v as f32,
        None => {
            overflow(buf, offset, width);
            missing::FLOAT
        }
    }
}

fn overflow(buf: &[u8], offset: usize, width: usize) {
    debug!(
        offset,
        width,
        text = %String::from_utf8_lossy(field_bytes(buf, offset, width)),
        "numeric overflow, substituting missing value"
    );
}

/// Big-endian i32; `None` when the buffer is short.
pub fn be_i32(buf: &[u8], offset: usize) -> Option<i32> {
    let b: [u8; 4] = buf.get(offset..offset + 4)?.try_into().ok()?;
    Some(i32::from_be_bytes(b))
}

/// Big-endian i16; `None` when the buffer is short.
pub fn be_i16(buf: &[u8], offset: usize) -> Option<i16> {
    let b: [u8; 2] = buf.get(offset..offset + 2)?.try_into().ok()?;
    Some(i16::from_be_bytes(b))
}

pub fn i8_at(buf: &[u8], offset: usize) -> Option<i8> {
    buf.get(offset).map(|b| *b as i8)
}

pub fn put_be_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

pub fn put_be_i16(buf: &mut [u8], offset: usize, value: i16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}
