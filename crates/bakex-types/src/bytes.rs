//! Bounds-checked little-endian field accessors.
//!
//! All multi-byte integers in SQL Server pages, records, and the backup
//! stream are little-endian. These helpers return `None` instead of
//! panicking when the requested range falls outside the buffer, which is
//! the common case when probing hostile or truncated input.

/// Read a `u16` at `offset`.
#[inline]
#[must_use]
pub fn u16_at(buf: &[u8], offset: usize) -> Option<u16> {
    let b = buf.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

/// Read an `i16` at `offset`.
#[inline]
#[must_use]
pub fn i16_at(buf: &[u8], offset: usize) -> Option<i16> {
    u16_at(buf, offset).map(|v| v as i16)
}

/// Read a `u32` at `offset`.
#[inline]
#[must_use]
pub fn u32_at(buf: &[u8], offset: usize) -> Option<u32> {
    let b = buf.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Read an `i32` at `offset`.
#[inline]
#[must_use]
pub fn i32_at(buf: &[u8], offset: usize) -> Option<i32> {
    u32_at(buf, offset).map(|v| v as i32)
}

/// Read a `u64` at `offset`.
#[inline]
#[must_use]
pub fn u64_at(buf: &[u8], offset: usize) -> Option<u64> {
    let b = buf.get(offset..offset + 8)?;
    Some(u64::from_le_bytes([
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
    ]))
}

/// Read an `i64` at `offset`.
#[inline]
#[must_use]
pub fn i64_at(buf: &[u8], offset: usize) -> Option<i64> {
    u64_at(buf, offset).map(|v| v as i64)
}

/// Read an unsigned little-endian integer of 1..=8 bytes at `offset`.
///
/// Used for the 3-byte date and the 3/4/5-byte time payloads.
#[must_use]
pub fn uint_at(buf: &[u8], offset: usize, width: usize) -> Option<u64> {
    debug_assert!(width >= 1 && width <= 8);
    let b = buf.get(offset..offset + width)?;
    let mut v = 0u64;
    for (i, &byte) in b.iter().enumerate() {
        v |= u64::from(byte) << (8 * i);
    }
    Some(v)
}
