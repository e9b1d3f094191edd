//! Shared variable-region decoding for catalog records.
//!
//! Every system table the scanner reads stores its name (or definition)
//! as the first variable-length column. Given a record whose fixed end is
//! known and whose status byte carries the has-var-columns bit, the
//! region decomposes as: 2-byte column count, `⌈count/8⌉` null-bitmap
//! bytes, 2-byte var count, `var_count` 2-byte end offsets, then the
//! variable data itself.

use bakex_types::bytes::u16_at;
use bakex_types::RecordStatus;

/// Locate the first variable column of a record.
///
/// Returns `(start, end)` byte offsets within `rec`, top bit of the end
/// offset already cleared. `None` when the record has no plausible
/// variable region.
fn first_var_column_bounds(rec: &[u8], fixed_end: usize) -> Option<(usize, usize)> {
    let status = *rec.first()?;
    if status & RecordStatus::HAS_VAR_COLUMNS == 0 {
        return None;
    }

    let column_count = u16_at(rec, fixed_end)? as usize;
    if column_count == 0 || column_count > 256 {
        return None;
    }
    let bitmap_bytes = (column_count + 7) / 8;
    let var_area = fixed_end + 2 + bitmap_bytes;

    let var_count = u16_at(rec, var_area)? as usize;
    if var_count == 0 || var_count > 20 {
        return None;
    }
    let offsets_end = var_area + 2 + var_count * 2;
    if offsets_end >= rec.len() {
        return None;
    }

    let first_end = usize::from(u16_at(rec, var_area + 2)? & 0x7FFF);
    if first_end <= offsets_end || first_end > rec.len() {
        return None;
    }
    Some((offsets_end, first_end))
}

/// Decode the first variable column as UTF-16LE without plausibility
/// limits (module definitions can be long).
#[must_use]
pub fn extract_first_var_column(rec: &[u8], fixed_end: usize) -> Option<String> {
    let (start, end) = first_var_column_bounds(rec, fixed_end)?;
    Some(decode_utf16le(&rec[start..end]))
}

/// Decode the first variable column as a plausible object name.
///
/// Rejects unless the raw length is 2–256 bytes and the decoded text is
/// at least 75 % ASCII-printable.
#[must_use]
pub fn var_region_name(rec: &[u8], fixed_end: usize) -> Option<String> {
    let (start, end) = first_var_column_bounds(rec, fixed_end)?;
    let len = end - start;
    if !(2..=256).contains(&len) {
        return None;
    }
    let name = decode_utf16le(&rec[start..end]);
    if name.is_empty() {
        return None;
    }
    let printable = name
        .chars()
        .filter(|c| (' '..'\u{7F}').contains(c))
        .count();
    if printable * 4 < name.chars().count() * 3 {
        return None;
    }
    Some(name)
}

fn decode_utf16le(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|p| u16::from_le_bytes([p[0], p[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}
