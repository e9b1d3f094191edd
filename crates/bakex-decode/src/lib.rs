//! FixedVar record decoding.
//!
//! A data-page record lays out as: two status bytes, a two-byte
//! end-of-fixed-data offset, the fixed-length column bytes, a two-byte
//! column count, the null bitmap, and — when the status byte says so — a
//! two-byte variable-column count, that many two-byte end offsets, then
//! the variable data. The decoder walks a page's slot array and produces
//! one typed [`Row`] per surviving record.

mod temporal;
mod value;

pub use temporal::days_to_ymd;
pub use value::utf16le_to_utf8;

use tracing::debug;

use bakex_types::bytes::u16_at;
use bakex_types::{
    PageHeader, RecordStatus, Row, SqlValue, TableSchema, slot_offset, PAGE_HEADER_SIZE, PAGE_SIZE,
};

/// Decodes records of one table from data-page images.
///
/// Construction precomputes the fixed/variable column split and the
/// fixed-region offsets; `leaf_offset` is trusted when the catalog
/// provided it and otherwise derived by prefix-summing `max_length` from
/// offset 4.
pub struct RowDecoder {
    schema: TableSchema,
    /// `(column index, fixed-region offset)` pairs in column order.
    fixed_columns: Vec<(usize, usize)>,
    /// Column indices of variable columns, in column order.
    var_columns: Vec<usize>,
}

impl RowDecoder {
    #[must_use]
    pub fn new(schema: TableSchema) -> Self {
        let mut fixed_columns = Vec::new();
        let mut var_columns = Vec::new();

        let mut next_offset = 4usize;
        for (i, col) in schema.columns.iter().enumerate() {
            if col.sql_type.is_fixed_length() && !col.sql_type.is_lob() {
                let offset = if col.leaf_offset > 0 {
                    col.leaf_offset as usize
                } else {
                    next_offset
                };
                fixed_columns.push((i, offset));
                next_offset = offset + col.max_length.max(0) as usize;
            } else {
                var_columns.push(i);
            }
        }

        Self {
            schema,
            fixed_columns,
            var_columns,
        }
    }

    /// The schema this decoder was built for.
    #[must_use]
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Decode every record on a data page.
    ///
    /// Non-data pages yield nothing. Slots whose offsets fall outside the
    /// page are reported as corruption and skipped; the page continues.
    #[must_use]
    pub fn decode_page(&self, page: &[u8]) -> Vec<Row> {
        let mut rows = Vec::new();
        let Some(header) = PageHeader::parse(page) else {
            return rows;
        };
        if !header.is_data() {
            return rows;
        }

        for slot in 0..header.slot_count as usize {
            let Some(offset) = slot_offset(page, slot) else {
                continue;
            };
            let offset = offset as usize;
            if offset < PAGE_HEADER_SIZE || offset >= PAGE_SIZE - 2 {
                debug!(
                    page = %header.page_id(),
                    slot,
                    offset,
                    "slot offset outside page bounds; skipping slot"
                );
                continue;
            }

            // Forwarding stubs point at the real record elsewhere.
            let status = page[offset];
            if status & RecordStatus::TYPE_MASK == RecordStatus::FORWARDING_STUB {
                continue;
            }

            if let Some(row) = self.decode_row(page, offset) {
                rows.push(row);
            }
        }
        rows
    }

    /// Decode one record at `offset` within a page image.
    ///
    /// Returns `None` when the record's own offsets don't fit the page;
    /// every produced value's bytes lie entirely within the page.
    #[must_use]
    pub fn decode_row(&self, page: &[u8], offset: usize) -> Option<Row> {
        let rec = page.get(offset..)?;
        if rec.len() < 4 {
            return None;
        }

        let status_a = rec[0];
        let has_null_bitmap = status_a & RecordStatus::HAS_NULL_BITMAP != 0;
        let has_var_columns = status_a & RecordStatus::HAS_VAR_COLUMNS != 0;

        let fixed_end = u16_at(rec, 2)? as usize;
        if fixed_end > rec.len() || fixed_end < 4 {
            debug!(offset, fixed_end, "fixed-data end offset out of bounds");
            return None;
        }

        // Null bitmap: a column count then one bit per column.
        let column_count = self.schema.columns.len();
        let mut null_bits = vec![false; column_count];
        let mut null_area = 0usize;
        if has_null_bitmap {
            if let Some(rec_columns) = u16_at(rec, fixed_end) {
                let bitmap_bytes = (rec_columns as usize + 7) / 8;
                null_area = 2 + bitmap_bytes;
                if fixed_end + null_area <= rec.len() {
                    let bitmap = &rec[fixed_end + 2..fixed_end + 2 + bitmap_bytes];
                    for col in 0..column_count.min(rec_columns as usize) {
                        if bitmap[col / 8] & (1 << (col % 8)) != 0 {
                            null_bits[col] = true;
                        }
                    }
                } else {
                    null_area = 0;
                }
            }
        }

        // Variable-column end-offset array.
        let mut var_ends: Vec<u16> = Vec::new();
        let mut var_data_start = fixed_end + null_area;
        if has_var_columns && var_data_start + 2 <= rec.len() {
            let var_count = u16_at(rec, var_data_start)? as usize;
            var_data_start += 2;
            for _ in 0..var_count {
                let Some(end) = u16_at(rec, var_data_start) else {
                    break;
                };
                var_ends.push(end);
                var_data_start += 2;
            }
        }

        let mut row = vec![SqlValue::Null; column_count];

        // Fixed columns.
        for &(ci, col_offset) in &self.fixed_columns {
            if null_bits[ci] {
                continue;
            }
            let col = &self.schema.columns[ci];
            let col_offset = col_offset.max(4);
            if col_offset >= fixed_end {
                continue;
            }
            let avail = (fixed_end - col_offset).min(col.max_length.max(0) as usize);
            row[ci] = value::decode(&rec[col_offset..col_offset + avail], col);
        }

        // Variable columns.
        for (vi, &ci) in self.var_columns.iter().enumerate() {
            if null_bits[ci] {
                continue;
            }
            let Some(&raw_end) = var_ends.get(vi) else {
                continue;
            };
            let start = if vi == 0 {
                var_data_start
            } else {
                usize::from(var_ends[vi - 1] & 0x7FFF)
            };

            // The top bit marks a complex column: an overflow/LOB pointer
            // this decoder does not chase.
            if raw_end & 0x8000 != 0 {
                row[ci] = SqlValue::Text("[LOB data]".to_owned());
                continue;
            }
            let end = usize::from(raw_end);
            if start >= end || end > rec.len() {
                continue;
            }
            row[ci] = value::decode(&rec[start..end], &self.schema.columns[ci]);
        }

        Some(row)
    }
}

#[cfg(test)]
mod tests;
