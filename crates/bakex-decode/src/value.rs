//! Per-type byte decoding.

use bakex_types::bytes::{i16_at, i32_at, i64_at, u16_at, u32_at, uint_at};
use bakex_types::{ColumnDef, SqlDecimal, SqlGuid, SqlType, SqlValue};

use crate::temporal;

/// Decode one column value from its raw bytes.
///
/// All numeric types are little-endian. Truncated fixed-width payloads
/// decode to NULL rather than a partial value.
#[must_use]
pub fn decode(data: &[u8], col: &ColumnDef) -> SqlValue {
    if data.is_empty() {
        return SqlValue::Null;
    }

    match col.sql_type {
        SqlType::TinyInt => SqlValue::TinyInt(data[0] as i8),
        SqlType::SmallInt => i16_at(data, 0).map_or(SqlValue::Null, SqlValue::SmallInt),
        SqlType::Int => i32_at(data, 0).map_or(SqlValue::Null, SqlValue::Int),
        SqlType::BigInt => i64_at(data, 0).map_or(SqlValue::Null, SqlValue::BigInt),
        SqlType::Bit => SqlValue::Bool(data[0] != 0),

        SqlType::Real => {
            if data.len() < 4 {
                return SqlValue::Null;
            }
            SqlValue::Real(f32::from_le_bytes([data[0], data[1], data[2], data[3]]))
        }
        SqlType::Float => {
            if data.len() < 8 {
                return SqlValue::Null;
            }
            let mut b = [0u8; 8];
            b.copy_from_slice(&data[..8]);
            SqlValue::Float(f64::from_le_bytes(b))
        }

        // Money stores the high half first; the scaled value is the
        // combined 64-bit integer over 10^4.
        SqlType::Money => {
            let (Some(hi), Some(lo)) = (i32_at(data, 0), u32_at(data, 4)) else {
                return SqlValue::Null;
            };
            let combined = (i64::from(hi) << 32) | i64::from(lo);
            SqlValue::Float(combined as f64 / 10_000.0)
        }
        SqlType::SmallMoney => {
            i32_at(data, 0).map_or(SqlValue::Null, |v| SqlValue::Float(f64::from(v) / 10_000.0))
        }

        SqlType::Decimal | SqlType::Numeric => SqlValue::Decimal(SqlDecimal::from_record_bytes(
            data,
            col.precision,
            col.scale,
        )),

        SqlType::Char | SqlType::VarChar | SqlType::Text => {
            // Single-byte text: the caller-chosen codepage is handled at
            // the sink; here the bytes pass through lossily as UTF-8.
            SqlValue::Text(String::from_utf8_lossy(data).into_owned())
        }
        SqlType::NChar | SqlType::NVarChar | SqlType::NText => {
            SqlValue::Text(utf16le_to_utf8(data))
        }

        SqlType::Binary | SqlType::VarBinary | SqlType::Image | SqlType::Timestamp => {
            SqlValue::Bytes(data.to_vec())
        }

        SqlType::UniqueIdentifier => {
            if data.len() < 16 {
                return SqlValue::Null;
            }
            let mut b = [0u8; 16];
            b.copy_from_slice(&data[..16]);
            SqlValue::Guid(SqlGuid::from_bytes(&b))
        }

        SqlType::Date => uint_at(data, 0, 3).map_or(SqlValue::Null, |days| {
            SqlValue::Text(temporal::render_date(days as i64))
        }),
        SqlType::DateTime => {
            let (Some(days), Some(ticks)) = (i32_at(data, 0), i32_at(data, 4)) else {
                return SqlValue::Null;
            };
            SqlValue::Text(temporal::render_datetime(days, ticks))
        }
        SqlType::SmallDateTime => {
            let (Some(days), Some(minutes)) = (u16_at(data, 0), u16_at(data, 2)) else {
                return SqlValue::Null;
            };
            SqlValue::Text(temporal::render_smalldatetime(days, minutes))
        }
        SqlType::DateTime2 => temporal::render_datetime2(data, col.scale)
            .map_or(SqlValue::Null, SqlValue::Text),
        SqlType::Time => {
            temporal::render_time(data, col.scale).map_or(SqlValue::Null, SqlValue::Text)
        }
        SqlType::DateTimeOffset => temporal::render_datetimeoffset(data, col.scale)
            .map_or(SqlValue::Null, SqlValue::Text),

        // sql_variant and xml payloads surface as raw bytes.
        SqlType::SqlVariant | SqlType::Xml => SqlValue::Bytes(data.to_vec()),
    }
}

/// Decode UTF-16LE to UTF-8, stopping at the first NUL.
///
/// Surrogate pairs combine into their astral code point; an unpaired
/// surrogate decodes to U+FFFD rather than corrupting the rest of the
/// string.
#[must_use]
pub fn utf16le_to_utf8(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|p| u16::from_le_bytes([p[0], p[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}
