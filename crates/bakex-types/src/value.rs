//! Runtime value representation for decoded rows.

use std::fmt;

/// One decoded row, aligned index-for-index with the column schema.
pub type Row = Vec<SqlValue>;

/// A dynamically-typed SQL Server value.
///
/// Integer widths are preserved rather than widened so that sinks can
/// render exactly what was stored. Date and time types decode directly to
/// their canonical text rendering.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// `bit`.
    Bool(bool),
    /// `tinyint`.
    TinyInt(i8),
    /// `smallint`.
    SmallInt(i16),
    /// `int`.
    Int(i32),
    /// `bigint`.
    BigInt(i64),
    /// `real`.
    Real(f32),
    /// `float`, `money`, `smallmoney`.
    Float(f64),
    /// Text (already UTF-8) and rendered date/time values.
    Text(String),
    /// `binary`, `varbinary`, `image`, `timestamp`.
    Bytes(Vec<u8>),
    /// `decimal` / `numeric`.
    Decimal(SqlDecimal),
    /// `uniqueidentifier`.
    Guid(SqlGuid),
}

impl SqlValue {
    /// Whether this is the null token.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// A `decimal`/`numeric` value: sign plus a 128-bit little-endian
/// magnitude, scaled by `10^-scale`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SqlDecimal {
    pub positive: bool,
    pub precision: u8,
    pub scale: u8,
    /// Magnitude, little-endian.
    pub magnitude: [u8; 16],
}

impl SqlDecimal {
    /// Build from the on-disk encoding: a sign byte followed by a
    /// little-endian magnitude of up to 16 bytes.
    #[must_use]
    pub fn from_record_bytes(data: &[u8], precision: u8, scale: u8) -> Self {
        let mut magnitude = [0u8; 16];
        if let Some((&sign, rest)) = data.split_first() {
            let take = rest.len().min(16);
            magnitude[..take].copy_from_slice(&rest[..take]);
            return Self {
                positive: sign != 0,
                precision,
                scale,
                magnitude,
            };
        }
        Self {
            positive: true,
            precision,
            scale,
            magnitude,
        }
    }

    /// The magnitude as a native 128-bit integer.
    #[must_use]
    pub const fn magnitude_u128(&self) -> u128 {
        u128::from_le_bytes(self.magnitude)
    }

    /// Lossy conversion for consumers that want a float.
    #[must_use]
    pub fn to_f64(&self) -> f64 {
        let v = self.magnitude_u128() as f64 / 10f64.powi(i32::from(self.scale));
        if self.positive { v } else { -v }
    }
}

impl fmt::Display for SqlDecimal {
    /// Fixed-point rendering with exactly `scale` fractional digits.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.magnitude_u128();
        let sign = if self.positive || v == 0 { "" } else { "-" };
        if self.scale == 0 {
            return write!(f, "{sign}{v}");
        }
        let divisor = 10u128.pow(u32::from(self.scale));
        let int_part = v / divisor;
        let frac_part = v % divisor;
        write!(
            f,
            "{sign}{int_part}.{frac_part:0width$}",
            width = self.scale as usize
        )
    }
}

/// A `uniqueidentifier`, kept in on-disk byte order.
///
/// Storage is mixed-endian: the first three groups are little-endian, the
/// last eight bytes are big-endian. Rendering is uppercase with dashes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SqlGuid {
    pub bytes: [u8; 16],
}

impl SqlGuid {
    /// Build from the 16 on-disk bytes.
    #[must_use]
    pub fn from_bytes(data: &[u8; 16]) -> Self {
        Self { bytes: *data }
    }
}

impl fmt::Display for SqlGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(
            f,
            "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            b[3], b[2], b[1], b[0], b[5], b[4], b[7], b[6], b[8], b[9], b[10], b[11], b[12],
            b[13], b[14], b[15]
        )
    }
}
