//! SQL Server column type codes (`sys.types.system_type_id`).

/// One-byte system type identifier of a column.
///
/// The discriminants match the on-disk `system_type_id` values recovered
/// from the column catalog, so `SqlType::from_raw` is a straight lookup.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(u8)]
pub enum SqlType {
    Image = 34,
    Text = 35,
    UniqueIdentifier = 36,
    Date = 40,
    Time = 41,
    DateTime2 = 42,
    DateTimeOffset = 43,
    TinyInt = 48,
    SmallInt = 52,
    Int = 56,
    SmallDateTime = 58,
    Real = 59,
    Money = 60,
    DateTime = 61,
    Float = 62,
    SqlVariant = 98,
    NText = 99,
    Bit = 104,
    Decimal = 106,
    Numeric = 108,
    SmallMoney = 122,
    BigInt = 127,
    VarBinary = 165,
    VarChar = 167,
    Binary = 173,
    Char = 175,
    Timestamp = 189,
    NVarChar = 231,
    NChar = 239,
    Xml = 241,
}

impl SqlType {
    /// Map a raw `system_type_id` byte to a known type.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            34 => Self::Image,
            35 => Self::Text,
            36 => Self::UniqueIdentifier,
            40 => Self::Date,
            41 => Self::Time,
            42 => Self::DateTime2,
            43 => Self::DateTimeOffset,
            48 => Self::TinyInt,
            52 => Self::SmallInt,
            56 => Self::Int,
            58 => Self::SmallDateTime,
            59 => Self::Real,
            60 => Self::Money,
            61 => Self::DateTime,
            62 => Self::Float,
            98 => Self::SqlVariant,
            99 => Self::NText,
            104 => Self::Bit,
            106 => Self::Decimal,
            108 => Self::Numeric,
            122 => Self::SmallMoney,
            127 => Self::BigInt,
            165 => Self::VarBinary,
            167 => Self::VarChar,
            173 => Self::Binary,
            175 => Self::Char,
            189 => Self::Timestamp,
            231 => Self::NVarChar,
            239 => Self::NChar,
            241 => Self::Xml,
            _ => return None,
        })
    }

    /// The raw `system_type_id` byte.
    #[must_use]
    pub const fn raw(self) -> u8 {
        self as u8
    }

    /// Whether values of this type live in the fixed-length region of a
    /// FixedVar record.
    ///
    /// Decimals and padded char/binary are fixed-width for a given column
    /// declaration even though their width varies between declarations.
    #[must_use]
    pub const fn is_fixed_length(self) -> bool {
        matches!(
            self,
            Self::TinyInt
                | Self::SmallInt
                | Self::Int
                | Self::BigInt
                | Self::Bit
                | Self::Float
                | Self::Real
                | Self::Money
                | Self::SmallMoney
                | Self::Date
                | Self::Time
                | Self::DateTime
                | Self::DateTime2
                | Self::DateTimeOffset
                | Self::SmallDateTime
                | Self::UniqueIdentifier
                | Self::Timestamp
                | Self::Decimal
                | Self::Numeric
                | Self::Char
                | Self::NChar
                | Self::Binary
        )
    }

    /// Whether text of this type is stored as UTF-16LE.
    #[must_use]
    pub const fn is_unicode(self) -> bool {
        matches!(self, Self::NChar | Self::NVarChar | Self::NText)
    }

    /// Whether this is a large-object type stored out of row.
    #[must_use]
    pub const fn is_lob(self) -> bool {
        matches!(self, Self::Text | Self::NText | Self::Image | Self::Xml)
    }

    /// Display name as it would appear in a schema listing.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Text => "text",
            Self::UniqueIdentifier => "uniqueidentifier",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime2 => "datetime2",
            Self::DateTimeOffset => "datetimeoffset",
            Self::TinyInt => "tinyint",
            Self::SmallInt => "smallint",
            Self::Int => "int",
            Self::SmallDateTime => "smalldatetime",
            Self::Real => "real",
            Self::Money => "money",
            Self::DateTime => "datetime",
            Self::Float => "float",
            Self::SqlVariant => "sql_variant",
            Self::NText => "ntext",
            Self::Bit => "bit",
            Self::Decimal => "decimal",
            Self::Numeric => "numeric",
            Self::SmallMoney => "smallmoney",
            Self::BigInt => "bigint",
            Self::VarBinary => "varbinary",
            Self::VarChar => "varchar",
            Self::Binary => "binary",
            Self::Char => "char",
            Self::Timestamp => "timestamp",
            Self::NVarChar => "nvarchar",
            Self::NChar => "nchar",
            Self::Xml => "xml",
        }
    }
}

impl std::fmt::Display for SqlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SqlType; 30] = [
        SqlType::Image,
        SqlType::Text,
        SqlType::UniqueIdentifier,
        SqlType::Date,
        SqlType::Time,
        SqlType::DateTime2,
        SqlType::DateTimeOffset,
        SqlType::TinyInt,
        SqlType::SmallInt,
        SqlType::Int,
        SqlType::SmallDateTime,
        SqlType::Real,
        SqlType::Money,
        SqlType::DateTime,
        SqlType::Float,
        SqlType::SqlVariant,
        SqlType::NText,
        SqlType::Bit,
        SqlType::Decimal,
        SqlType::Numeric,
        SqlType::SmallMoney,
        SqlType::BigInt,
        SqlType::VarBinary,
        SqlType::VarChar,
        SqlType::Binary,
        SqlType::Char,
        SqlType::Timestamp,
        SqlType::NVarChar,
        SqlType::NChar,
        SqlType::Xml,
    ];

    #[test]
    fn raw_round_trip() {
        for t in ALL {
            assert_eq!(SqlType::from_raw(t.raw()), Some(t), "round trip for {t}");
        }
        assert_eq!(SqlType::from_raw(0), None);
        assert_eq!(SqlType::from_raw(255), None);
    }

    #[test]
    fn known_ids() {
        assert_eq!(SqlType::Int.raw(), 56);
        assert_eq!(SqlType::NVarChar.raw(), 231);
        assert_eq!(SqlType::Decimal.raw(), 106);
        assert_eq!(SqlType::UniqueIdentifier.raw(), 36);
        assert_eq!(SqlType::BigInt.raw(), 127);
    }

    #[test]
    fn fixed_vs_variable_partition() {
        for t in [
            SqlType::TinyInt,
            SqlType::Int,
            SqlType::BigInt,
            SqlType::Float,
            SqlType::Money,
            SqlType::DateTime2,
            SqlType::UniqueIdentifier,
            SqlType::Decimal,
            SqlType::Char,
            SqlType::NChar,
            SqlType::Binary,
            SqlType::Timestamp,
        ] {
            assert!(t.is_fixed_length(), "{t} should be fixed");
        }
        for t in [
            SqlType::VarChar,
            SqlType::NVarChar,
            SqlType::VarBinary,
            SqlType::Text,
            SqlType::NText,
            SqlType::Image,
            SqlType::Xml,
            SqlType::SqlVariant,
        ] {
            assert!(!t.is_fixed_length(), "{t} should be variable");
        }
    }

    #[test]
    fn unicode_and_lob_predicates() {
        assert!(SqlType::NVarChar.is_unicode());
        assert!(SqlType::NChar.is_unicode());
        assert!(SqlType::NText.is_unicode());
        assert!(!SqlType::VarChar.is_unicode());

        assert!(SqlType::Text.is_lob());
        assert!(SqlType::NText.is_lob());
        assert!(SqlType::Image.is_lob());
        assert!(SqlType::Xml.is_lob());
        assert!(!SqlType::VarBinary.is_lob());
    }
}
