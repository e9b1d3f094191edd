//! Resolved table schemas.

use crate::sql_type::SqlType;

/// One column of a resolved table, ordered by `column_id`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ColumnDef {
    pub column_id: i32,
    pub name: String,
    pub sql_type: SqlType,
    /// Declared storage length in bytes (`-1` for MAX types).
    pub max_length: i16,
    pub precision: u8,
    pub scale: u8,
    pub is_nullable: bool,
    pub is_identity: bool,
    pub is_computed: bool,
    /// Physical offset in the fixed-data region; 0 when unknown, in which
    /// case offsets are derived by prefix-summing `max_length` from 4.
    pub leaf_offset: i32,
}

impl ColumnDef {
    /// Minimal constructor for the common case.
    #[must_use]
    pub fn new(column_id: i32, name: impl Into<String>, sql_type: SqlType, max_length: i16) -> Self {
        Self {
            column_id,
            name: name.into(),
            sql_type,
            max_length,
            precision: 0,
            scale: 0,
            is_nullable: true,
            is_identity: false,
            is_computed: false,
            leaf_offset: 0,
        }
    }

    /// Builder-style precision/scale setter for decimal and time types.
    #[must_use]
    pub fn with_precision_scale(mut self, precision: u8, scale: u8) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }
}

/// A user table resolved from the reconstructed catalog.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TableSchema {
    pub object_id: i32,
    pub schema_name: String,
    pub table_name: String,
    /// Ordered by `column_id` ascending.
    pub columns: Vec<ColumnDef>,
    /// True when the table has no clustered index.
    pub is_heap: bool,
    pub partition_count: i32,
}

impl TableSchema {
    /// `schema.table` display form.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }
}

impl Default for ColumnDef {
    fn default() -> Self {
        Self::new(0, "", SqlType::Int, 4)
    }
}
