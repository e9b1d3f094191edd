//! Row sinks: delimited text, JSON Lines, and the columnar stub.
//!
//! Rendering rules the sinks obey to stay lossless:
//! - NULL is empty in delimited output and `null` in JSON.
//! - Binary renders as `0x` plus uppercase hex in text sinks.
//! - Decimals are fixed-point strings with `scale` fractional digits.
//! - Text is UTF-8; the CSV file starts with a UTF-8 BOM, rows end CRLF,
//!   and fields containing the quote, delimiter, CR or LF get RFC-4180
//!   double-quote wrapping with embedded quotes doubled.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use bakex_error::{BakError, Result};
use bakex_types::{SqlValue, TableSchema};

/// Where decoded rows go.
///
/// `open` is called once with the resolved schema before the first row;
/// `close` flushes. Implementations return an export error to abort the
/// extraction.
pub trait RowSink {
    fn open(&mut self, schema: &TableSchema) -> Result<()>;
    fn write_row(&mut self, row: &[SqlValue]) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

const FLUSH_EVERY_ROWS: u64 = 50_000;

/// RFC-4180 delimited text with a UTF-8 BOM and a header row.
pub struct CsvSink {
    path: PathBuf,
    delimiter: char,
    writer: Option<BufWriter<File>>,
    columns: usize,
    rows_written: u64,
}

impl CsvSink {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, delimiter: char) -> Self {
        Self {
            path: path.into(),
            delimiter,
            writer: None,
            columns: 0,
            rows_written: 0,
        }
    }

    fn escape(&self, field: &str) -> String {
        let needs_quoting = field
            .chars()
            .any(|c| c == '"' || c == '\n' || c == '\r' || c == self.delimiter);
        if !needs_quoting {
            return field.to_owned();
        }
        let mut out = String::with_capacity(field.len() + 2);
        out.push('"');
        for c in field.chars() {
            if c == '"' {
                out.push('"');
            }
            out.push(c);
        }
        out.push('"');
        out
    }

    fn render(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Null => String::new(),
            SqlValue::Bool(b) => if *b { "1" } else { "0" }.to_owned(),
            SqlValue::TinyInt(v) => v.to_string(),
            SqlValue::SmallInt(v) => v.to_string(),
            SqlValue::Int(v) => v.to_string(),
            SqlValue::BigInt(v) => v.to_string(),
            SqlValue::Real(v) => v.to_string(),
            SqlValue::Float(v) => v.to_string(),
            SqlValue::Text(s) => self.escape(s),
            SqlValue::Bytes(b) => render_hex(b),
            SqlValue::Decimal(d) => d.to_string(),
            SqlValue::Guid(g) => g.to_string(),
        }
    }
}

impl RowSink for CsvSink {
    fn open(&mut self, schema: &TableSchema) -> Result<()> {
        let file = File::create(&self.path)
            .map_err(|e| BakError::export(format!("cannot open {}: {e}", self.path.display())))?;
        let mut writer = BufWriter::new(file);

        // BOM keeps spreadsheet tools honest about the encoding.
        writer.write_all(b"\xEF\xBB\xBF")?;
        let header: Vec<String> = schema
            .columns
            .iter()
            .map(|c| self.escape(&c.name))
            .collect();
        writer.write_all(header.join(&self.delimiter.to_string()).as_bytes())?;
        writer.write_all(b"\r\n")?;

        self.columns = schema.columns.len();
        self.writer = Some(writer);
        info!(path = %self.path.display(), columns = self.columns, "CSV sink open");
        Ok(())
    }

    fn write_row(&mut self, row: &[SqlValue]) -> Result<()> {
        let rendered: Vec<String> = row.iter().map(|v| self.render(v)).collect();
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| BakError::export("CSV sink not open"))?;
        writer.write_all(rendered.join(&self.delimiter.to_string()).as_bytes())?;
        writer.write_all(b"\r\n")?;

        self.rows_written += 1;
        if self.rows_written % FLUSH_EVERY_ROWS == 0 {
            writer.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            info!(rows = self.rows_written, "CSV sink closed");
        }
        Ok(())
    }
}

/// Newline-delimited JSON objects keyed by column name.
pub struct JsonlSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    column_names: Vec<String>,
    rows_written: u64,
}

impl JsonlSink {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            column_names: Vec::new(),
            rows_written: 0,
        }
    }
}

/// JSON value for one decoded cell.
fn json_value(value: &SqlValue) -> serde_json::Value {
    use serde_json::Value;
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Bool(b) => Value::Bool(*b),
        SqlValue::TinyInt(v) => Value::from(*v),
        SqlValue::SmallInt(v) => Value::from(*v),
        SqlValue::Int(v) => Value::from(*v),
        SqlValue::BigInt(v) => Value::from(*v),
        SqlValue::Real(v) => serde_json::Number::from_f64(f64::from(*v))
            .map_or(Value::Null, Value::Number),
        SqlValue::Float(v) => serde_json::Number::from_f64(*v).map_or(Value::Null, Value::Number),
        SqlValue::Text(s) => Value::String(s.clone()),
        SqlValue::Bytes(b) => Value::String(render_hex(b)),
        SqlValue::Decimal(d) => Value::String(d.to_string()),
        SqlValue::Guid(g) => Value::String(g.to_string()),
    }
}

impl RowSink for JsonlSink {
    fn open(&mut self, schema: &TableSchema) -> Result<()> {
        let file = File::create(&self.path)
            .map_err(|e| BakError::export(format!("cannot open {}: {e}", self.path.display())))?;
        self.writer = Some(BufWriter::new(file));
        self.column_names = schema.columns.iter().map(|c| c.name.clone()).collect();
        info!(path = %self.path.display(), "JSON Lines sink open");
        Ok(())
    }

    fn write_row(&mut self, row: &[SqlValue]) -> Result<()> {
        let mut object = serde_json::Map::with_capacity(self.column_names.len());
        for (name, value) in self.column_names.iter().zip(row) {
            object.insert(name.clone(), json_value(value));
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| BakError::export("JSON sink not open"))?;
        serde_json::to_writer(&mut *writer, &serde_json::Value::Object(object))
            .map_err(|e| BakError::export(format!("JSON encoding failed: {e}")))?;
        writer.write_all(b"\n")?;

        self.rows_written += 1;
        if self.rows_written % FLUSH_EVERY_ROWS == 0 {
            writer.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            info!(rows = self.rows_written, "JSON Lines sink closed");
        }
        Ok(())
    }
}

/// The columnar sink is not built into this binary; opening it reports
/// an export error so the caller can pick another format.
pub struct ColumnarSink;

impl ColumnarSink {
    #[must_use]
    pub fn new(_path: &Path) -> Self {
        Self
    }
}

impl RowSink for ColumnarSink {
    fn open(&mut self, _schema: &TableSchema) -> Result<()> {
        Err(BakError::export(
            "columnar output support is not built into this binary; use csv or jsonl",
        ))
    }

    fn write_row(&mut self, _row: &[SqlValue]) -> Result<()> {
        Err(BakError::export("columnar sink is not open"))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// `0x` plus uppercase hex.
#[must_use]
pub fn render_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for b in bytes {
        out.push_str(&format!("{b:02X}"));
    }
    out
}
