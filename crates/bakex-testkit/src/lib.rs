//! Builders for synthetic SQL Server pages, FixedVar records, catalog
//! rows and whole single-stripe backups.
//!
//! Test-only support: the layouts here are the write-side mirror of the
//! read-side parsers, so fixtures stay byte-accurate without hex blobs in
//! every test.

use bakex_types::{RecordStatus, PAGE_HEADER_SIZE, PAGE_SIZE};

/// A variable-length column for [`RecordBuilder`].
#[derive(Debug, Clone)]
pub struct VarColumn {
    pub data: Vec<u8>,
    /// Sets the top bit of the end-offset (overflow/LOB pointer).
    pub complex: bool,
}

impl VarColumn {
    #[must_use]
    pub fn plain(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            complex: false,
        }
    }

    #[must_use]
    pub fn complex(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            complex: true,
        }
    }
}

/// Builds one FixedVar record.
pub struct RecordBuilder {
    status_a: u8,
    fixed: Vec<u8>,
    column_count: u16,
    null_bits: Vec<bool>,
    var_columns: Vec<VarColumn>,
}

impl RecordBuilder {
    /// A primary record with a null bitmap for `column_count` columns.
    #[must_use]
    pub fn primary(column_count: u16) -> Self {
        Self {
            status_a: RecordStatus::HAS_NULL_BITMAP,
            fixed: Vec::new(),
            column_count,
            null_bits: vec![false; column_count as usize],
            var_columns: Vec::new(),
        }
    }

    /// Override the record-kind bits (forwarding stub, index record, ...).
    #[must_use]
    pub fn kind(mut self, kind: u8) -> Self {
        self.status_a = (self.status_a & !RecordStatus::TYPE_MASK) | (kind & RecordStatus::TYPE_MASK);
        self
    }

    /// Append fixed-region bytes.
    #[must_use]
    pub fn fixed(mut self, bytes: &[u8]) -> Self {
        self.fixed.extend_from_slice(bytes);
        self
    }

    /// Pad the fixed region to `len` bytes (record offsets 4..4+len).
    #[must_use]
    pub fn fixed_padded_to(mut self, len: usize) -> Self {
        assert!(self.fixed.len() <= len);
        self.fixed.resize(len, 0);
        self
    }

    /// Mark column `i` null.
    #[must_use]
    pub fn null(mut self, i: usize) -> Self {
        self.null_bits[i] = true;
        self
    }

    /// Append a variable-length column.
    #[must_use]
    pub fn var(mut self, col: VarColumn) -> Self {
        self.status_a |= RecordStatus::HAS_VAR_COLUMNS;
        self.var_columns.push(col);
        self
    }

    /// Serialize: header, fixed data, column count, null bitmap, var
    /// offset array, var data.
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let fixed_end = 4 + self.fixed.len();
        let mut rec = Vec::with_capacity(64);
        rec.push(self.status_a);
        rec.push(0); // status B, reserved
        rec.extend_from_slice(&(fixed_end as u16).to_le_bytes());
        rec.extend_from_slice(&self.fixed);

        rec.extend_from_slice(&self.column_count.to_le_bytes());
        let bitmap_bytes = (self.column_count as usize + 7) / 8;
        let mut bitmap = vec![0u8; bitmap_bytes];
        for (i, &null) in self.null_bits.iter().enumerate() {
            if null {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        rec.extend_from_slice(&bitmap);

        if self.status_a & RecordStatus::HAS_VAR_COLUMNS != 0 {
            rec.extend_from_slice(&(self.var_columns.len() as u16).to_le_bytes());
            let data_start = rec.len() + 2 * self.var_columns.len();
            let mut end = data_start;
            for col in &self.var_columns {
                end += col.data.len();
                let mut off = end as u16;
                if col.complex {
                    off |= 0x8000;
                }
                rec.extend_from_slice(&off.to_le_bytes());
            }
            for col in &self.var_columns {
                rec.extend_from_slice(&col.data);
            }
        }
        rec
    }
}

/// Builds one 8 KiB page image: header, records, slot array.
pub struct PageBuilder {
    page: Vec<u8>,
    free_offset: usize,
    slots: Vec<u16>,
}

impl PageBuilder {
    /// A page with a plausible header.
    #[must_use]
    pub fn new(file_id: u16, page_id: u32, page_type: u8, obj_id: u32) -> Self {
        let mut page = vec![0u8; PAGE_SIZE];
        page[0x00] = 1; // header_version
        page[0x01] = page_type;
        page[0x18..0x1C].copy_from_slice(&obj_id.to_le_bytes());
        page[0x20..0x24].copy_from_slice(&page_id.to_le_bytes());
        page[0x24..0x26].copy_from_slice(&file_id.to_le_bytes());
        Self {
            page,
            free_offset: PAGE_HEADER_SIZE,
            slots: Vec::new(),
        }
    }

    /// Link this page to the next one in a chain.
    #[must_use]
    pub fn next_page(mut self, file_id: u16, page_id: u32) -> Self {
        self.page[0x10..0x14].copy_from_slice(&page_id.to_le_bytes());
        self.page[0x14..0x16].copy_from_slice(&file_id.to_le_bytes());
        self
    }

    /// Append a record and its slot entry.
    #[must_use]
    pub fn record(mut self, record: &[u8]) -> Self {
        let offset = self.free_offset;
        assert!(
            offset + record.len() + 2 * (self.slots.len() + 1) <= PAGE_SIZE,
            "record does not fit on page"
        );
        self.page[offset..offset + record.len()].copy_from_slice(record);
        self.slots.push(offset as u16);
        self.free_offset += record.len();
        self
    }

    /// Force a slot entry without any record bytes (corruption fixtures).
    #[must_use]
    pub fn raw_slot(mut self, offset: u16) -> Self {
        self.slots.push(offset);
        self
    }

    /// Serialize: fill slot count, free counters and the backward slot
    /// array.
    #[must_use]
    pub fn build(mut self) -> Vec<u8> {
        let slot_count = self.slots.len() as u16;
        self.page[0x16..0x18].copy_from_slice(&slot_count.to_le_bytes());
        let free = (PAGE_SIZE - self.free_offset - 2 * self.slots.len()) as u16;
        self.page[0x1C..0x1E].copy_from_slice(&free.to_le_bytes());
        self.page[0x1E..0x20].copy_from_slice(&(self.free_offset as u16).to_le_bytes());
        for (i, &slot) in self.slots.iter().enumerate() {
            let pos = PAGE_SIZE - 2 * (i + 1);
            self.page[pos..pos + 2].copy_from_slice(&slot.to_le_bytes());
        }
        self.page
    }
}

/// UTF-16LE encode helper.
#[must_use]
pub fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

// ---------------------------------------------------------------------------
// Catalog record builders (write-side mirrors of the catalog reader)
// ---------------------------------------------------------------------------

/// One `sysschobjs` row: object identity plus type code and name.
#[must_use]
pub fn sysschobjs_record(object_id: i32, schema_id: i32, type_code: &str, name: &str) -> Vec<u8> {
    assert_eq!(type_code.len(), 2);
    let mut fixed = Vec::new();
    fixed.extend_from_slice(&object_id.to_le_bytes()); // id @ 4
    fixed.extend_from_slice(&schema_id.to_le_bytes()); // nsid @ 8
    fixed.push(0); // nsclass @ 12
    fixed.extend_from_slice(&0i32.to_le_bytes()); // status @ 13
    fixed.extend_from_slice(type_code.as_bytes()); // type @ 17
    RecordBuilder::primary(8)
        .fixed(&fixed)
        .fixed_padded_to(17) // fixed_end = 21
        .var(VarColumn::plain(utf16le(name)))
        .build()
}

/// One `syscolpars` row: column identity, type and geometry plus name.
#[allow(clippy::too_many_arguments)]
#[must_use]
pub fn syscolpars_record(
    object_id: i32,
    column_id: i32,
    system_type_id: u8,
    max_length: i16,
    precision: u8,
    scale: u8,
    name: &str,
) -> Vec<u8> {
    let mut fixed = Vec::new();
    fixed.extend_from_slice(&object_id.to_le_bytes()); // id @ 4
    fixed.extend_from_slice(&0i16.to_le_bytes()); // number @ 8
    fixed.extend_from_slice(&column_id.to_le_bytes()); // colid @ 10
    fixed.push(system_type_id); // xtype @ 14
    fixed.extend_from_slice(&0i32.to_le_bytes()); // utype @ 15
    fixed.extend_from_slice(&max_length.to_le_bytes()); // length @ 19
    fixed.push(precision); // prec @ 21
    fixed.push(scale); // scale @ 22
    RecordBuilder::primary(12)
        .fixed(&fixed) // fixed_end = 23
        .var(VarColumn::plain(utf16le(name)))
        .build()
}

/// One `sysrowsets` row: `rowset_id → (object_id, index_id)`.
#[must_use]
pub fn sysrowsets_record(rowset_id: i64, object_id: i32, index_id: i32) -> Vec<u8> {
    let mut fixed = Vec::new();
    fixed.extend_from_slice(&rowset_id.to_le_bytes()); // rowsetid @ 4
    fixed.push(0); // ownertype @ 12
    fixed.extend_from_slice(&object_id.to_le_bytes()); // idmajor @ 13
    fixed.extend_from_slice(&index_id.to_le_bytes()); // idminor @ 17
    RecordBuilder::primary(6).fixed(&fixed).build() // fixed_end = 21
}

/// One `sysallocunits` row: `alloc_unit_id → (type, container_id)`.
#[must_use]
pub fn sysallocunits_record(alloc_unit_id: i64, unit_type: u8, container_id: i64) -> Vec<u8> {
    let mut fixed = Vec::new();
    fixed.extend_from_slice(&alloc_unit_id.to_le_bytes()); // auid @ 4
    fixed.push(unit_type); // type @ 12
    fixed.extend_from_slice(&container_id.to_le_bytes()); // container_id @ 13
    RecordBuilder::primary(6).fixed(&fixed).build() // fixed_end = 21
}

/// One `sysobjvalues` row carrying a module definition.
#[must_use]
pub fn sysobjvalues_record(object_id: i32, valclass: i16, definition: &str) -> Vec<u8> {
    let mut fixed = Vec::new();
    fixed.extend_from_slice(&object_id.to_le_bytes()); // objid @ 4
    fixed.extend_from_slice(&valclass.to_le_bytes()); // valclass @ 8
    fixed.extend_from_slice(&0i32.to_le_bytes()); // subobjid @ 10
    fixed.extend_from_slice(&0i32.to_le_bytes()); // valnum @ 14
    RecordBuilder::primary(7)
        .fixed(&fixed) // fixed_end = 18
        .var(VarColumn::plain(utf16le(definition)))
        .build()
}

// ---------------------------------------------------------------------------
// Date/time encode helpers (inverses of the row decoder's rendering)
// ---------------------------------------------------------------------------

/// Days since 0001-01-01 for a proleptic-Gregorian civil date.
#[must_use]
pub fn days_from_ymd(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 306
}

/// Encode a `date` payload: 3-byte day count.
#[must_use]
pub fn encode_date(y: i64, m: i64, d: i64) -> [u8; 3] {
    let days = days_from_ymd(y, m, d) as u32;
    let b = days.to_le_bytes();
    [b[0], b[1], b[2]]
}

/// Encode a `datetime2(scale)` payload: scaled time then 3-byte date.
#[must_use]
pub fn encode_datetime2(
    y: i64,
    m: i64,
    d: i64,
    hour: u64,
    min: u64,
    sec: u64,
    frac: u64,
    scale: u8,
) -> Vec<u8> {
    let time_bytes = match scale {
        0..=2 => 3,
        3..=4 => 4,
        _ => 5,
    };
    let per_sec = 10u64.pow(u32::from(scale.min(7)));
    let ticks = ((hour * 3600 + min * 60 + sec) * per_sec) + frac;
    let mut out = ticks.to_le_bytes()[..time_bytes].to_vec();
    out.extend_from_slice(&encode_date(y, m, d));
    out
}

/// Encode a `uniqueidentifier` payload from its canonical groups.
#[must_use]
pub fn encode_guid(d1: u32, d2: u16, d3: u16, d4: [u8; 8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[0..4].copy_from_slice(&d1.to_le_bytes());
    out[4..6].copy_from_slice(&d2.to_le_bytes());
    out[6..8].copy_from_slice(&d3.to_le_bytes());
    out[8..16].copy_from_slice(&d4);
    out
}

/// Encode a `decimal(p,s)` payload: sign byte plus magnitude.
#[must_use]
pub fn encode_decimal(positive: bool, magnitude: u128, int_bytes: usize) -> Vec<u8> {
    let mut out = vec![u8::from(positive)];
    out.extend_from_slice(&magnitude.to_le_bytes()[..int_bytes]);
    out
}

// ---------------------------------------------------------------------------
// Whole-backup builder
// ---------------------------------------------------------------------------

/// Serialize a minimal uncompressed single-stripe backup: a TAPE block at
/// offset 0, an SSET block at 1024 carrying `{db_name}-Full Database
/// Backup`, then the given page images at 8 KiB alignment starting at
/// offset 8192.
#[must_use]
pub fn synthetic_backup(db_name: &str, pages: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = vec![0u8; 8192];
    buf[0..4].copy_from_slice(b"TAPE");
    buf[1024..1028].copy_from_slice(b"SSET");
    // data_set_number @ 52 within the SSET block.
    buf[1024 + 52..1024 + 54].copy_from_slice(&1u16.to_le_bytes());
    let desc = utf16le(&format!("{db_name}-Full Database Backup"));
    buf[1024 + 128..1024 + 128 + desc.len()].copy_from_slice(&desc);

    for page in pages {
        assert_eq!(page.len(), PAGE_SIZE);
        buf.extend_from_slice(page);
    }
    buf
}
