use bakex_testkit::{
    encode_date, encode_datetime2, encode_decimal, encode_guid, utf16le, PageBuilder,
    RecordBuilder, VarColumn,
};
use bakex_types::{
    ColumnDef, PageType, RecordStatus, SqlType, SqlValue, TableSchema, PAGE_SIZE,
};

use super::*;

fn table(columns: Vec<ColumnDef>) -> TableSchema {
    TableSchema {
        object_id: 1000,
        schema_name: "dbo".to_owned(),
        table_name: "T".to_owned(),
        columns,
        is_heap: true,
        partition_count: 1,
    }
}

/// `dbo.Users(id int NOT NULL, name nvarchar(50) NOT NULL)`.
fn users_schema() -> TableSchema {
    let mut id = ColumnDef::new(1, "id", SqlType::Int, 4);
    id.is_nullable = false;
    let mut name = ColumnDef::new(2, "name", SqlType::NVarChar, 100);
    name.is_nullable = false;
    table(vec![id, name])
}

fn users_record(id: i32, name: &str) -> Vec<u8> {
    RecordBuilder::primary(2)
        .fixed(&id.to_le_bytes())
        .var(VarColumn::plain(utf16le(name)))
        .build()
}

#[test]
fn decodes_int_and_nvarchar_row() {
    let decoder = RowDecoder::new(users_schema());
    let page = PageBuilder::new(1, 50, PageType::Data as u8, 97)
        .record(&users_record(7, "Zoë"))
        .build();

    let rows = decoder.decode_page(&page);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], SqlValue::Int(7));
    assert_eq!(rows[0][1], SqlValue::Text("Zoë".to_owned()));
    // The UTF-8 bytes of the decoded name.
    if let SqlValue::Text(s) = &rows[0][1] {
        assert_eq!(s.as_bytes(), [0x5A, 0x6F, 0xC3, 0xAB]);
    }
}

#[test]
fn non_data_pages_yield_nothing() {
    let decoder = RowDecoder::new(users_schema());
    let page = PageBuilder::new(1, 50, PageType::Iam as u8, 97)
        .record(&users_record(1, "x"))
        .build();
    assert!(decoder.decode_page(&page).is_empty());
}

#[test]
fn out_of_bounds_slot_is_skipped_but_page_continues() {
    // slot_count = 2 with slot[1] pointing past the page: slot[0] still
    // decodes and nothing panics.
    let decoder = RowDecoder::new(users_schema());
    let page = PageBuilder::new(1, 50, PageType::Data as u8, 97)
        .record(&users_record(7, "ok"))
        .raw_slot(9000)
        .build();

    let rows = decoder.decode_page(&page);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], SqlValue::Int(7));
}

#[test]
fn forwarding_stubs_are_skipped() {
    let decoder = RowDecoder::new(users_schema());
    let mut stub = users_record(9, "gone");
    stub[0] = (stub[0] & !RecordStatus::TYPE_MASK) | RecordStatus::FORWARDING_STUB;
    let page = PageBuilder::new(1, 50, PageType::Data as u8, 97)
        .record(&stub)
        .record(&users_record(1, "kept"))
        .build();

    let rows = decoder.decode_page(&page);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], SqlValue::Int(1));
}

#[test]
fn null_bit_wins_over_column_bytes() {
    // Whatever bytes sit at the column's offset, a set null bit decodes
    // to the null token.
    let decoder = RowDecoder::new(users_schema());
    let rec = RecordBuilder::primary(2)
        .fixed(&0x7FFF_FFFFi32.to_le_bytes())
        .null(0)
        .var(VarColumn::plain(utf16le("still here")))
        .build();
    let page = PageBuilder::new(1, 50, PageType::Data as u8, 97)
        .record(&rec)
        .build();

    let rows = decoder.decode_page(&page);
    assert_eq!(rows[0][0], SqlValue::Null);
    assert_eq!(rows[0][1], SqlValue::Text("still here".to_owned()));
}

#[test]
fn null_var_column() {
    let decoder = RowDecoder::new(users_schema());
    let rec = RecordBuilder::primary(2)
        .fixed(&1i32.to_le_bytes())
        .null(1)
        .var(VarColumn::plain(Vec::new()))
        .build();
    let page = PageBuilder::new(1, 50, PageType::Data as u8, 97)
        .record(&rec)
        .build();
    let rows = decoder.decode_page(&page);
    assert_eq!(rows[0][1], SqlValue::Null);
}

#[test]
fn complex_var_column_is_the_lob_placeholder() {
    let decoder = RowDecoder::new(users_schema());
    let rec = RecordBuilder::primary(2)
        .fixed(&3i32.to_le_bytes())
        .var(VarColumn::complex(vec![0xDE, 0xAD, 0xBE, 0xEF]))
        .build();
    let page = PageBuilder::new(1, 50, PageType::Data as u8, 97)
        .record(&rec)
        .build();
    let rows = decoder.decode_page(&page);
    assert_eq!(rows[0][1], SqlValue::Text("[LOB data]".to_owned()));
}

#[test]
fn surrogate_pairs_decode_to_exact_utf8() {
    let decoder = RowDecoder::new(users_schema());
    let page = PageBuilder::new(1, 50, PageType::Data as u8, 97)
        .record(&users_record(1, "a𝕊b"))
        .build();
    let rows = decoder.decode_page(&page);
    if let SqlValue::Text(s) = &rows[0][1] {
        assert_eq!(s, "a𝕊b");
        assert_eq!(s.as_bytes(), [0x61, 0xF0, 0x9D, 0x95, 0x8A, 0x62]);
    } else {
        panic!("expected text");
    }
}

#[test]
fn scenario_decimal_datetime2_guid_row() {
    // (a decimal(18,4), b datetime2(3), c uniqueidentifier) with the row
    // (-123.4567, '2024-01-02 03:04:05.678', {00112233-...}).
    let schema = table(vec![
        ColumnDef::new(1, "a", SqlType::Decimal, 9).with_precision_scale(18, 4),
        ColumnDef::new(2, "b", SqlType::DateTime2, 7).with_precision_scale(0, 3),
        ColumnDef::new(3, "c", SqlType::UniqueIdentifier, 16),
    ]);
    let decoder = RowDecoder::new(schema);

    let mut fixed = Vec::new();
    fixed.extend_from_slice(&encode_decimal(false, 1_234_567, 8));
    fixed.extend_from_slice(&encode_datetime2(2024, 1, 2, 3, 4, 5, 678, 3));
    fixed.extend_from_slice(&encode_guid(
        0x0011_2233,
        0x4455,
        0x6677,
        [0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF],
    ));
    let rec = RecordBuilder::primary(3).fixed(&fixed).build();
    let page = PageBuilder::new(1, 60, PageType::Data as u8, 97)
        .record(&rec)
        .build();

    let rows = decoder.decode_page(&page);
    assert_eq!(rows.len(), 1);
    match &rows[0][0] {
        SqlValue::Decimal(d) => assert_eq!(d.to_string(), "-123.4567"),
        other => panic!("expected decimal, got {other:?}"),
    }
    assert_eq!(
        rows[0][1],
        SqlValue::Text("2024-01-02 03:04:05.678".to_owned())
    );
    match &rows[0][2] {
        SqlValue::Guid(g) => assert_eq!(g.to_string(), "00112233-4455-6677-8899-AABBCCDDEEFF"),
        other => panic!("expected guid, got {other:?}"),
    }
}

#[test]
fn fixed_offsets_derive_from_prefix_sums() {
    // No leaf offsets: tinyint at 4, bigint at 5, smallint at 13.
    let schema = table(vec![
        ColumnDef::new(1, "t", SqlType::TinyInt, 1),
        ColumnDef::new(2, "b", SqlType::BigInt, 8),
        ColumnDef::new(3, "s", SqlType::SmallInt, 2),
    ]);
    let decoder = RowDecoder::new(schema);

    let mut fixed = Vec::new();
    fixed.push(200);
    fixed.extend_from_slice(&(-42i64).to_le_bytes());
    fixed.extend_from_slice(&1234i16.to_le_bytes());
    let rec = RecordBuilder::primary(3).fixed(&fixed).build();
    let page = PageBuilder::new(1, 60, PageType::Data as u8, 97)
        .record(&rec)
        .build();

    let rows = decoder.decode_page(&page);
    assert_eq!(rows[0][0], SqlValue::TinyInt(-56)); // 200 as i8
    assert_eq!(rows[0][1], SqlValue::BigInt(-42));
    assert_eq!(rows[0][2], SqlValue::SmallInt(1234));
}

#[test]
fn explicit_leaf_offsets_are_honored() {
    // Columns physically stored in reverse of their declared order.
    let mut a = ColumnDef::new(1, "a", SqlType::Int, 4);
    a.leaf_offset = 8;
    let mut b = ColumnDef::new(2, "b", SqlType::Int, 4);
    b.leaf_offset = 4;
    let decoder = RowDecoder::new(table(vec![a, b]));

    let mut fixed = Vec::new();
    fixed.extend_from_slice(&222i32.to_le_bytes()); // at offset 4: column b
    fixed.extend_from_slice(&111i32.to_le_bytes()); // at offset 8: column a
    let rec = RecordBuilder::primary(2).fixed(&fixed).build();
    let page = PageBuilder::new(1, 60, PageType::Data as u8, 97)
        .record(&rec)
        .build();

    let rows = decoder.decode_page(&page);
    assert_eq!(rows[0][0], SqlValue::Int(111));
    assert_eq!(rows[0][1], SqlValue::Int(222));
}

#[test]
fn every_scalar_type_decodes() {
    let schema = table(vec![
        ColumnDef::new(1, "bit", SqlType::Bit, 1),
        ColumnDef::new(2, "real", SqlType::Real, 4),
        ColumnDef::new(3, "float", SqlType::Float, 8),
        ColumnDef::new(4, "money", SqlType::Money, 8),
        ColumnDef::new(5, "smallmoney", SqlType::SmallMoney, 4),
        ColumnDef::new(6, "date", SqlType::Date, 3),
        ColumnDef::new(7, "ts", SqlType::Timestamp, 8),
        ColumnDef::new(8, "vb", SqlType::VarBinary, 16),
    ]);
    let decoder = RowDecoder::new(schema);

    let mut fixed = Vec::new();
    fixed.push(1); // bit
    fixed.extend_from_slice(&1.5f32.to_le_bytes());
    fixed.extend_from_slice(&(-2.25f64).to_le_bytes());
    // money 12.3456: 123456 scaled; high half first.
    let money: i64 = 123_456;
    fixed.extend_from_slice(&((money >> 32) as i32).to_le_bytes());
    fixed.extend_from_slice(&(money as u32).to_le_bytes());
    fixed.extend_from_slice(&50_000i32.to_le_bytes()); // smallmoney 5.0
    fixed.extend_from_slice(&encode_date(2024, 6, 15));
    fixed.extend_from_slice(&[9u8; 8]); // timestamp
    let rec = RecordBuilder::primary(8)
        .fixed(&fixed)
        .var(VarColumn::plain(vec![0xAB, 0xCD]))
        .build();
    let page = PageBuilder::new(1, 61, PageType::Data as u8, 97)
        .record(&rec)
        .build();

    let rows = decoder.decode_page(&page);
    let row = &rows[0];
    assert_eq!(row[0], SqlValue::Bool(true));
    assert_eq!(row[1], SqlValue::Real(1.5));
    assert_eq!(row[2], SqlValue::Float(-2.25));
    assert_eq!(row[3], SqlValue::Float(12.3456));
    assert_eq!(row[4], SqlValue::Float(5.0));
    assert_eq!(row[5], SqlValue::Text("2024-06-15".to_owned()));
    assert_eq!(row[6], SqlValue::Bytes(vec![9u8; 8]));
    assert_eq!(row[7], SqlValue::Bytes(vec![0xAB, 0xCD]));
}

#[test]
fn negative_money() {
    let schema = table(vec![ColumnDef::new(1, "m", SqlType::Money, 8)]);
    let decoder = RowDecoder::new(schema);

    let money: i64 = -98_765; // -9.8765
    let mut fixed = Vec::new();
    fixed.extend_from_slice(&((money >> 32) as i32).to_le_bytes());
    fixed.extend_from_slice(&(money as u32).to_le_bytes());
    let rec = RecordBuilder::primary(1).fixed(&fixed).build();
    let page = PageBuilder::new(1, 61, PageType::Data as u8, 97)
        .record(&rec)
        .build();

    assert_eq!(decoder.decode_page(&page)[0][0], SqlValue::Float(-9.8765));
}

#[test]
fn char_codepage_passthrough() {
    let schema = table(vec![ColumnDef::new(1, "c", SqlType::Char, 4)]);
    let decoder = RowDecoder::new(schema);
    let rec = RecordBuilder::primary(1).fixed(b"ab  ").build();
    let page = PageBuilder::new(1, 61, PageType::Data as u8, 97)
        .record(&rec)
        .build();
    assert_eq!(
        decoder.decode_page(&page)[0][0],
        SqlValue::Text("ab  ".to_owned())
    );
}

#[test]
fn record_truncated_by_fixed_end_is_rejected() {
    let decoder = RowDecoder::new(users_schema());
    // fixed_end far past the page end.
    let mut rec = users_record(1, "x");
    rec[2..4].copy_from_slice(&0xFFF0u16.to_le_bytes());
    let page = PageBuilder::new(1, 50, PageType::Data as u8, 97)
        .record(&rec)
        .build();
    assert!(decoder.decode_page(&page).is_empty());
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Any random 8 KiB buffer either yields no rows or rows whose
        /// values came from in-bounds reads (no panic is the real claim).
        #[test]
        fn random_pages_never_panic(mut bytes in proptest::collection::vec(any::<u8>(), PAGE_SIZE)) {
            // Force a data-page header so decode_page doesn't bail early.
            bytes[0] = 1;
            bytes[1] = 1;
            let decoder = RowDecoder::new(users_schema());
            let rows = decoder.decode_page(&bytes);
            for row in &rows {
                prop_assert_eq!(row.len(), 2);
            }
        }

        /// With no null bitmap and no var columns, fixed decoding depends
        /// only on the bytes in [4, fixed_end).
        #[test]
        fn fixed_columns_read_only_the_fixed_region(
            id in any::<i32>(),
            tail_noise in any::<u8>(),
        ) {
            let schema = table(vec![{
                let mut c = ColumnDef::new(1, "id", SqlType::Int, 4);
                c.is_nullable = false;
                c
            }]);
            let decoder = RowDecoder::new(schema);

            // Bare record: status 0 (no bitmap, no var cols).
            let mut rec = vec![0u8, 0];
            rec.extend_from_slice(&8u16.to_le_bytes());
            rec.extend_from_slice(&id.to_le_bytes());

            let mut with_noise = rec.clone();
            with_noise.extend_from_slice(&[tail_noise; 16]);

            let page_a = PageBuilder::new(1, 70, PageType::Data as u8, 97)
                .record(&rec)
                .build();
            let page_b = PageBuilder::new(1, 70, PageType::Data as u8, 97)
                .record(&with_noise)
                .build();

            let rows_a = decoder.decode_page(&page_a);
            let rows_b = decoder.decode_page(&page_b);
            prop_assert_eq!(&rows_a[0], &rows_b[0]);
            prop_assert_eq!(&rows_a[0][0], &SqlValue::Int(id));
        }
    }
}
