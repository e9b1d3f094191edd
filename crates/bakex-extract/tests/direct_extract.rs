//! End-to-end extraction over synthetic single-stripe backups.

use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;

use bakex_error::BakError;
use bakex_extract::sink::{CsvSink, JsonlSink, RowSink};
use bakex_extract::{DirectExtractor, ExtractOptions};
use bakex_testkit::{
    syscolpars_record, sysallocunits_record, sysrowsets_record, sysschobjs_record,
    synthetic_backup, utf16le, PageBuilder, RecordBuilder, VarColumn,
};
use bakex_types::{page_key, PageType, SqlType, SqlValue};

const USERS_OBJECT_ID: i32 = 245_575_913;
const USERS_ROWSET: i64 = 0x0100_0000_0000;
const USERS_PAGE_STAMP: u32 = 97;
const USERS_AUID: i64 = (USERS_PAGE_STAMP as i64) << 16;

fn users_record(id: i32, name: &str) -> Vec<u8> {
    RecordBuilder::primary(2)
        .fixed(&id.to_le_bytes())
        .var(VarColumn::plain(utf16le(name)))
        .build()
}

/// Catalog pages describing `dbo.Users(id int, name nvarchar(50))`.
fn catalog_pages() -> Vec<Vec<u8>> {
    vec![
        PageBuilder::new(1, 9, PageType::Boot as u8, 0).build(),
        PageBuilder::new(1, 20, PageType::Data as u8, 34)
            .record(&sysschobjs_record(USERS_OBJECT_ID, 1, "U ", "Users"))
            .build(),
        PageBuilder::new(1, 21, PageType::Data as u8, 41)
            .record(&syscolpars_record(
                USERS_OBJECT_ID,
                1,
                SqlType::Int.raw(),
                4,
                0,
                0,
                "id",
            ))
            .record(&syscolpars_record(
                USERS_OBJECT_ID,
                2,
                SqlType::NVarChar.raw(),
                100,
                0,
                0,
                "name",
            ))
            .build(),
        PageBuilder::new(1, 22, PageType::Data as u8, 5)
            .record(&sysrowsets_record(USERS_ROWSET, USERS_OBJECT_ID, 0))
            .build(),
        PageBuilder::new(1, 23, PageType::Data as u8, 7)
            .record(&sysallocunits_record(USERS_AUID, 1, USERS_ROWSET))
            .build(),
    ]
}

fn users_backup(rows: &[(i32, &str)]) -> Vec<u8> {
    let mut pages = catalog_pages();
    let mut data = PageBuilder::new(1, 100, PageType::Data as u8, USERS_PAGE_STAMP);
    for (id, name) in rows {
        data = data.record(&users_record(*id, name));
    }
    pages.push(data.build());
    synthetic_backup("Shop", &pages)
}

fn write_backup(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(bytes).unwrap();
    f.flush().unwrap();
    f
}

fn options_for(path: PathBuf) -> ExtractOptions {
    ExtractOptions {
        bak_paths: vec![path],
        schema: "dbo".to_owned(),
        table: "Users".to_owned(),
        ..ExtractOptions::default()
    }
}

fn collect_rows(options: ExtractOptions) -> (bakex_extract::ExtractReport, Vec<Vec<SqlValue>>) {
    let mut extractor = DirectExtractor::new(options).unwrap();
    let mut rows = Vec::new();
    let mut cb = |row: &[SqlValue]| {
        rows.push(row.to_vec());
        true
    };
    let report = extractor.extract(&mut cb);
    (report, rows)
}

#[test]
fn extracts_a_single_row_backup() {
    // dbo.Users with one row (7, "Zoë").
    let bak = write_backup(&users_backup(&[(7, "Zoë")]));
    let (report, rows) = collect_rows(options_for(bak.path().to_path_buf()));

    assert!(report.success, "failed: {}", report.error_message());
    assert_eq!(report.rows_read, 1);
    assert_eq!(report.mode_used, "direct");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], SqlValue::Int(7));
    assert_eq!(rows[0][1], SqlValue::Text("Zoë".to_owned()));
    if let SqlValue::Text(name) = &rows[0][1] {
        assert_eq!(name.as_bytes(), [0x5A, 0x6F, 0xC3, 0xAB]);
    }
}

#[test]
fn no_mtf_signatures_is_a_format_error() {
    // Signature-free noise: header phase aborts before any page work.
    let bak = write_backup(&vec![0x5Au8; 64 * 1024]);
    let (report, rows) = collect_rows(options_for(bak.path().to_path_buf()));

    assert!(!report.success);
    assert_eq!(report.rows_read, 0);
    assert!(rows.is_empty());
    assert!(matches!(report.error, Some(BakError::Format { .. })));
    assert!(report.error_message().contains("no backup sets"));
}

#[test]
fn encrypted_backup_aborts_with_the_flag_set() {
    // SSET password-encryption field nonzero: the core refuses and marks
    // the report so the caller can pick the restore fallback.
    let mut bytes = users_backup(&[(1, "hidden")]);
    bytes[1024 + 38] = 1;
    let bak = write_backup(&bytes);
    let (report, rows) = collect_rows(options_for(bak.path().to_path_buf()));

    assert!(!report.success);
    assert!(rows.is_empty());
    assert!(report.encryption_detected);
    assert!(!report.tde_detected);
    assert!(matches!(report.error, Some(BakError::BackupEncrypted)));
    assert!(report.wants_restore_fallback());
}

#[test]
fn unknown_table_reports_table_not_found() {
    let bak = write_backup(&users_backup(&[(1, "a")]));
    let mut options = options_for(bak.path().to_path_buf());
    options.table = "Orders".to_owned();
    let (report, _) = collect_rows(options);
    assert!(matches!(report.error, Some(BakError::TableNotFound { .. })));
}

#[test]
fn max_rows_caps_the_stream() {
    let bak = write_backup(&users_backup(&[(1, "a"), (2, "b"), (3, "c"), (4, "d")]));
    let mut options = options_for(bak.path().to_path_buf());
    options.max_rows = Some(2);
    let (report, rows) = collect_rows(options);
    assert!(report.success);
    assert_eq!(report.rows_read, 2);
    assert_eq!(rows.len(), 2);
}

#[test]
fn consumer_stop_is_honored() {
    let bak = write_backup(&users_backup(&[(1, "a"), (2, "b"), (3, "c")]));
    let mut extractor = DirectExtractor::new(options_for(bak.path().to_path_buf())).unwrap();

    let mut seen = 0u32;
    let mut cb = |_row: &[SqlValue]| {
        seen += 1;
        seen < 2
    };
    let report = extractor.extract(&mut cb);
    assert!(report.success);
    assert_eq!(seen, 2);
    // The stopping row is not counted as read.
    assert_eq!(report.rows_read, 1);
}

#[test]
fn column_filter_projects_rows() {
    let bak = write_backup(&users_backup(&[(7, "Zoë")]));
    let mut options = options_for(bak.path().to_path_buf());
    options.columns = vec!["name".to_owned(), "missing".to_owned()];
    let mut extractor = DirectExtractor::new(options).unwrap();

    let mut rows = Vec::new();
    let mut cb = |row: &[SqlValue]| {
        rows.push(row.to_vec());
        true
    };
    let report = extractor.extract(&mut cb);
    assert!(report.success, "failed: {}", report.error_message());

    // Only the projected column reaches the consumer, and the resolved
    // schema the sink would see matches.
    assert_eq!(rows[0], vec![SqlValue::Text("Zoë".to_owned())]);
    let schema = extractor.resolved_schema().unwrap();
    assert_eq!(schema.columns.len(), 1);
    assert_eq!(schema.columns[0].name, "name");
}

#[test]
fn allocation_hints_filter_candidate_pages() {
    // Two data pages for the table; a hint set naming only page 100
    // suppresses the second page's rows.
    let mut pages = catalog_pages();
    pages.push(
        PageBuilder::new(1, 100, PageType::Data as u8, USERS_PAGE_STAMP)
            .record(&users_record(1, "kept"))
            .build(),
    );
    pages.push(
        PageBuilder::new(1, 101, PageType::Data as u8, USERS_PAGE_STAMP)
            .record(&users_record(2, "dropped"))
            .build(),
    );
    let bak = write_backup(&synthetic_backup("Shop", &pages));

    let mut options = options_for(bak.path().to_path_buf());
    options.allocation_hints = Some(HashSet::from([page_key(1, 100)]));
    let (report, rows) = collect_rows(options);

    assert!(report.success);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], SqlValue::Int(1));
}

#[test]
fn list_tables_names_the_user_tables() {
    let bak = write_backup(&users_backup(&[(1, "a")]));
    let mut options = options_for(bak.path().to_path_buf());
    options.table = String::new();
    let mut extractor = DirectExtractor::new(options).unwrap();
    let tables = extractor.list_tables().unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].qualified_name(), "dbo.Users");
    assert_eq!(tables[0].object_id, USERS_OBJECT_ID);
}

#[test]
fn csv_sink_end_to_end() {
    let bak = write_backup(&users_backup(&[(7, "Zoë"), (8, "says \"hi\", loudly")]));
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("users.csv");

    let mut extractor = DirectExtractor::new(options_for(bak.path().to_path_buf())).unwrap();
    let mut sink = CsvSink::new(&out, ',');
    let report = extractor.extract_to_sink(&mut sink);
    assert!(report.success, "failed: {}", report.error_message());
    assert_eq!(report.rows_read, 2);

    let bytes = std::fs::read(&out).unwrap();
    assert_eq!(&bytes[..3], b"\xEF\xBB\xBF");
    let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
    let mut lines = text.split("\r\n");
    assert_eq!(lines.next(), Some("id,name"));
    assert_eq!(lines.next(), Some("7,Zoë"));
    assert_eq!(lines.next(), Some("8,\"says \"\"hi\"\", loudly\""));
}

#[test]
fn jsonl_sink_end_to_end() {
    let bak = write_backup(&users_backup(&[(7, "Zoë")]));
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("users.jsonl");

    let mut extractor = DirectExtractor::new(options_for(bak.path().to_path_buf())).unwrap();
    let mut sink = JsonlSink::new(&out);
    let report = extractor.extract_to_sink(&mut sink);
    assert!(report.success);

    let text = std::fs::read_to_string(&out).unwrap();
    let row: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
    assert_eq!(row["id"], 7);
    assert_eq!(row["name"], "Zoë");
}

#[test]
fn failing_sink_surfaces_an_export_error() {
    struct RefusingSink;
    impl RowSink for RefusingSink {
        fn open(&mut self, _schema: &bakex_types::TableSchema) -> bakex_error::Result<()> {
            Ok(())
        }
        fn write_row(&mut self, _row: &[SqlValue]) -> bakex_error::Result<()> {
            Err(BakError::export("disk full"))
        }
        fn close(&mut self) -> bakex_error::Result<()> {
            Ok(())
        }
    }

    let bak = write_backup(&users_backup(&[(1, "a")]));
    let mut extractor = DirectExtractor::new(options_for(bak.path().to_path_buf())).unwrap();
    let report = extractor.extract_to_sink(&mut RefusingSink);
    assert!(!report.success);
    assert!(matches!(report.error, Some(BakError::Export { .. })));
}

#[test]
fn indexed_mode_matches_the_memory_path_and_reuses_its_sidecar() {
    let bak = write_backup(&users_backup(&[(1, "a"), (2, "b"), (3, "c")]));
    let dir = tempfile::tempdir().unwrap();

    let indexed_options = || {
        let mut options = options_for(bak.path().to_path_buf());
        options.indexed = true;
        options.cache_size_mb = 64;
        options.index_dir = Some(dir.path().to_path_buf());
        options
    };

    let (first, first_rows) = collect_rows(indexed_options());
    assert!(first.success, "failed: {}", first.error_message());
    assert_eq!(first.rows_read, 3);
    assert!(dir.path().join("bakex_pages.idx").exists());

    // Rerun without force-rescan: the sidecar is reused and the rows are
    // identical.
    let (second, second_rows) = collect_rows(indexed_options());
    assert!(second.success);
    assert_eq!(second_rows, first_rows);

    // And the memory path agrees with both.
    let (memory, memory_rows) = collect_rows(options_for(bak.path().to_path_buf()));
    assert!(memory.success);
    assert_eq!(memory_rows, first_rows);
}

#[test]
fn empty_options_are_config_errors() {
    let err = DirectExtractor::new(ExtractOptions::default()).unwrap_err();
    assert!(matches!(err, BakError::Config { .. }));
}
