//! The four-phase direct extractor.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use bakex_catalog::{Catalog, CatalogScanner, PageStore};
use bakex_compress::Decompressor;
use bakex_decode::RowDecoder;
use bakex_error::{BakError, Result};
use bakex_index::{IndexedPageStore, IndexedStoreConfig, IndexedPageType};
use bakex_mtf::HeaderParser;
use bakex_stripe::{BackupStream, StripeSet};
use bakex_types::{
    BackupInfo, PageHeader, PageId, PageType, SqlValue, TableSchema, PAGE_SIZE,
};

use crate::memory::MemoryPageStore;
use crate::sink::RowSink;

/// Advisory progress snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct Progress {
    pub bytes_processed: u64,
    pub bytes_total: u64,
    pub rows_read: u64,
    pub fraction: f64,
}

/// Progress callback; called from scan workers, so it must be shareable.
pub type ProgressFn = Box<dyn Fn(&Progress) + Send + Sync>;

/// Row callback: return `false` to stop the stream.
pub type RowFn<'a> = &'a mut dyn FnMut(&[SqlValue]) -> bool;

/// One table in a `list_tables` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub schema_name: String,
    pub table_name: String,
    pub object_id: i32,
}

impl TableInfo {
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }
}

/// What the caller wants extracted and how.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Stripe files in order.
    pub bak_paths: Vec<PathBuf>,
    pub schema: String,
    pub table: String,
    /// Column filter; empty = all columns.
    pub columns: Vec<String>,
    pub max_rows: Option<u64>,
    /// Backup-set position filter.
    pub backupset: Option<i32>,
    /// Use the sidecar-indexed page store instead of the in-memory map.
    pub indexed: bool,
    pub cache_size_mb: usize,
    pub index_dir: Option<PathBuf>,
    pub force_rescan: bool,
    /// Candidate-page filter keyed by compound page id.
    pub allocation_hints: Option<HashSet<i64>>,
}

/// Outcome of one extraction attempt.
#[derive(Debug, Default)]
pub struct ExtractReport {
    pub success: bool,
    pub rows_read: u64,
    pub mode_used: &'static str,
    pub error: Option<BakError>,
    pub elapsed: Duration,
    pub tde_detected: bool,
    pub encryption_detected: bool,
}

impl ExtractReport {
    /// Human-readable failure description, empty on success.
    #[must_use]
    pub fn error_message(&self) -> String {
        self.error.as_ref().map(ToString::to_string).unwrap_or_default()
    }

    /// Whether the caller should retry through the live-restore fallback.
    #[must_use]
    pub fn wants_restore_fallback(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(BakError::wants_restore_fallback)
    }
}

/// The recovered page corpus behind a uniform read interface.
enum PageCorpus {
    Indexed(IndexedPageStore),
    Memory(MemoryPageStore),
}

impl PageStore for PageCorpus {
    fn read_page(&self, id: PageId, out: &mut [u8]) -> bool {
        match self {
            Self::Indexed(store) => store.get_page(id.file_id, id.page_id, out),
            Self::Memory(store) => store.read_page(id, out),
        }
    }

    fn pages_with_obj_id(&self, obj_id: u32) -> Vec<PageId> {
        match self {
            Self::Indexed(store) => store.pages_with_obj_id(obj_id),
            Self::Memory(store) => store.pages_with_obj_id(obj_id),
        }
    }

    fn pages_of_type(&self, page_type: PageType) -> Vec<PageId> {
        match self {
            Self::Indexed(store) => store
                .index()
                .pages_by_type(IndexedPageType::from_raw(page_type as u8)),
            Self::Memory(store) => store.pages_of_type(page_type),
        }
    }
}

/// Everything phases 1–3 produce, frozen before row streaming.
struct Prepared {
    corpus: PageCorpus,
    catalog: Catalog,
    /// The table as the catalog describes it; drives record decoding.
    full_schema: TableSchema,
    /// The table as the caller sees it after the column filter.
    output_schema: TableSchema,
    /// Output column index → full-schema column index.
    projection: Option<Vec<usize>>,
    page_obj_id: u32,
}

/// Parse only the header region of a backup's first stripe.
///
/// Serves the `--print-data-offset` and `--list-tables` style diagnostic
/// flows that don't need a page corpus.
pub fn probe_headers(first_stripe: &Path) -> Result<(BackupInfo, u64)> {
    let mut stream = BackupStream::open(first_stripe)?;
    let mut parser = HeaderParser::new();
    parser.parse(&mut stream)?;
    Ok((parser.info().clone(), parser.data_start_offset()))
}

/// Extracts one table directly from backup stripes.
pub struct DirectExtractor {
    options: ExtractOptions,
    progress: Option<ProgressFn>,
    backup_info: BackupInfo,
    data_start_offset: u64,
    prepared: Option<Prepared>,
}

impl std::fmt::Debug for DirectExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectExtractor").finish_non_exhaustive()
    }
}

impl DirectExtractor {
    pub fn new(options: ExtractOptions) -> Result<Self> {
        if options.bak_paths.is_empty() {
            return Err(BakError::config("at least one backup stripe is required"));
        }
        Ok(Self {
            options,
            progress: None,
            backup_info: BackupInfo::default(),
            data_start_offset: 0,
            prepared: None,
        })
    }

    pub fn set_progress_callback(&mut self, cb: ProgressFn) {
        self.progress = Some(cb);
    }

    /// Backup metadata; populated by the first phase.
    #[must_use]
    pub fn backup_info(&self) -> &BackupInfo {
        &self.backup_info
    }

    /// The resolved, filtered schema. Available after phases 1–3 ran.
    #[must_use]
    pub fn resolved_schema(&self) -> Option<&TableSchema> {
        self.prepared.as_ref().map(|p| &p.output_schema)
    }

    /// The reconstructed catalog. Available after phases 1–3 ran.
    #[must_use]
    pub fn catalog(&self) -> Option<&Catalog> {
        self.prepared.as_ref().map(|p| &p.catalog)
    }

    /// Run the pipeline, handing each decoded row to `row_cb`.
    pub fn extract(&mut self, row_cb: RowFn<'_>) -> ExtractReport {
        let started = Instant::now();
        let mut report = ExtractReport {
            mode_used: "direct",
            ..ExtractReport::default()
        };

        match self.prepare().and_then(|()| self.stream_rows(row_cb)) {
            Ok(rows) => {
                report.success = true;
                report.rows_read = rows;
                info!(rows, "direct extraction complete");
            }
            Err(err) => {
                report.tde_detected = matches!(err, BakError::TdeEncrypted);
                report.encryption_detected = matches!(err, BakError::BackupEncrypted);
                warn!(%err, "direct extraction failed");
                report.error = Some(err);
            }
        }
        report.elapsed = started.elapsed();
        report
    }

    /// Run the pipeline into a [`RowSink`].
    pub fn extract_to_sink(&mut self, sink: &mut dyn RowSink) -> ExtractReport {
        let started = Instant::now();
        let mut report = ExtractReport {
            mode_used: "direct",
            ..ExtractReport::default()
        };

        let outcome = self.prepare().and_then(|()| {
            let schema = self
                .prepared
                .as_ref()
                .map(|p| p.output_schema.clone())
                .expect("prepared above");
            sink.open(&schema)?;

            let mut sink_error: Option<BakError> = None;
            let mut cb = |row: &[SqlValue]| match sink.write_row(row) {
                Ok(()) => true,
                Err(err) => {
                    sink_error = Some(err);
                    false
                }
            };
            let rows = self.stream_rows(&mut cb)?;
            if let Some(err) = sink_error {
                return Err(err);
            }
            sink.close()?;
            Ok(rows)
        });

        match outcome {
            Ok(rows) => {
                report.success = true;
                report.rows_read = rows;
                info!(rows, "direct extraction complete");
            }
            Err(err) => {
                report.tde_detected = matches!(err, BakError::TdeEncrypted);
                report.encryption_detected = matches!(err, BakError::BackupEncrypted);
                warn!(%err, "direct extraction failed");
                report.error = Some(err);
            }
        }
        report.elapsed = started.elapsed();
        report
    }

    /// Phases 1–2 plus a catalog scan, without resolving a target table.
    pub fn list_tables(&mut self) -> Result<Vec<TableInfo>> {
        self.phase_parse_headers()?;
        let corpus = self.phase_build_corpus()?;
        let catalog = CatalogScanner::new(&corpus).scan()?;

        let tables = catalog
            .list_user_tables()
            .into_iter()
            .map(|obj| TableInfo {
                schema_name: catalog.schema_name_for_id(obj.schema_id).to_owned(),
                table_name: obj.name,
                object_id: obj.object_id,
            })
            .collect();
        Ok(tables)
    }

    // --- Phases ---

    fn prepare(&mut self) -> Result<()> {
        if self.prepared.is_some() {
            return Ok(());
        }

        self.phase_parse_headers()?;
        let corpus = self.phase_build_corpus()?;
        let prepared = self.phase_resolve_table(corpus)?;
        self.prepared = Some(prepared);
        Ok(())
    }

    /// Phase 1: headers and the encryption gate.
    fn phase_parse_headers(&mut self) -> Result<()> {
        info!(stripes = self.options.bak_paths.len(), "phase 1: parsing backup headers");
        let mut stream = BackupStream::open(&self.options.bak_paths[0])?;
        let mut parser = HeaderParser::new();
        parser.parse(&mut stream)?;

        if parser.blocks().is_empty() {
            return Err(BakError::format("no backup sets"));
        }
        if parser.is_tde() {
            return Err(BakError::TdeEncrypted);
        }
        if parser.is_encrypted() {
            return Err(BakError::BackupEncrypted);
        }

        self.backup_info = parser.info().clone();
        self.data_start_offset = parser.data_start_offset();

        if let Some(position) = self.options.backupset {
            if self.backup_info.select_set(Some(position)).is_none() {
                warn!(position, "requested backup set not found; using the first");
            }
        }
        Ok(())
    }

    /// Phase 2: build the page corpus.
    fn phase_build_corpus(&self) -> Result<PageCorpus> {
        if self.options.indexed {
            info!("phase 2: building page index (indexed mode)");
            let config = IndexedStoreConfig {
                cache_pages: (self.options.cache_size_mb.max(1) * 1024 * 1024) / PAGE_SIZE,
                index_dir: self.options.index_dir.clone(),
                force_rescan: self.options.force_rescan,
                ..IndexedStoreConfig::default()
            };
            let store = IndexedPageStore::new(&self.options.bak_paths, config)?;

            let total = store.total_size();
            let progress = self.progress.as_deref();
            let adapter = move |pages: u64, bytes: u64, _stripe: usize| {
                if let Some(cb) = progress {
                    cb(&Progress {
                        bytes_processed: bytes,
                        bytes_total: total,
                        rows_read: pages,
                        fraction: if total == 0 { 0.0 } else { bytes as f64 / total as f64 },
                    });
                }
            };
            store.scan(Some(&adapter))?;

            if store.index().is_empty() {
                return Err(BakError::format("no candidate pages found in backup stream (pages may be encrypted)"));
            }
            info!(
                pages = store.index().len(),
                hit_rate = store.cache().hit_rate(),
                "page index ready"
            );
            Ok(PageCorpus::Indexed(store))
        } else {
            info!("phase 2: reading pages into memory");
            let store = self.scan_to_memory()?;
            if store.is_empty() {
                return Err(BakError::format("no candidate pages found in backup stream (pages may be encrypted)"));
            }
            info!(pages = store.len(), "page corpus ready");
            Ok(PageCorpus::Memory(store))
        }
    }

    /// Sequential in-memory scan with the 512-byte realignment retry.
    fn scan_to_memory(&self) -> Result<MemoryPageStore> {
        let stripes = StripeSet::open(&self.options.bak_paths)?;
        let decompressor = Decompressor::new();
        let compressed = self.backup_info.is_compressed();
        let total = stripes.total_size();

        let mut scan_start = (self.data_start_offset + PAGE_SIZE as u64 - 1)
            & !(PAGE_SIZE as u64 - 1);
        if scan_start == 0 {
            scan_start = PAGE_SIZE as u64;
        }

        let mut store = MemoryPageStore::new();
        let mut bytes_done: u64 = 0;
        for stripe in 0..stripes.len() {
            let found = self.scan_stripe_to_memory(
                &stripes,
                stripe,
                scan_start,
                PAGE_SIZE as u64,
                compressed,
                &decompressor,
                &mut store,
                &mut bytes_done,
                total,
            )?;
            if found == 0 {
                warn!(stripe, "no pages at 8 KiB alignment; retrying at 512-byte alignment");
                self.scan_stripe_to_memory(
                    &stripes,
                    stripe,
                    scan_start,
                    512,
                    compressed,
                    &decompressor,
                    &mut store,
                    &mut bytes_done,
                    total,
                )?;
            }
        }
        Ok(store)
    }

    #[allow(clippy::too_many_arguments)]
    fn scan_stripe_to_memory(
        &self,
        stripes: &StripeSet,
        stripe: usize,
        scan_start: u64,
        step: u64,
        compressed: bool,
        decompressor: &Decompressor,
        store: &mut MemoryPageStore,
        bytes_done: &mut u64,
        bytes_total: u64,
    ) -> Result<u64> {
        const CHUNK_SIZE: usize = 128 * PAGE_SIZE;
        const PROGRESS_EVERY: u64 = 16 * 1024 * 1024;

        let stripe_size = stripes.stripe_size(stripe);
        let mut chunk = vec![0u8; CHUNK_SIZE];
        let mut scratch = if compressed {
            vec![0u8; CHUNK_SIZE * 4]
        } else {
            Vec::new()
        };

        let mut found = 0u64;
        let mut offset = scan_start;
        let mut last_progress = 0u64;
        while offset < stripe_size {
            let got = stripes.read_at(stripe, offset, &mut chunk)?;
            if got < PAGE_SIZE {
                break;
            }

            let window: &[u8] = if compressed {
                let n = decompressor.decompress_into(&chunk[..got], &mut scratch);
                if n >= PAGE_SIZE {
                    &scratch[..n]
                } else {
                    &chunk[..got]
                }
            } else {
                &chunk[..got]
            };

            let mut pos = 0usize;
            while pos + PAGE_SIZE <= window.len() {
                let page = &window[pos..pos + PAGE_SIZE];
                if let Some(header) = PageHeader::parse(page) {
                    if header.is_plausible() {
                        if !store.insert(
                            i32::from(header.this_file),
                            header.this_page as i32,
                            page,
                        ) {
                            return Ok(found);
                        }
                        found += 1;
                    }
                }
                pos += step as usize;
            }

            offset += got as u64;
            *bytes_done += got as u64;

            if *bytes_done - last_progress >= PROGRESS_EVERY {
                last_progress = *bytes_done;
                if let Some(cb) = &self.progress {
                    cb(&Progress {
                        bytes_processed: *bytes_done,
                        bytes_total,
                        rows_read: 0,
                        fraction: if bytes_total == 0 {
                            0.0
                        } else {
                            *bytes_done as f64 / bytes_total as f64
                        },
                    });
                }
            }
        }
        debug!(stripe, found, step, "memory scan pass done");
        Ok(found)
    }

    /// Phase 3: catalog scan, table resolution, column filter.
    fn phase_resolve_table(&self, corpus: PageCorpus) -> Result<Prepared> {
        info!(
            schema = %self.options.schema,
            table = %self.options.table,
            "phase 3: resolving table from the system catalog"
        );
        let catalog = CatalogScanner::new(&corpus).scan()?;
        let full_schema = match catalog.resolve_table(&self.options.schema, &self.options.table) {
            Ok(schema) => schema,
            Err(err) => {
                let available = catalog.list_user_tables();
                if !available.is_empty() {
                    info!("available tables:");
                    for t in &available {
                        info!(table = %t.name, object_id = t.object_id, " ");
                    }
                }
                return Err(err);
            }
        };

        let page_obj_id = catalog.get_page_obj_id(full_schema.object_id);
        if page_obj_id == 0 {
            return Err(BakError::PageObjIdUnknown {
                schema: full_schema.schema_name.clone(),
                table: full_schema.table_name.clone(),
                object_id: full_schema.object_id,
            });
        }
        info!(
            object_id = full_schema.object_id,
            page_obj_id, "table maps to page header stamp"
        );

        // Column filter: decode with the full schema, project afterwards.
        let (output_schema, projection) = if self.options.columns.is_empty() {
            (full_schema.clone(), None)
        } else {
            let mut indices = Vec::new();
            for requested in &self.options.columns {
                match full_schema
                    .columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(requested))
                {
                    Some(i) => indices.push(i),
                    None => warn!(column = %requested, "requested column not in table schema"),
                }
            }
            if indices.is_empty() {
                (full_schema.clone(), None)
            } else {
                let mut filtered = full_schema.clone();
                filtered.columns = indices
                    .iter()
                    .map(|&i| full_schema.columns[i].clone())
                    .collect();
                (filtered, Some(indices))
            }
        };

        Ok(Prepared {
            corpus,
            catalog,
            full_schema,
            output_schema,
            projection,
            page_obj_id,
        })
    }

    /// Phase 4: stream rows from matching data pages.
    fn stream_rows(&self, row_cb: RowFn<'_>) -> Result<u64> {
        let prepared = self
            .prepared
            .as_ref()
            .expect("prepare runs before streaming");
        info!("phase 4: extracting rows");

        let decoder = RowDecoder::new(prepared.full_schema.clone());

        let mut candidates = prepared.corpus.pages_with_obj_id(prepared.page_obj_id);
        candidates.sort_unstable_by_key(|id| id.key());
        if let Some(hints) = &self.options.allocation_hints {
            let before = candidates.len();
            candidates.retain(|id| hints.contains(&id.key()));
            info!(
                kept = candidates.len(),
                dropped = before - candidates.len(),
                hints = hints.len(),
                "allocation hints applied"
            );
        }
        info!(pages = candidates.len(), "scanning candidate data pages");

        let mut page = vec![0u8; PAGE_SIZE];
        let mut rows_read: u64 = 0;
        'pages: for id in candidates {
            if !prepared.corpus.read_page(id, &mut page) {
                continue;
            }
            let Some(header) = PageHeader::parse(&page) else {
                continue;
            };
            if !header.is_data()
                || header.slot_count == 0
                || header.obj_id != prepared.page_obj_id
            {
                continue;
            }

            for row in decoder.decode_page(&page) {
                if let Some(max) = self.options.max_rows {
                    if rows_read >= max {
                        break 'pages;
                    }
                }

                let keep_going = match &prepared.projection {
                    Some(indices) => {
                        let projected: Vec<SqlValue> =
                            indices.iter().map(|&i| row[i].clone()).collect();
                        row_cb(&projected)
                    }
                    None => row_cb(&row),
                };
                if !keep_going {
                    break 'pages;
                }
                rows_read += 1;

                if rows_read % 10_000 == 0 {
                    if let Some(cb) = &self.progress {
                        cb(&Progress {
                            bytes_processed: 0,
                            bytes_total: 0,
                            rows_read,
                            fraction: 0.0,
                        });
                    }
                }
            }
        }
        Ok(rows_read)
    }
}
