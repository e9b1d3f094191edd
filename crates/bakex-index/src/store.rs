//! The indexed page store: one-shot parallel scan, then random access
//! through the LRU cache.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{debug, info, warn};

use bakex_compress::Decompressor;
use bakex_error::{BakError, Result};
use bakex_mtf::HeaderParser;
use bakex_stripe::{BackupStream, StripeSet};
use bakex_types::{page_key, PageHeader, PageId, PAGE_SIZE};

use crate::{IndexedPageType, LruPageCache, PageIndex, PageIndexEntry};

/// Scan-progress callback: `(pages_indexed, bytes_read, stripe_index)`.
pub type ScanProgress<'a> = &'a (dyn Fn(u64, u64, usize) + Sync);

/// Configuration for [`IndexedPageStore`].
#[derive(Debug, Clone)]
pub struct IndexedStoreConfig {
    /// LRU capacity in pages.
    pub cache_pages: usize,
    /// Where the sidecar lives; next to the first stripe when `None`.
    pub index_dir: Option<PathBuf>,
    /// Ignore an existing sidecar and rescan.
    pub force_rescan: bool,
    /// Persist the index after a scan.
    pub save_index: bool,
    /// Scan worker cap; 0 = number of CPU cores.
    pub num_threads: usize,
    /// Bytes per scan read.
    pub scan_chunk_size: usize,
}

impl Default for IndexedStoreConfig {
    fn default() -> Self {
        Self {
            cache_pages: 256 * 1024 * 1024 / PAGE_SIZE,
            index_dir: None,
            force_rescan: false,
            save_index: true,
            num_threads: 0,
            scan_chunk_size: 64 * 1024,
        }
    }
}

/// Random access to every page image in a striped backup.
///
/// `scan` builds (or reloads) the index once; afterwards `get_page`
/// serves 8 KiB images through the LRU cache. The index and cache are
/// shared, read-mostly structures: after `indexed` flips on, nothing is
/// appended.
pub struct IndexedPageStore {
    paths: Vec<PathBuf>,
    config: IndexedStoreConfig,
    stripes: StripeSet,
    index: PageIndex,
    cache: LruPageCache,
    decompressor: Decompressor,
    indexed: AtomicBool,
    compressed: AtomicBool,
    data_start_offset: AtomicU64,
    pages_scanned: AtomicU64,
    bytes_read: AtomicU64,
}

impl IndexedPageStore {
    /// Open the stripe files and prepare an empty index.
    pub fn new<P: AsRef<Path>>(paths: &[P], config: IndexedStoreConfig) -> Result<Self> {
        let stripes = StripeSet::open(paths)?;
        let cache = LruPageCache::new(config.cache_pages);
        info!(
            stripes = stripes.len(),
            cache_pages = config.cache_pages,
            "indexed page store ready"
        );
        Ok(Self {
            paths: paths.iter().map(|p| p.as_ref().to_path_buf()).collect(),
            config,
            stripes,
            index: PageIndex::new(),
            cache,
            decompressor: Decompressor::new(),
            indexed: AtomicBool::new(false),
            compressed: AtomicBool::new(false),
            data_start_offset: AtomicU64::new(0),
            pages_scanned: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
        })
    }

    /// Path of the sidecar index file.
    #[must_use]
    pub fn index_file_path(&self) -> PathBuf {
        if let Some(dir) = &self.config.index_dir {
            if let Err(err) = std::fs::create_dir_all(dir) {
                warn!(dir = %dir.display(), %err, "could not create index directory");
            }
            return dir.join("bakex_pages.idx");
        }
        let first = &self.paths[0];
        let stem = first
            .file_stem()
            .map_or_else(|| "backup".to_owned(), |s| s.to_string_lossy().into_owned());
        first
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("{stem}_bakex.idx"))
    }

    /// Build the index, or reload it from the sidecar.
    ///
    /// Idempotent: a second call is a no-op once `indexed` is set.
    pub fn scan(&self, progress: Option<ScanProgress<'_>>) -> Result<()> {
        if self.indexed.load(Ordering::Acquire) {
            debug!("index already built, skipping scan");
            return Ok(());
        }

        // Header metadata is needed in both the reload and scan paths:
        // `get_page` must know whether chunks need decompression.
        let (data_start, compressed) = self.parse_first_stripe_header()?;
        self.data_start_offset.store(data_start, Ordering::Release);
        self.compressed.store(compressed, Ordering::Release);

        if !self.config.force_rescan {
            let sidecar = self.index_file_path();
            if self.index.load_from_file(&sidecar)? {
                info!(path = %sidecar.display(), "reusing existing page index");
                self.indexed.store(true, Ordering::Release);
                return Ok(());
            }
        }

        info!(stripes = self.stripes.len(), "starting parallel page scan");
        let started = std::time::Instant::now();

        let worker_limit = if self.config.num_threads == 0 {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            self.config.num_threads
        };
        let workers = worker_limit.min(self.stripes.len()).max(1);

        std::thread::scope(|scope| {
            for worker in 0..workers {
                let progress = progress;
                scope.spawn(move || {
                    // Round-robin stripe assignment by index.
                    let mut stripe = worker;
                    while stripe < self.stripes.len() {
                        self.scan_stripe(stripe, progress);
                        stripe += workers;
                    }
                });
            }
        });

        info!(
            pages = self.index.len(),
            bytes = self.bytes_read.load(Ordering::Relaxed),
            elapsed_ms = started.elapsed().as_millis() as u64,
            index_mb = self.index.memory_usage_bytes() as f64 / (1024.0 * 1024.0),
            "page scan complete"
        );

        if self.config.save_index && !self.index.is_empty() {
            let sidecar = self.index_file_path();
            if let Err(err) = self.index.save_to_file(&sidecar) {
                warn!(path = %sidecar.display(), %err, "could not persist page index");
            }
        }

        self.indexed.store(true, Ordering::Release);
        Ok(())
    }

    fn parse_first_stripe_header(&self) -> Result<(u64, bool)> {
        let mut stream = BackupStream::open(&self.paths[0])?;
        let mut parser = HeaderParser::new();
        parser.parse(&mut stream)?;
        let info = parser.info();
        if info.backup_sets.is_empty() {
            return Err(BakError::format("no backup sets in header region"));
        }
        Ok((parser.data_start_offset(), info.is_compressed()))
    }

    /// Scan one stripe: chunked reads, optional decompression, 8 KiB
    /// candidate windows. A stripe with no candidates at page alignment
    /// gets a second pass at 512-byte alignment.
    fn scan_stripe(&self, stripe_index: usize, progress: Option<ScanProgress<'_>>) {
        let found = self.scan_stripe_aligned(stripe_index, PAGE_SIZE as u64, progress);
        if found == 0 {
            warn!(stripe_index, "no pages at 8 KiB alignment; retrying at 512-byte alignment");
            self.scan_stripe_aligned(stripe_index, 512, progress);
        }
    }

    fn scan_stripe_aligned(
        &self,
        stripe_index: usize,
        step: u64,
        progress: Option<ScanProgress<'_>>,
    ) -> u64 {
        let stripe_size = self.stripes.stripe_size(stripe_index);
        let compressed = self.compressed.load(Ordering::Acquire);

        // Page-aligned start at or after the data region; offset 0 means
        // the header walk failed, so skip the first page instead.
        let mut offset = self.data_start_offset.load(Ordering::Acquire);
        offset = (offset + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1);
        if offset == 0 {
            offset = PAGE_SIZE as u64;
        }

        let chunk_size = self.config.scan_chunk_size.max(PAGE_SIZE);
        let mut chunk = vec![0u8; chunk_size];
        let mut scratch = if compressed {
            vec![0u8; chunk_size * 4]
        } else {
            Vec::new()
        };

        let mut found: u64 = 0;
        while offset < stripe_size {
            let got = match self.stripes.read_at(stripe_index, offset, &mut chunk) {
                Ok(n) => n,
                Err(err) => {
                    warn!(stripe_index, offset, %err, "stripe read failed during scan");
                    break;
                }
            };
            if got < PAGE_SIZE {
                break;
            }

            let window: &[u8] = if compressed {
                let n = self.decompressor.decompress_into(&chunk[..got], &mut scratch);
                if n >= PAGE_SIZE {
                    &scratch[..n]
                } else {
                    // Block defeated every decoder; skip it and move on.
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
                        self.index.add_entry(
                            i32::from(header.this_file),
                            header.this_page as i32,
                            PageIndexEntry {
                                stripe_index: stripe_index as u8,
                                page_type: IndexedPageType::classify(&header) as u8,
                                object_id: header.obj_id,
                                file_offset: offset + pos as u64,
                            },
                        );
                        found += 1;
                        self.pages_scanned.fetch_add(1, Ordering::Relaxed);
                    }
                }
                pos += step as usize;
            }

            self.bytes_read.fetch_add(got as u64, Ordering::Relaxed);
            offset += got as u64;

            if let Some(cb) = progress {
                cb(
                    self.pages_scanned.load(Ordering::Relaxed),
                    self.bytes_read.load(Ordering::Relaxed),
                    stripe_index,
                );
            }
        }

        debug!(stripe_index, found, step, "stripe scan pass done");
        found
    }

    /// Fetch one 8 KiB page image into `out`.
    ///
    /// Cache first, then the indexed stripe offset; a successful read is
    /// inserted into the cache. Returns `false` for pages the scan never
    /// saw or that cannot be re-read.
    pub fn get_page(&self, file_id: i32, page_id: i32, out: &mut [u8]) -> bool {
        debug_assert!(out.len() >= PAGE_SIZE);
        if !self.indexed.load(Ordering::Acquire) {
            if let Err(err) = self.scan(None) {
                warn!(%err, "implicit scan failed");
                return false;
            }
        }

        let key = page_key(file_id, page_id);
        if self.cache.get(key, out) {
            return true;
        }

        let Some(entry) = self.index.lookup(file_id, page_id) else {
            return false;
        };
        if !self.read_page_at(&entry, out) {
            return false;
        }
        self.cache.put(key, &out[..PAGE_SIZE]);
        true
    }

    fn read_page_at(&self, entry: &PageIndexEntry, out: &mut [u8]) -> bool {
        let stripe_index = usize::from(entry.stripe_index);
        match self
            .stripes
            .read_exact_at(stripe_index, entry.file_offset, &mut out[..PAGE_SIZE])
        {
            Ok(()) => {}
            Err(err) => {
                warn!(
                    stripe_index,
                    offset = entry.file_offset,
                    %err,
                    "page re-read failed"
                );
                return false;
            }
        }

        // Compressed backups may need the containing chunk re-decoded.
        if self.compressed.load(Ordering::Acquire) && bakex_compress::is_compressed(out) {
            let mut scratch = vec![0u8; PAGE_SIZE * 2];
            let n = self
                .decompressor
                .decompress_into(&out[..PAGE_SIZE], &mut scratch);
            if n >= PAGE_SIZE {
                out[..PAGE_SIZE].copy_from_slice(&scratch[..PAGE_SIZE]);
            }
        }
        true
    }

    /// The underlying index.
    #[must_use]
    pub fn index(&self) -> &PageIndex {
        &self.index
    }

    /// The underlying cache (for hit-rate reporting).
    #[must_use]
    pub fn cache(&self) -> &LruPageCache {
        &self.cache
    }

    /// All indexed pages whose header stamp equals `object_id`.
    #[must_use]
    pub fn pages_with_obj_id(&self, object_id: u32) -> Vec<PageId> {
        self.index.pages_by_object(object_id)
    }

    /// Whether the backup stream is compressed. Valid after `scan`.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.compressed.load(Ordering::Acquire)
    }

    /// Offset where the page region begins. Valid after `scan`.
    #[must_use]
    pub fn data_start_offset(&self) -> u64 {
        self.data_start_offset.load(Ordering::Acquire)
    }

    /// Total bytes consumed by scan passes.
    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Combined size of all stripes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.stripes.total_size()
    }
}
