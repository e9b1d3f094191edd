//! The `(file_id, page_id) → stripe location` map and its sidecar file.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use bakex_error::Result;
use bakex_types::bytes::{u32_at, u64_at};
use bakex_types::{page_key, PageId, PageHeader, PageType};

/// Classified page type stored in index entries.
///
/// Mostly the raw header type; `System` collapses the unknown-type pages
/// whose `obj_id` marks them as system catalog storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IndexedPageType {
    Unknown = 0,
    Data = 1,
    Index = 2,
    TextMix = 3,
    TextTree = 4,
    System = 5,
    Gam = 8,
    Sgam = 9,
    Iam = 10,
    Pfs = 11,
    Boot = 13,
    FileHeader = 15,
}

impl IndexedPageType {
    /// Classify a page from its header.
    #[must_use]
    pub fn classify(header: &PageHeader) -> Self {
        match PageType::from_raw(header.page_type) {
            Some(PageType::Data) => Self::Data,
            Some(PageType::Index) => Self::Index,
            Some(PageType::TextMix) => Self::TextMix,
            Some(PageType::TextTree) => Self::TextTree,
            Some(PageType::Gam) => Self::Gam,
            Some(PageType::Sgam) => Self::Sgam,
            Some(PageType::Iam) => Self::Iam,
            Some(PageType::Pfs) => Self::Pfs,
            Some(PageType::Boot) => Self::Boot,
            Some(PageType::FileHeader) => Self::FileHeader,
            _ => {
                // System base tables sit on pages with small obj_id stamps.
                if header.obj_id > 0 && header.obj_id < 100 {
                    Self::System
                } else {
                    Self::Unknown
                }
            }
        }
    }

    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Data,
            2 => Self::Index,
            3 => Self::TextMix,
            4 => Self::TextTree,
            5 => Self::System,
            8 => Self::Gam,
            9 => Self::Sgam,
            10 => Self::Iam,
            11 => Self::Pfs,
            13 => Self::Boot,
            15 => Self::FileHeader,
            _ => Self::Unknown,
        }
    }
}

/// Where one page image lives. 16 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageIndexEntry {
    /// Which stripe file holds the bytes.
    pub stripe_index: u8,
    /// Classified [`IndexedPageType`] as a raw byte.
    pub page_type: u8,
    /// Page header `obj_id` stamp, for filtering without a page read.
    pub object_id: u32,
    /// Byte offset of the 8 KiB window within the stripe.
    pub file_offset: u64,
}

/// Aggregate counters mirrored into the sidecar header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub total_pages: u64,
    pub data_pages: u64,
    pub system_pages: u64,
}

/// Thread-safe page index.
///
/// One entry per `(file_id, page_id)` observed; duplicate sightings are
/// resolved last-writer-wins, which across an ascending scan keeps the
/// higher file offset.
#[derive(Default)]
pub struct PageIndex {
    entries: Mutex<HashMap<i64, PageIndexEntry>>,
}

const SIDECAR_MAGIC: &[u8; 8] = b"BAKRIDX\0";
const SIDECAR_VERSION: u32 = 1;
const SIDECAR_HEADER_SIZE: usize = 64;
const SIDECAR_ENTRY_SIZE: usize = 24;

impl PageIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for a page.
    pub fn add_entry(&self, file_id: i32, page_id: i32, entry: PageIndexEntry) {
        self.entries.lock().insert(page_key(file_id, page_id), entry);
    }

    /// Look up a page.
    #[must_use]
    pub fn lookup(&self, file_id: i32, page_id: i32) -> Option<PageIndexEntry> {
        self.entries.lock().get(&page_key(file_id, page_id)).copied()
    }

    #[must_use]
    pub fn contains(&self, file_id: i32, page_id: i32) -> bool {
        self.entries.lock().contains_key(&page_key(file_id, page_id))
    }

    /// All pages of one classified type.
    #[must_use]
    pub fn pages_by_type(&self, page_type: IndexedPageType) -> Vec<PageId> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, e)| e.page_type == page_type as u8)
            .map(|(&k, _)| bakex_types::split_page_key(k))
            .collect()
    }

    /// All pages stamped with one header `obj_id`.
    #[must_use]
    pub fn pages_by_object(&self, object_id: u32) -> Vec<PageId> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, e)| e.object_id == object_id)
            .map(|(&k, _)| bakex_types::split_page_key(k))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Estimated resident size: key + entry + hash overhead per slot.
    #[must_use]
    pub fn memory_usage_bytes(&self) -> usize {
        self.entries.lock().len() * 40
    }

    /// Page-type counters for reporting and the sidecar header.
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        let entries = self.entries.lock();
        let mut stats = IndexStats {
            total_pages: entries.len() as u64,
            ..IndexStats::default()
        };
        for entry in entries.values() {
            match IndexedPageType::from_raw(entry.page_type) {
                IndexedPageType::Data => stats.data_pages += 1,
                IndexedPageType::System => stats.system_pages += 1,
                _ => {}
            }
        }
        stats
    }

    /// Snapshot of every `(key, entry)` pair.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(i64, PageIndexEntry)> {
        let mut v: Vec<(i64, PageIndexEntry)> = self
            .entries
            .lock()
            .iter()
            .map(|(&k, &e)| (k, e))
            .collect();
        v.sort_unstable_by_key(|&(k, _)| k);
        v
    }

    /// Persist to the sidecar format: a 64-byte header then 24-byte
    /// little-endian records.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot();
        let stats = self.stats();

        let mut w = BufWriter::new(File::create(path)?);

        let mut header = [0u8; SIDECAR_HEADER_SIZE];
        header[0..8].copy_from_slice(SIDECAR_MAGIC);
        header[8..12].copy_from_slice(&SIDECAR_VERSION.to_le_bytes());
        header[12..16].copy_from_slice(&(snapshot.len() as u32).to_le_bytes());
        header[16..24].copy_from_slice(&stats.total_pages.to_le_bytes());
        header[24..32].copy_from_slice(&stats.data_pages.to_le_bytes());
        header[32..40].copy_from_slice(&stats.system_pages.to_le_bytes());
        w.write_all(&header)?;

        for (key, entry) in snapshot {
            let mut rec = [0u8; SIDECAR_ENTRY_SIZE];
            rec[0..8].copy_from_slice(&key.to_le_bytes());
            rec[8] = entry.stripe_index;
            rec[9] = entry.page_type;
            // rec[10..12] is padding, kept zero.
            rec[12..16].copy_from_slice(&entry.object_id.to_le_bytes());
            rec[16..24].copy_from_slice(&entry.file_offset.to_le_bytes());
            w.write_all(&rec)?;
        }
        w.flush()?;

        info!(path = %path.display(), entries = stats.total_pages, "saved page index sidecar");
        Ok(())
    }

    /// Load from the sidecar format.
    ///
    /// Returns `false` (leaving the index untouched) when the file is
    /// missing or its magic/version does not match; the caller rescans.
    pub fn load_from_file(&self, path: &Path) -> Result<bool> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(_) => {
                debug!(path = %path.display(), "no index sidecar");
                return Ok(false);
            }
        };
        let mut r = BufReader::new(file);

        let mut header = [0u8; SIDECAR_HEADER_SIZE];
        if r.read_exact(&mut header).is_err() {
            warn!(path = %path.display(), "index sidecar truncated header; ignoring");
            return Ok(false);
        }
        if &header[0..8] != SIDECAR_MAGIC {
            warn!(path = %path.display(), "index sidecar magic mismatch; ignoring");
            return Ok(false);
        }
        if u32_at(&header, 8) != Some(SIDECAR_VERSION) {
            warn!(path = %path.display(), "index sidecar version mismatch; ignoring");
            return Ok(false);
        }
        let entry_count = u32_at(&header, 12).unwrap_or(0) as usize;

        let mut entries = HashMap::with_capacity(entry_count);
        let mut rec = [0u8; SIDECAR_ENTRY_SIZE];
        for _ in 0..entry_count {
            if r.read_exact(&mut rec).is_err() {
                warn!(path = %path.display(), "index sidecar truncated entries; ignoring");
                return Ok(false);
            }
            let key = u64_at(&rec, 0).unwrap_or(0) as i64;
            let entry = PageIndexEntry {
                stripe_index: rec[8],
                page_type: rec[9],
                object_id: u32_at(&rec, 12).unwrap_or(0),
                file_offset: u64_at(&rec, 16).unwrap_or(0),
            };
            entries.insert(key, entry);
        }

        *self.entries.lock() = entries;
        info!(path = %path.display(), entries = entry_count, "loaded page index sidecar");
        Ok(true)
    }
}
