//! In-memory page corpus for the non-indexed path.
//!
//! Small backups skip the sidecar machinery: every candidate page image
//! is stashed whole, bounded at 512 MiB, and served straight from the
//! map.

use std::collections::HashMap;

use tracing::warn;

use bakex_catalog::PageStore;
use bakex_types::{page_key, PageHeader, PageId, PageType, PAGE_SIZE};

/// Upper bound on stashed page bytes before the scan stops early.
pub const MEMORY_CAP_BYTES: usize = 512 * 1024 * 1024;

/// Decoded pages keyed by the compound page id.
#[derive(Default)]
pub struct MemoryPageStore {
    pages: HashMap<i64, Box<[u8]>>,
    capped: bool,
}

impl MemoryPageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stash one page image; first sighting wins.
    ///
    /// Returns `false` once the memory cap is hit, signalling the caller
    /// to stop scanning.
    pub fn insert(&mut self, file_id: i32, page_id: i32, image: &[u8]) -> bool {
        debug_assert_eq!(image.len(), PAGE_SIZE);
        if self.pages.len() * PAGE_SIZE > MEMORY_CAP_BYTES {
            if !self.capped {
                warn!(
                    pages = self.pages.len(),
                    "in-memory page cap reached; consider --indexed"
                );
                self.capped = true;
            }
            return false;
        }
        self.pages
            .entry(page_key(file_id, page_id))
            .or_insert_with(|| image.to_vec().into_boxed_slice());
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Whether the scan was cut short by the memory cap.
    #[must_use]
    pub fn capped(&self) -> bool {
        self.capped
    }
}

impl PageStore for MemoryPageStore {
    fn read_page(&self, id: PageId, out: &mut [u8]) -> bool {
        match self.pages.get(&id.key()) {
            Some(image) => {
                out[..PAGE_SIZE].copy_from_slice(image);
                true
            }
            None => false,
        }
    }

    fn pages_with_obj_id(&self, obj_id: u32) -> Vec<PageId> {
        self.pages
            .values()
            .filter_map(|image| {
                let hdr = PageHeader::parse(image)?;
                (hdr.obj_id == obj_id).then(|| hdr.page_id())
            })
            .collect()
    }

    fn pages_of_type(&self, page_type: PageType) -> Vec<PageId> {
        self.pages
            .values()
            .filter_map(|image| {
                let hdr = PageHeader::parse(image)?;
                (hdr.page_type == page_type as u8).then(|| hdr.page_id())
            })
            .collect()
    }
}
