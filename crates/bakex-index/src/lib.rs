//! The page index and its LRU cache.
//!
//! After a one-shot scan the index maps `(file_id, page_id)` to where the
//! page image lives in the stripe files; the bounded LRU keeps decoded
//! 8 KiB images hot for the random-access patterns of the catalog scan and
//! row extraction. The index persists to a sidecar file so reruns skip the
//! scan entirely.

mod lru;
mod page_index;
mod store;

pub use lru::LruPageCache;
pub use page_index::{IndexStats, IndexedPageType, PageIndex, PageIndexEntry};
pub use store::{IndexedPageStore, IndexedStoreConfig, ScanProgress};
