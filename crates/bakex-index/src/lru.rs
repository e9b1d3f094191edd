//! Bounded LRU cache of decoded 8 KiB page images.
//!
//! Classic doubly-linked recency list plus a hash map from key to list
//! node, both behind one mutex. `get` must hold the lock across the list
//! splice and the copy into the caller's buffer so a concurrent eviction
//! cannot free the entry mid-copy.

use std::collections::HashMap;

use parking_lot::Mutex;

use bakex_types::PAGE_SIZE;

const NIL: usize = usize::MAX;

struct Node {
    key: i64,
    data: Box<[u8]>,
    prev: usize,
    next: usize,
}

struct Inner {
    capacity: usize,
    nodes: Vec<Node>,
    free: Vec<usize>,
    /// Most recently used.
    head: usize,
    /// Least recently used; evicted first.
    tail: usize,
    lookup: HashMap<i64, usize>,
    hits: u64,
    misses: u64,
}

impl Inner {
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        if prev != NIL {
            self.nodes[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next].prev = prev;
        } else {
            self.tail = prev;
        }
    }

    fn push_front(&mut self, idx: usize) {
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = self.head;
        if self.head != NIL {
            self.nodes[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn evict_tail(&mut self) {
        let idx = self.tail;
        if idx == NIL {
            return;
        }
        self.unlink(idx);
        self.lookup.remove(&self.nodes[idx].key);
        self.free.push(idx);
    }
}

/// Thread-safe LRU page cache, capacity in page count.
pub struct LruPageCache {
    inner: Mutex<Inner>,
}

impl LruPageCache {
    /// Create a cache holding at most `max_pages` images.
    #[must_use]
    pub fn new(max_pages: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                capacity: max_pages.max(1),
                nodes: Vec::new(),
                free: Vec::new(),
                head: NIL,
                tail: NIL,
                lookup: HashMap::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Copy a cached page into `out`; promotes the entry to most recent.
    pub fn get(&self, key: i64, out: &mut [u8]) -> bool {
        let mut inner = self.inner.lock();
        let idx = match inner.lookup.get(&key) {
            Some(&idx) => idx,
            None => {
                inner.misses += 1;
                return false;
            }
        };
        inner.touch(idx);
        let n = out.len().min(inner.nodes[idx].data.len());
        out[..n].copy_from_slice(&inner.nodes[idx].data[..n]);
        inner.hits += 1;
        true
    }

    /// Insert or refresh a page, evicting LRU entries to fit.
    pub fn put(&self, key: i64, page: &[u8]) {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        let mut inner = self.inner.lock();

        if let Some(&idx) = inner.lookup.get(&key) {
            inner.nodes[idx].data.copy_from_slice(page);
            inner.touch(idx);
            return;
        }

        while inner.lookup.len() >= inner.capacity {
            inner.evict_tail();
        }

        let idx = match inner.free.pop() {
            Some(idx) => {
                inner.nodes[idx].key = key;
                inner.nodes[idx].data.copy_from_slice(page);
                idx
            }
            None => {
                inner.nodes.push(Node {
                    key,
                    data: page.to_vec().into_boxed_slice(),
                    prev: NIL,
                    next: NIL,
                });
                inner.nodes.len() - 1
            }
        };
        inner.push_front(idx);
        inner.lookup.insert(key, idx);
    }

    #[must_use]
    pub fn contains(&self, key: i64) -> bool {
        self.inner.lock().lookup.contains_key(&key)
    }

    /// Drop one entry if present.
    pub fn remove(&self, key: i64) {
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.lookup.remove(&key) {
            inner.unlink(idx);
            inner.free.push(idx);
        }
    }

    /// Drop everything and reset the counters.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.lookup.clear();
        inner.nodes.clear();
        inner.free.clear();
        inner.head = NIL;
        inner.tail = NIL;
        inner.hits = 0;
        inner.misses = 0;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().lookup.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.inner.lock().hits
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.inner.lock().misses
    }

    /// Hit fraction over all lookups so far; 0.0 before any lookup.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let inner = self.inner.lock();
        let total = inner.hits + inner.misses;
        if total == 0 {
            return 0.0;
        }
        inner.hits as f64 / total as f64
    }

    /// Resident bytes: data plus node and map overhead per entry.
    #[must_use]
    pub fn memory_usage_bytes(&self) -> usize {
        self.len() * (PAGE_SIZE + 96)
    }

    /// Change the capacity, evicting from the LRU tail until it fits.
    pub fn resize(&self, max_pages: usize) {
        let mut inner = self.inner.lock();
        inner.capacity = max_pages.max(1);
        while inner.lookup.len() > inner.capacity {
            inner.evict_tail();
        }
    }
}
