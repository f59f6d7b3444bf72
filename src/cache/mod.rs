//! The page cache (storage-core component C3): a bounded LRU over page ids,
//! with pin counts and dirty tracking so the cache never evicts a page an
//! in-flight operation is using, and never silently drops an unflushed
//! write.

use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use crate::errors::Result;
use crate::store::{Page, PageStore};

/// Default page cache capacity (§5.5): 1024 pages, ~4MiB at the default
/// 4KiB page size.
pub const DEFAULT_CACHE_PAGES: usize = 1024;

struct Entry {
    page: Page,
    dirty: bool,
    pin_count: u32,
}

struct Inner {
    entries: LruCache<u32, Entry>,
    capacity: usize,
}

/// A bounded, pinnable page cache. One mutex guards the whole LRU — the
/// O(1) map-and-link-list operations never block on I/O; `evict_if_needed`
/// never performs I/O at all (see its doc comment).
///
/// The backing `LruCache` is unbounded: capacity is enforced by this type's
/// own `evict_if_needed`, not by `lru`'s built-in cap. `LruCache::put` would
/// otherwise auto-evict its own least-recently-used entry whenever the map
/// is full — including a pinned or dirty one — which is exactly the bound
/// this cache must not let happen (§4.3, §5.5).
pub struct PageCache {
    inner: Mutex<Inner>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl PageCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        PageCache {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                capacity,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns a clone of the page, loading it from `store` on a miss and
    /// pinning it in the cache either way. Callers must call `unpin` when
    /// done with the page.
    pub fn fetch(&self, page_id: u32, store: &mut PageStore) -> Result<Page> {
        {
            let mut guard = self.inner.lock();
            if let Some(entry) = guard.entries.get_mut(&page_id) {
                entry.pin_count += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.page.clone());
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let page = store.read_page(page_id)?;
        self.insert_pinned(page_id, page.clone(), false, store)?;
        Ok(page)
    }

    /// Inserts a freshly written or allocated page directly into the cache,
    /// pinned once, without reading it back from `store`.
    pub fn insert_pinned(&self, page_id: u32, page: Page, dirty: bool, store: &mut PageStore) -> Result<()> {
        let mut guard = self.inner.lock();
        if let Some(existing) = guard.entries.get_mut(&page_id) {
            existing.page = page;
            existing.dirty = existing.dirty || dirty;
            existing.pin_count += 1;
            return Ok(());
        }
        self.evict_if_needed(&mut guard, store)?;
        guard.entries.put(
            page_id,
            Entry {
                page,
                dirty,
                pin_count: 1,
            },
        );
        Ok(())
    }

    pub fn mark_dirty(&self, page_id: u32, page: Page) {
        let mut guard = self.inner.lock();
        if let Some(entry) = guard.entries.get_mut(&page_id) {
            entry.page = page;
            entry.dirty = true;
        }
    }

    pub fn unpin(&self, page_id: u32) {
        let mut guard = self.inner.lock();
        if let Some(entry) = guard.entries.get_mut(&page_id) {
            entry.pin_count = entry.pin_count.saturating_sub(1);
        }
    }

    /// Evicts least-recently-used **clean, unpinned** pages until the cache
    /// is back within capacity. Never touches `store`: a dirty page may not
    /// be discarded without first being written through the WAL (§4.3), and
    /// the cache (C3) sits below the WAL (C4) in the dependency order (§2),
    /// so it has no way to log one itself. A dirty page only ever leaves the
    /// cache via `flush_all` (checkpoint, or a WAL-disabled commit), which
    /// clears its dirty bit before touching the main file.
    ///
    /// If every unpinned candidate is dirty (or every page is pinned), no
    /// eviction happens and the cache is allowed to grow past `capacity` —
    /// the same over-subscription allowance as for pinned pages, bounded in
    /// practice by the write-set of whatever operation is in flight until
    /// its next commit/checkpoint clears pages back to clean.
    fn evict_if_needed(&self, guard: &mut Inner, _store: &mut PageStore) -> Result<()> {
        while guard.entries.len() >= guard.capacity {
            let victim_key = guard
                .entries
                .iter()
                .rev()
                .find(|(_, e)| e.pin_count == 0 && !e.dirty)
                .map(|(k, _)| *k);
            let Some(victim_key) = victim_key else {
                break;
            };
            guard.entries.pop(&victim_key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Snapshot of every currently-dirty page, keyed by page id. Used by the
    /// engine's commit wrapper to find out which pages a just-completed
    /// structural operation (B+tree split/merge, heap append, ...) touched,
    /// so they can be staged into a `Txn` and WAL-logged after the fact
    /// without requiring every lower layer to thread a `Txn` handle through
    /// its page writes.
    pub fn dirty_pages(&self) -> Vec<(u32, Page)> {
        let guard = self.inner.lock();
        guard
            .entries
            .iter()
            .filter(|(_, e)| e.dirty)
            .map(|(k, e)| (*k, e.page.clone()))
            .collect()
    }

    /// Flushes every dirty page to `store` (used by checkpoint) without
    /// evicting anything.
    pub fn flush_all(&self, store: &mut PageStore) -> Result<()> {
        let mut guard = self.inner.lock();
        let dirty_keys: Vec<u32> = guard
            .entries
            .iter()
            .filter(|(_, e)| e.dirty)
            .map(|(k, _)| *k)
            .collect();
        for key in dirty_keys {
            if let Some(entry) = guard.entries.get_mut(&key) {
                store.write_page(&entry.page)?;
                entry.dirty = false;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Snapshot of cache counters for diagnostics (`Engine::cache_metrics`).
    pub fn metrics_snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            evictions: self.evictions(),
            len: self.len(),
            capacity: self.inner.lock().capacity,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub len: usize,
    pub capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{PageType, DEFAULT_PAGE_SIZE};

    #[test]
    fn never_exceeds_capacity_plus_pinned() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PageStore::create(dir.path().join("t.db"), DEFAULT_PAGE_SIZE).unwrap();
        let cache = PageCache::new(2);
        let mut pinned_ids = Vec::new();
        for _ in 0..5 {
            let page = store.allocate_page(PageType::Heap).unwrap();
            let id = page.header().unwrap().page_id;
            cache.insert_pinned(id, page, false, &mut store).unwrap();
            pinned_ids.push(id);
        }
        // All 5 are pinned, so the cache must be allowed to hold all of them.
        assert_eq!(cache.len(), 5);
        for id in pinned_ids {
            cache.unpin(id);
        }
    }

    #[test]
    fn evicts_clean_lru_pages_but_never_a_dirty_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PageStore::create(dir.path().join("t.db"), DEFAULT_PAGE_SIZE).unwrap();
        let cache = PageCache::new(1);

        let a = store.allocate_page(PageType::Heap).unwrap();
        let a_id = a.header().unwrap().page_id;
        cache.insert_pinned(a_id, a, true, &mut store).unwrap();
        cache.unpin(a_id);

        // `a` is the cache's only resident page, dirty and unpinned, so
        // there is no clean victim to make room for `b`: the cache must
        // grow past capacity rather than flush `a` to the main file itself.
        let b = store.allocate_page(PageType::Heap).unwrap();
        let b_id = b.header().unwrap().page_id;
        cache.insert_pinned(b_id, b, false, &mut store).unwrap();
        cache.unpin(b_id);

        assert_eq!(cache.len(), 2, "a dirty page must never be silently evicted");
        assert_eq!(cache.evictions(), 0);

        // Only `flush_all` (standing in for a checkpoint) may write a dirty
        // page to the main file; doing so clears its dirty bit.
        cache.flush_all(&mut store).unwrap();

        // Both pages are clean now, so ordinary LRU eviction can catch back
        // up to `capacity` as soon as there is pressure to do so.
        let c = store.allocate_page(PageType::Heap).unwrap();
        let c_id = c.header().unwrap().page_id;
        cache.insert_pinned(c_id, c, false, &mut store).unwrap();
        cache.unpin(c_id);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.evictions(), 2);
        assert!(store.read_page(a_id).unwrap().verify_crc());
        assert!(store.read_page(b_id).unwrap().verify_crc());
    }
}
