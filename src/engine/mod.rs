//! The engine (§6.2): the public entry point that owns the main file, the
//! WAL, the page cache, and the catalog, and hands out `Collection` handles.
//!
//! Structural mutations (heap appends, B+tree splits/merges, catalog
//! rewrites) are applied directly against the shared store and cache —
//! `collection::heap`, `collection::catalog` and `btree::BTree` all work
//! this way rather than staging through a `wal::Txn` themselves — and then
//! wrapped, after the fact, by [`commit_dirty_pages`]: it snapshots every
//! page the cache currently considers dirty, stages that snapshot into a
//! freshly begun transaction, and commits it so the operation is
//! WAL-logged and (if `fsync_on_commit`) durable before the call returns.
//! `EngineShared::write_lock` serializes the whole mutate-then-log sequence
//! across collections, standing in for the engine write latch of §5.2 —
//! see `DESIGN.md` for the concurrency simplifications this implies.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::cache::{CacheMetricsSnapshot, PageCache, DEFAULT_CACHE_PAGES};
use crate::collection::catalog::{self, Catalog};
use crate::collection::Collection;
use crate::errors::{DbError, Result};
use crate::store::{PageStore, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE, NONE_PAGE};
use crate::wal::{self, Txn, TxnManager, WalFile, DEFAULT_GROUP_COMMIT_WINDOW_MS};

/// Options recognized by [`Engine::open`] (§6.2).
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Page size in bytes; must be a power of two in `512..=65536`. Only
    /// consulted when creating a brand new file — an existing file keeps
    /// whatever page size it was created with.
    pub page_size: u32,
    /// Page cache capacity, in pages.
    pub cache_pages: usize,
    /// When `false`, mutations bypass the WAL entirely and are flushed
    /// straight to the main file: faster, but a crash loses everything
    /// since the last explicit `flush()`.
    pub wal_enabled: bool,
    /// A checkpoint is forced once this many milliseconds have elapsed
    /// since the last one, regardless of dirty-page count.
    pub checkpoint_interval_ms: u64,
    /// Group-commit batching window (§4.4.3).
    pub group_commit_window_ms: u64,
    /// Whether `commit()` waits for the WAL to be fsynced before
    /// returning. `false` trades durability for latency.
    pub fsync_on_commit: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            page_size: DEFAULT_PAGE_SIZE,
            cache_pages: DEFAULT_CACHE_PAGES,
            wal_enabled: true,
            checkpoint_interval_ms: 5_000,
            group_commit_window_ms: DEFAULT_GROUP_COMMIT_WINDOW_MS,
            fsync_on_commit: true,
        }
    }
}

impl EngineOptions {
    fn validate(&self) -> Result<()> {
        if self.page_size < MIN_PAGE_SIZE || self.page_size > MAX_PAGE_SIZE || !self.page_size.is_power_of_two() {
            return Err(DbError::InvalidOption(format!(
                "page_size must be a power of two in {MIN_PAGE_SIZE}..={MAX_PAGE_SIZE}, got {}",
                self.page_size
            )));
        }
        if self.cache_pages == 0 {
            return Err(DbError::InvalidOption("cache_pages must be positive".into()));
        }
        if self.checkpoint_interval_ms == 0 {
            return Err(DbError::InvalidOption("checkpoint_interval_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Dirty-page watermark that forces a checkpoint regardless of elapsed
/// time (§4.4.4: "by dirty-page watermark or elapsed time"), expressed as a
/// fraction of the cache capacity so it scales with `cache_pages`.
const CHECKPOINT_DIRTY_FRACTION: f64 = 0.5;

/// State shared by an `Engine` and every `Collection` handle it has given
/// out. `Collection` holds a `Weak` reference so dropping the last `Engine`
/// clone releases the files even if callers are still holding collection
/// handles (further calls on those fail with `AlreadyDisposed`).
pub(crate) struct EngineShared {
    pub(crate) store: Mutex<PageStore>,
    pub(crate) cache: PageCache,
    pub(crate) wal: Mutex<WalFile>,
    pub(crate) txn_mgr: TxnManager,
    /// Serializes the mutate-then-log sequence described in the module
    /// doc comment; distinct from `TxnManager`'s own internal write latch.
    pub(crate) write_lock: Mutex<()>,
    pub(crate) catalog: RwLock<Catalog>,
    pub(crate) options: EngineOptions,
    pub(crate) index_build_ms: Mutex<HashMap<(String, String), u64>>,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    dirty_since_checkpoint: AtomicU64,
    last_checkpoint: Mutex<Instant>,
    disposed: AtomicBool,
}

impl EngineShared {
    pub(crate) fn check_disposed(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(DbError::AlreadyDisposed);
        }
        Ok(())
    }

    /// Snapshots every dirty cache page into a freshly begun transaction
    /// and commits it, or — with WAL disabled — flushes the dirty pages to
    /// the main file directly. Must be called with `write_lock` held by
    /// the caller.
    pub(crate) fn commit_dirty_pages(&self) -> Result<()> {
        if !self.options.wal_enabled {
            let mut store = self.store.lock();
            self.cache.flush_all(&mut store)?;
            return Ok(());
        }

        let dirty = self.cache.dirty_pages();
        let dirty_count = dirty.len();
        let mut txn: Txn<'_> = self.txn_mgr.begin(&self.wal)?;
        for (_, page) in dirty {
            txn.write_page(page)?;
        }
        let mut store = self.store.lock();
        txn.commit(&self.wal, &self.cache, &mut store, self.options.fsync_on_commit)?;
        drop(store);

        self.dirty_since_checkpoint.fetch_add(dirty_count as u64, Ordering::Relaxed);
        self.maybe_checkpoint()?;
        Ok(())
    }

    fn maybe_checkpoint(&self) -> Result<()> {
        let watermark = (self.options.cache_pages as f64 * CHECKPOINT_DIRTY_FRACTION) as u64;
        let dirty = self.dirty_since_checkpoint.load(Ordering::Relaxed);
        let elapsed = self.last_checkpoint.lock().elapsed();
        if dirty >= watermark.max(1) || elapsed >= Duration::from_millis(self.options.checkpoint_interval_ms) {
            self.checkpoint()?;
        }
        Ok(())
    }

    pub(crate) fn checkpoint(&self) -> Result<()> {
        let mut wal = self.wal.lock();
        let mut store = self.store.lock();
        wal::run_checkpoint(
            &mut store,
            &self.cache,
            &mut wal,
            || self.txn_mgr.alloc_lsn(),
            self.txn_mgr.oldest_active_txn_id(),
        )?;
        self.dirty_since_checkpoint.store(0, Ordering::Relaxed);
        *self.last_checkpoint.lock() = Instant::now();
        Ok(())
    }

    pub(crate) fn persist_catalog(&self, store: &mut PageStore, catalog: &Catalog) -> Result<()> {
        let old_root = store.catalog_root();
        catalog::write_spanning(store, &self.cache, old_root, catalog)?;
        Ok(())
    }
}

/// The embedded database engine: one main file, one WAL, one page cache,
/// one catalog, shared by every collection handle it hands out.
#[derive(Clone)]
pub struct Engine(Arc<EngineShared>);

impl Engine {
    /// Opens (or creates) the database at `path`, running crash recovery if
    /// the WAL has uncommitted or uncheckpointed content (§4.4.5).
    pub fn open(path: impl AsRef<Path>, options: EngineOptions) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref();
        let wal_path = WalFile::path_for_main(path);

        let mut store = if path.exists() {
            PageStore::open(path)?
        } else {
            PageStore::create(path, options.page_size)?
        };
        let mut wal_file = WalFile::open_or_create(&wal_path)?;

        if options.wal_enabled {
            wal::recover(&mut store, &mut wal_file)?;
        }

        let cache = PageCache::new(options.cache_pages);
        let catalog = catalog::read_spanning(&mut store, &cache, store.catalog_root())?;

        let shared = EngineShared {
            store: Mutex::new(store),
            cache,
            wal: Mutex::new(wal_file),
            txn_mgr: TxnManager::new(Duration::from_millis(options.group_commit_window_ms)),
            write_lock: Mutex::new(()),
            catalog: RwLock::new(catalog),
            index_build_ms: Mutex::new(HashMap::new()),
            collections: RwLock::new(HashMap::new()),
            dirty_since_checkpoint: AtomicU64::new(0),
            last_checkpoint: Mutex::new(Instant::now()),
            disposed: AtomicBool::new(false),
            options,
        };
        Ok(Engine(Arc::new(shared)))
    }

    /// Returns the collection named `name`, creating it (with an empty
    /// index set and an undecided id-generation strategy) if it does not
    /// already exist.
    pub fn get_collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.0.check_disposed()?;
        if let Some(existing) = self.0.collections.read().get(name) {
            return Ok(existing.clone());
        }

        let _guard = self.0.write_lock.lock();
        if let Some(existing) = self.0.collections.read().get(name) {
            return Ok(existing.clone());
        }

        let mut catalog = self.0.catalog.write();
        if catalog.get(name).is_none() {
            let mut store = self.0.store.lock();
            let primary_root = {
                let tree = crate::btree::BTree::create(&mut store, &self.0.cache, crate::btree::DEFAULT_MAX_KEYS, true, format!("{name}.$primary"))?;
                tree.root()
            };
            catalog.collections.push(catalog::CollectionDescriptor::new(name, primary_root));
            self.0.persist_catalog(&mut store, &catalog)?;
            drop(store);
            self.0.commit_dirty_pages()?;
        }
        drop(catalog);

        let handle = Arc::new(Collection::new(name.to_string(), Arc::downgrade(&self.0)));
        self.0.collections.write().insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    /// Creates a new, empty collection. Unlike `get_collection`, this fails
    /// if `name` already exists.
    pub fn create_collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.0.check_disposed()?;
        if self.0.catalog.read().get(name).is_some() {
            return Err(DbError::CollectionAlreadyExists(name.to_string()));
        }
        self.get_collection(name)
    }

    /// Deletes a collection and frees every page it owns: its heap chain,
    /// its primary index, and every secondary index.
    pub fn delete_collection(&self, name: &str) -> Result<bool> {
        self.0.check_disposed()?;
        let _guard = self.0.write_lock.lock();
        let mut catalog = self.0.catalog.write();
        let Some(pos) = catalog.collections.iter().position(|c| c.name == name) else {
            return Ok(false);
        };
        let descriptor = catalog.collections.remove(pos);

        let mut store = self.0.store.lock();
        crate::collection::heap::free_chain(&mut store, &self.0.cache, descriptor.heap_head)?;
        crate::btree::free_tree(&mut store, &self.0.cache, descriptor.primary_root)?;
        for index in &descriptor.indexes {
            crate::btree::free_tree(&mut store, &self.0.cache, index.root)?;
        }
        self.0.persist_catalog(&mut store, &catalog)?;
        drop(store);
        drop(catalog);
        self.0.commit_dirty_pages()?;

        self.0.collections.write().remove(name);
        Ok(true)
    }

    /// Renames a collection in the catalog.
    pub fn rename_collection(&self, old: &str, new: &str) -> Result<()> {
        self.0.check_disposed()?;
        let _guard = self.0.write_lock.lock();
        let mut catalog = self.0.catalog.write();
        if catalog.get(new).is_some() {
            return Err(DbError::CollectionAlreadyExists(new.to_string()));
        }
        {
            let descriptor = catalog.get_mut(old).ok_or_else(|| DbError::NoSuchCollection(old.to_string()))?;
            descriptor.name = new.to_string();
        }
        let mut store = self.0.store.lock();
        self.0.persist_catalog(&mut store, &catalog)?;
        drop(store);
        drop(catalog);
        self.0.commit_dirty_pages()?;
        self.0.collections.write().remove(old);
        Ok(())
    }

    pub fn list_collection_names(&self) -> Vec<String> {
        self.0.catalog.read().collections.iter().map(|c| c.name.clone()).collect()
    }

    /// Starts a transaction over raw pages. Most callers should prefer
    /// `Collection` methods, which already commit atomically per call;
    /// this is the lower-level handle §6.2 describes for callers that need
    /// to group several page-level writes into one commit.
    pub fn begin_transaction(&self) -> Result<Transaction<'_>> {
        self.0.check_disposed()?;
        let inner = self.0.txn_mgr.begin(&self.0.wal)?;
        Ok(Transaction { shared: &self.0, inner })
    }

    /// Forces a checkpoint: flushes every dirty cache page to the main
    /// file and truncates the WAL.
    pub fn flush(&self) -> Result<()> {
        self.0.check_disposed()?;
        let _guard = self.0.write_lock.lock();
        self.0.checkpoint()
    }

    /// Finalizes any in-flight checkpoint and marks the engine disposed;
    /// further calls on it or on any collection handle return
    /// `AlreadyDisposed`.
    pub fn close(&self) -> Result<()> {
        self.0.check_disposed()?;
        self.flush()?;
        self.0.disposed.store(true, Ordering::Release);
        Ok(())
    }

    pub fn cache_metrics(&self) -> CacheMetricsSnapshot {
        self.0.cache.metrics_snapshot()
    }
}

/// A handle over a raw page-level transaction, borrowed from the `Engine`
/// that created it.
pub struct Transaction<'e> {
    shared: &'e EngineShared,
    inner: Txn<'e>,
}

impl<'e> Transaction<'e> {
    pub fn id(&self) -> u64 {
        self.inner.id()
    }

    pub fn commit(self) -> Result<()> {
        let mut store_guard: MutexGuard<'_, PageStore> = self.shared.store.lock();
        self.inner.commit(&self.shared.wal, &self.shared.cache, &mut store_guard, self.shared.options.fsync_on_commit)
    }

    pub fn rollback(self) {
        self.inner.rollback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Document, Value};

    #[test]
    fn open_create_collection_and_reopen_preserves_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");

        {
            let engine = Engine::open(&path, EngineOptions::default()).unwrap();
            engine.get_collection("users").unwrap();
            engine.flush().unwrap();
        }

        let engine = Engine::open(&path, EngineOptions::default()).unwrap();
        assert_eq!(engine.list_collection_names(), vec!["users".to_string()]);
    }

    #[test]
    fn get_collection_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path().join("t.db"), EngineOptions::default()).unwrap();
        let a = engine.get_collection("users").unwrap();
        let b = engine.get_collection("users").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn delete_collection_removes_it_from_the_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path().join("t.db"), EngineOptions::default()).unwrap();
        let col = engine.get_collection("users").unwrap();
        col.insert(Document::from_fields(vec![("name".into(), Value::String("a".into()))])).unwrap();
        assert!(engine.delete_collection("users").unwrap());
        assert!(engine.list_collection_names().is_empty());
    }

    #[test]
    fn close_then_flush_returns_already_disposed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path().join("t.db"), EngineOptions::default()).unwrap();
        engine.close().unwrap();
        assert!(matches!(engine.flush(), Err(DbError::AlreadyDisposed)));
    }

    #[test]
    fn rejects_a_non_power_of_two_page_size() {
        let dir = tempfile::tempdir().unwrap();
        let opts = EngineOptions {
            page_size: 5000,
            ..EngineOptions::default()
        };
        assert!(Engine::open(dir.path().join("t.db"), opts).is_err());
    }
}
