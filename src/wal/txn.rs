use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::record::{LogRecord, Payload};
use super::WalFile;
use crate::cache::PageCache;
use crate::errors::Result;
use crate::store::{Page, PageStore};

/// Default group-commit batching window (§4.4.3).
pub const DEFAULT_GROUP_COMMIT_WINDOW_MS: u64 = 5;

struct GroupCommitState {
    /// Bumped every time a batched fsync completes.
    generation: u64,
    fsync_in_flight: bool,
}

/// Coordinates a single shared fsync across transactions that commit within
/// the same short window, so N concurrent commits pay for one `fsync(2)`
/// instead of N.
struct GroupCommit {
    state: Mutex<GroupCommitState>,
    cond: Condvar,
    window: Duration,
}

impl GroupCommit {
    fn new(window: Duration) -> Self {
        GroupCommit {
            state: Mutex::new(GroupCommitState {
                generation: 0,
                fsync_in_flight: false,
            }),
            cond: Condvar::new(),
            window,
        }
    }

    /// Blocks until the log has been fsynced at least once after this call
    /// began. The first caller in a window performs the fsync and wakes
    /// everyone else who arrived while it slept out the batching window.
    fn sync(&self, wal: &Mutex<WalFile>) -> Result<()> {
        let mut guard = self.state.lock();
        let my_generation = guard.generation;
        if guard.fsync_in_flight {
            self.cond.wait_while(&mut guard, |s| s.generation <= my_generation);
            return Ok(());
        }
        guard.fsync_in_flight = true;
        drop(guard);

        std::thread::sleep(self.window);
        let result = wal.lock().fsync();

        let mut guard = self.state.lock();
        guard.fsync_in_flight = false;
        guard.generation += 1;
        self.cond.notify_all();
        drop(guard);
        result
    }
}

/// Owns the engine write latch (lock-hierarchy level 1), transaction id and
/// LSN allocation, the set of currently-active transaction ids (needed by
/// checkpoint's `oldest_active_txn_id`), and the group-commit coordinator.
pub struct TxnManager {
    write_latch: Mutex<()>,
    next_txn_id: AtomicU64,
    next_lsn: AtomicU64,
    active_txns: Mutex<BTreeSet<u64>>,
    group_commit: GroupCommit,
}

impl TxnManager {
    pub fn new(group_commit_window: Duration) -> Self {
        TxnManager {
            write_latch: Mutex::new(()),
            next_txn_id: AtomicU64::new(1),
            next_lsn: AtomicU64::new(1),
            active_txns: Mutex::new(BTreeSet::new()),
            group_commit: GroupCommit::new(group_commit_window),
        }
    }

    pub fn alloc_lsn(&self) -> u64 {
        self.next_lsn.fetch_add(1, Ordering::SeqCst)
    }

    /// The lowest id among currently-active transactions, or `u64::MAX` if
    /// none are active. Recorded in `CHECKPOINT_START` so recovery knows how
    /// far back it must be willing to find an uncommitted `BEGIN`.
    pub fn oldest_active_txn_id(&self) -> u64 {
        self.active_txns.lock().iter().next().copied().unwrap_or(u64::MAX)
    }

    /// Acquires the write latch (blocking), opens a new transaction, and
    /// appends its `BEGIN` record.
    pub fn begin<'a>(&'a self, wal: &Mutex<WalFile>) -> Result<Txn<'a>> {
        let guard = self.write_latch.lock();
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        self.active_txns.lock().insert(id);
        let lsn = self.alloc_lsn();
        wal.lock().append(&LogRecord {
            lsn,
            txn_id: id,
            payload: Payload::Begin,
        })?;
        Ok(Txn {
            mgr: self,
            id,
            write_guard: Some(guard),
            dirty: HashMap::new(),
            finished: false,
        })
    }
}

/// A single in-flight transaction. Writes are held in a private, in-memory
/// shadow map until commit — nothing is appended to the WAL or made visible
/// in the shared page cache until the transaction actually commits, so a
/// rollback is simply dropping this struct.
pub struct Txn<'a> {
    mgr: &'a TxnManager,
    id: u64,
    write_guard: Option<MutexGuard<'a, ()>>,
    dirty: HashMap<u32, Page>,
    finished: bool,
}

impl<'a> Txn<'a> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Reads a page, preferring this transaction's own uncommitted write
    /// over the shared cache so a transaction always sees its own writes.
    pub fn read_page(&self, page_id: u32, cache: &PageCache, store: &mut PageStore) -> Result<Page> {
        if let Some(page) = self.dirty.get(&page_id) {
            return Ok(page.clone());
        }
        let page = cache.fetch(page_id, store)?;
        cache.unpin(page_id);
        Ok(page)
    }

    /// Stages a page write in this transaction's private shadow map.
    pub fn write_page(&mut self, page: Page) -> Result<()> {
        let page_id = page.header()?.page_id;
        self.dirty.insert(page_id, page);
        Ok(())
    }

    /// Commit protocol (§4.4.3): append a `PageImage` per dirty page, then
    /// `Commit`, participate in the shared group-commit fsync, then make the
    /// written pages visible in the cache. The main file is not touched here
    /// — that is deferred to the next checkpoint.
    pub fn commit(mut self, wal: &Mutex<WalFile>, cache: &PageCache, store: &mut PageStore, fsync_on_commit: bool) -> Result<()> {
        {
            let mut wal_guard = wal.lock();
            for page in self.dirty.values() {
                wal_guard.append(&LogRecord {
                    lsn: self.mgr.alloc_lsn(),
                    txn_id: self.id,
                    payload: Payload::PageImage {
                        page_id: page.header()?.page_id,
                        data: page.data.clone(),
                    },
                })?;
            }
            wal_guard.append(&LogRecord {
                lsn: self.mgr.alloc_lsn(),
                txn_id: self.id,
                payload: Payload::Commit,
            })?;
        }
        // Release the write latch before fsync so the next transaction can
        // start appending while this one waits on (or performs) the group
        // fsync.
        self.write_guard.take();

        if fsync_on_commit {
            self.mgr.group_commit.sync(wal)?;
        }

        for (page_id, page) in self.dirty.drain() {
            cache.insert_pinned(page_id, page, true, store)?;
            cache.unpin(page_id);
        }

        self.finished = true;
        self.mgr.active_txns.lock().remove(&self.id);
        Ok(())
    }

    /// Discards every staged write. No WAL record is needed: recovery
    /// discards any `BEGIN` without a matching `Commit` automatically.
    pub fn rollback(mut self) {
        self.dirty.clear();
        self.finished = true;
        self.mgr.active_txns.lock().remove(&self.id);
    }
}

impl Drop for Txn<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.mgr.active_txns.lock().remove(&self.id);
        }
    }
}
