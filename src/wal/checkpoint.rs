use super::record::{LogRecord, Payload};
use super::WalFile;
use crate::cache::PageCache;
use crate::errors::Result;
use crate::store::PageStore;

/// Runs one checkpoint (§4.4.4): write `CHECKPOINT_START` recording the
/// oldest still-active transaction, flush every dirty page and fsync the
/// main file, write `CHECKPOINT_END`, fsync the log, then truncate it.
/// Checkpoint records use `txn_id = 0`, a sentinel no real transaction ever
/// receives (transaction ids start at 1).
pub fn run_checkpoint(
    store: &mut PageStore,
    cache: &PageCache,
    wal: &mut WalFile,
    mut alloc_lsn: impl FnMut() -> u64,
    oldest_active_txn_id: u64,
) -> Result<()> {
    wal.append(&LogRecord {
        lsn: alloc_lsn(),
        txn_id: 0,
        payload: Payload::CheckpointStart {
            oldest_active_txn_id,
        },
    })?;
    wal.fsync()?;

    cache.flush_all(store)?;
    store.sync()?;

    wal.append(&LogRecord {
        lsn: alloc_lsn(),
        txn_id: 0,
        payload: Payload::CheckpointEnd,
    })?;
    wal.fsync()?;
    wal.truncate()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{PageType, DEFAULT_PAGE_SIZE};
    use crate::wal::TxnManager;
    use super::super::recovery::recover;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[test]
    fn checkpoint_flushes_dirty_pages_and_truncates_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let main_path = dir.path().join("t.db");
        let wal_path = WalFile::path_for_main(&main_path);

        let mut store = PageStore::create(&main_path, DEFAULT_PAGE_SIZE).unwrap();
        let cache = PageCache::new(16);
        let wal = Mutex::new(WalFile::open_or_create(&wal_path).unwrap());
        let mgr = TxnManager::new(Duration::from_millis(0));

        let page_id = {
            let mut page = store.allocate_page(PageType::Heap).unwrap();
            page.payload_mut()[0..5].copy_from_slice(b"alive");
            page.finalize_crc();
            let id = page.header().unwrap().page_id;
            let mut txn = mgr.begin(&wal).unwrap();
            txn.write_page(page).unwrap();
            txn.commit(&wal, &cache, &mut store, true).unwrap();
            id
        };

        {
            let mut wal_guard = wal.lock();
            run_checkpoint(&mut store, &cache, &mut wal_guard, || mgr.alloc_lsn(), mgr.oldest_active_txn_id()).unwrap();
        }

        assert_eq!(wal.lock().read_all_bytes().unwrap().len(), 0);
        let page = store.read_page(page_id).unwrap();
        assert_eq!(&page.payload()[0..5], b"alive");
    }

    #[test]
    fn recovery_after_a_checkpoint_only_replays_transactions_since_it() {
        let dir = tempfile::tempdir().unwrap();
        let main_path = dir.path().join("t.db");
        let wal_path = WalFile::path_for_main(&main_path);

        let mut store = PageStore::create(&main_path, DEFAULT_PAGE_SIZE).unwrap();
        let cache = PageCache::new(16);
        let wal = Mutex::new(WalFile::open_or_create(&wal_path).unwrap());
        let mgr = TxnManager::new(Duration::from_millis(0));

        {
            let page = store.allocate_page(PageType::Heap).unwrap();
            let mut txn = mgr.begin(&wal).unwrap();
            txn.write_page(page).unwrap();
            txn.commit(&wal, &cache, &mut store, true).unwrap();
        }
        {
            let mut wal_guard = wal.lock();
            run_checkpoint(&mut store, &cache, &mut wal_guard, || mgr.alloc_lsn(), mgr.oldest_active_txn_id()).unwrap();
        }

        let second_id = {
            let mut page = store.allocate_page(PageType::Heap).unwrap();
            page.payload_mut()[0..4].copy_from_slice(b"next");
            page.finalize_crc();
            let id = page.header().unwrap().page_id;
            let mut txn = mgr.begin(&wal).unwrap();
            txn.write_page(page).unwrap();
            txn.commit(&wal, &cache, &mut store, true).unwrap();
            id
        };

        // Simulate a crash right after the second commit: reopen fresh and
        // recover. Only the post-checkpoint transaction should be in the
        // replay window; the pre-checkpoint one is already durable in the
        // main file and its log records are gone.
        drop(store);
        let mut store = PageStore::open(&main_path).unwrap();
        let mut wal = WalFile::open_or_create(&wal_path).unwrap();
        let report = recover(&mut store, &mut wal).unwrap();
        assert_eq!(report.transactions_replayed, 1);

        let page = store.read_page(second_id).unwrap();
        assert_eq!(&page.payload()[0..4], b"next");
    }
}
