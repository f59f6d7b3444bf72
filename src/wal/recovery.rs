use std::collections::{HashMap, HashSet};

use super::record::{DecodeOutcome, LogRecord, Payload};
use super::WalFile;
use crate::errors::{DbError, Result};
use crate::store::{Page, PageStore};

#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryReport {
    pub records_scanned: usize,
    pub transactions_replayed: usize,
    pub transactions_discarded: usize,
}

/// Splits the raw WAL bytes into a prefix of well-formed records and a
/// verdict on what follows: `Clean` if the log simply ends there (a torn
/// write from the last crash, or a clean end of file), `Corrupt` if valid,
/// parseable records exist *after* a broken one — which can only mean real
/// corruption, not a torn tail, since a torn write always leaves garbage at
/// the physical end of the file and nothing valid after it.
fn scan_records(buf: &[u8]) -> Result<Vec<LogRecord>> {
    let mut records = Vec::new();
    let mut offset = 0usize;
    loop {
        if offset >= buf.len() {
            return Ok(records);
        }
        match LogRecord::decode(&buf[offset..]) {
            Ok((record, consumed)) => {
                records.push(record);
                offset += consumed;
            }
            Err(DecodeOutcome::Truncated) => return Ok(records),
            Err(DecodeOutcome::Corrupt(reason)) => {
                if tail_is_all_garbage_or_truncated(buf, offset) {
                    return Ok(records);
                }
                return Err(DbError::DatabaseCorrupt(format!(
                    "WAL corrupt at byte offset {offset}: {reason}, but well-formed records follow"
                )));
            }
        }
    }
}

/// After a decode failure at `offset`, checks whether anything beyond it
/// ever parses cleanly. If nothing does, the failure is the tail of the log
/// (a torn write) rather than interior corruption.
fn tail_is_all_garbage_or_truncated(buf: &[u8], mut offset: usize) -> bool {
    // Skip at least one byte so a pathological zero-length loop can't spin;
    // then keep trying to resync on subsequent bytes looking for any valid
    // record. This is deliberately conservative: any single valid record
    // found downstream is treated as proof of real corruption.
    offset += 1;
    while offset < buf.len() {
        match LogRecord::decode(&buf[offset..]) {
            Ok(_) => return false,
            Err(DecodeOutcome::Truncated) => return true,
            Err(DecodeOutcome::Corrupt(_)) => offset += 1,
        }
    }
    true
}

/// Replays the WAL against `store`. Scans from the last `CHECKPOINT_END`
/// (or the start of the log if there is none), replays every `PageImage`
/// belonging to a transaction that has a matching `Commit` record, and
/// discards everything else. Idempotent: once the log is truncated at the
/// end of a successful recovery, a second call finds nothing to replay.
pub fn recover(store: &mut PageStore, wal: &mut WalFile) -> Result<RecoveryReport> {
    let bytes = wal.read_all_bytes()?;
    let all_records = scan_records(&bytes)?;

    let last_checkpoint_end = all_records
        .iter()
        .rposition(|r| matches!(r.payload, Payload::CheckpointEnd));
    let window = match last_checkpoint_end {
        Some(idx) => &all_records[idx + 1..],
        None => &all_records[..],
    };

    let committed_txns: HashSet<u64> = window
        .iter()
        .filter(|r| matches!(r.payload, Payload::Commit))
        .map(|r| r.txn_id)
        .collect();

    let mut images_by_txn: HashMap<u64, Vec<(u32, Vec<u8>)>> = HashMap::new();
    for rec in window {
        if let Payload::PageImage { page_id, data } = &rec.payload {
            images_by_txn.entry(rec.txn_id).or_default().push((*page_id, data.clone()));
        }
    }

    let max_allocated = store.max_allocated_page_id();
    let mut replayed = 0usize;
    let mut discarded = 0usize;
    for (txn_id, images) in &images_by_txn {
        if !committed_txns.contains(txn_id) {
            discarded += 1;
            continue;
        }
        for (page_id, data) in images {
            if *page_id > max_allocated {
                return Err(DbError::DatabaseCorrupt(format!(
                    "committed WAL record references page {page_id} beyond the main file's high-water mark {max_allocated}"
                )));
            }
            let page = Page { data: data.clone() };
            store.write_page(&page)?;
        }
        replayed += 1;
    }

    store.sync()?;
    wal.truncate()?;

    Ok(RecoveryReport {
        records_scanned: all_records.len(),
        transactions_replayed: replayed,
        transactions_discarded: discarded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PageCache;
    use crate::store::{PageType, DEFAULT_PAGE_SIZE};
    use crate::wal::TxnManager;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[test]
    fn committed_transaction_survives_recovery() {
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

        // Simulate a crash: reopen the main file and WAL without a clean
        // checkpoint, then recover.
        drop(store);
        let mut store = PageStore::open(&main_path).unwrap();
        let mut wal = WalFile::open_or_create(&wal_path).unwrap();
        let report = recover(&mut store, &mut wal).unwrap();
        assert_eq!(report.transactions_replayed, 1);

        let page = store.read_page(page_id).unwrap();
        assert_eq!(&page.payload()[0..5], b"alive");
    }

    #[test]
    fn uncommitted_transaction_is_discarded_on_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let main_path = dir.path().join("t.db");
        let wal_path = WalFile::path_for_main(&main_path);

        let mut store = PageStore::create(&main_path, DEFAULT_PAGE_SIZE).unwrap();
        let wal_handle = Mutex::new(WalFile::open_or_create(&wal_path).unwrap());
        let mgr = TxnManager::new(Duration::from_millis(0));

        let page = store.allocate_page(PageType::Heap).unwrap();
        let txn = mgr.begin(&wal_handle).unwrap();
        // Transaction begins (BEGIN is durable) but the caller crashes
        // before commit — rollback models that by never appending PageImage
        // or Commit records at all, same observable effect on recovery.
        drop(page);
        txn.rollback();

        drop(store);
        let mut store = PageStore::open(&main_path).unwrap();
        let mut wal = WalFile::open_or_create(&wal_path).unwrap();
        let report = recover(&mut store, &mut wal).unwrap();
        assert_eq!(report.transactions_replayed, 0);
    }
}
