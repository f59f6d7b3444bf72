//! The write-ahead log and transaction manager (storage-core component C4):
//! append-only log records, a commit protocol with group commit, periodic
//! checkpointing, and crash recovery.

mod checkpoint;
mod record;
mod recovery;
mod txn;

pub use checkpoint::run_checkpoint;
pub use record::{LogRecord, Payload, RecordType};
pub use recovery::{recover, RecoveryReport};
pub use txn::{Txn, TxnManager, DEFAULT_GROUP_COMMIT_WINDOW_MS};

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::errors::Result;

/// The on-disk WAL: a flat, append-only sequence of `LogRecord`s living in a
/// file sibling to the main file, with a `.wal` suffix (§6.1).
pub struct WalFile {
    file: File,
    path: PathBuf,
}

impl WalFile {
    pub fn path_for_main(main_path: impl AsRef<Path>) -> PathBuf {
        let mut p = main_path.as_ref().as_os_str().to_owned();
        p.push(".wal");
        PathBuf::from(p)
    }

    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path.as_ref())?;
        Ok(WalFile {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&record.encode())?;
        Ok(())
    }

    pub fn fsync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.sync_all()?;
        Ok(())
    }

    pub fn read_all_bytes(&mut self) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    pub fn len(&mut self) -> Result<u64> {
        Ok(self.file.seek(SeekFrom::End(0))?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
