//! WAL Writer
//!
//! Handles appending records to the WAL file.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::WalSyncStrategy;
use crate::error::{Result, TideError};

use super::entry::{now_millis, WalEntry, WritePair};
use super::WalRecovery;

/// Writes records to the WAL file
pub struct WalWriter {
    file: File,
    path: PathBuf,
    next_lsn: u64,
    sync_strategy: WalSyncStrategy,
    /// Records appended since the last fsync
    unsynced: usize,
    /// Current file length in bytes
    size: u64,
}

impl WalWriter {
    /// Open or create a WAL file, continuing after its last valid LSN
    ///
    /// The file is scanned (not modified) to find that LSN. Callers that have
    /// just run [`WalRecovery::recover`] should use [`WalWriter::open_at`].
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let next_lsn = if path.exists() {
            WalRecovery::verify(path)?.last_lsn + 1
        } else {
            1
        };
        Self::open_at(path, sync_strategy, next_lsn)
    }

    /// Open or create a WAL file, numbering new records from `next_lsn`
    pub fn open_at(path: &Path, sync_strategy: WalSyncStrategy, next_lsn: u64) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let size = file.seek(SeekFrom::End(0))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            next_lsn: next_lsn.max(1),
            sync_strategy,
            unsynced: 0,
            size,
        })
    }

    /// Append a write batch as one record, returning its LSN
    ///
    /// If the write or its fsync fails, the file is cut back to its previous
    /// length and the LSN is not consumed, so a failed batch is never replayed.
    pub fn append(&mut self, writes: &[WritePair]) -> Result<u64> {
        let lsn = self.next_lsn;
        let record = WalEntry::encode(lsn, now_millis(), writes)?;
        let start = self.size;

        if let Err(e) = self.file.write_all(&record) {
            self.discard_from(start);
            return Err(TideError::WalWrite(format!("append at lsn {}: {}", lsn, e)));
        }

        let should_sync = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.unsynced + 1 >= count.max(1),
        };
        if should_sync {
            if let Err(e) = self.file.sync_data() {
                self.discard_from(start);
                return Err(TideError::WalWrite(format!("sync at lsn {}: {}", lsn, e)));
            }
            self.unsynced = 0;
        } else {
            self.unsynced += 1;
        }

        self.size = start + record.len() as u64;
        self.next_lsn += 1;
        Ok(lsn)
    }

    /// Cut the file back to `len` after a failed append
    fn discard_from(&mut self, len: u64) {
        let rolled_back = self
            .file
            .set_len(len)
            .and_then(|()| self.file.seek(SeekFrom::Start(len)).map(|_| ()));
        if let Err(e) = rolled_back {
            tracing::error!(
                path = %self.path.display(),
                len,
                error = %e,
                "cannot roll back failed WAL append"
            );
        }
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Drop every record (called once they are durable in a snapshot)
    ///
    /// LSNs keep increasing across truncations.
    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.sync_all()?;
        self.size = 0;
        self.unsynced = 0;
        Ok(())
    }

    /// LSN of the last appended record (0 if none yet)
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn - 1
    }

    /// Current WAL file size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }
}

