//! Engine Module
//!
//! The durable storage engine behind the [`Store`] boundary.
//!
//! ## Responsibilities
//! - Coordinate WAL, MemTable and snapshot files
//! - Handle concurrent read/write access
//! - Checkpoint when the WAL grows too large
//! - Manage crash recovery on startup

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::Result;
use crate::memtable::MemTable;
use crate::storage::{Snapshot, SnapshotWriter, Store};
use crate::wal::{WalRecovery, WalWriter, WritePair};

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (`set_many`/`checkpoint`): serialized by `write_lock`
///   - Must acquire: write_lock → WAL → memtable
///   - A batch is one WAL record and one memtable write-lock section
///
/// - **Reads**: take a memtable read view for their whole duration, so a
///   multi-key read or a scan observes one consistent state
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Write-ahead log for durability (exclusive access needed)
    wal: Mutex<WalWriter>,

    /// Every live key (internal RwLock)
    memtable: MemTable,

    /// Serializes write operations (batches and checkpoints)
    write_lock: Mutex<()>,

    snapshot_path: PathBuf,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const WAL_FILENAME: &'static str = "wal.log";
    const SNAPSHOT_FILENAME: &'static str = "snapshot.db";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Open/create data directory
    /// 2. Load the last snapshot if one exists
    /// 3. Replay WAL records newer than the snapshot
    /// 4. Ready to serve requests
    pub fn open(config: Config) -> Result<Self> {
        // Step 1: Create data directory if it doesn't exist
        fs::create_dir_all(&config.data_dir)?;

        let wal_path = config.data_dir.join(Self::WAL_FILENAME);
        let snapshot_path = config.data_dir.join(Self::SNAPSHOT_FILENAME);

        // Step 2: Load snapshot
        let memtable = MemTable::new();
        let mut last_lsn = 0;
        if snapshot_path.exists() {
            let snapshot = Snapshot::load(&snapshot_path)?;
            tracing::info!(
                entries = snapshot.entries.len(),
                last_lsn = snapshot.last_lsn,
                "loaded snapshot"
            );
            last_lsn = snapshot.last_lsn;
            memtable.load(snapshot.entries);
        }

        // Step 3: Replay WAL. Records at or below the snapshot LSN were
        // already folded in (crash between snapshot rename and WAL truncate).
        if wal_path.exists() {
            let (entries, recovery) = WalRecovery::recover(&wal_path)?;
            let mut replayed = 0u64;
            for entry in entries {
                if entry.lsn <= last_lsn {
                    continue;
                }
                last_lsn = entry.lsn;
                memtable.apply(entry.writes);
                replayed += 1;
            }
            if recovery.entries_recovered > 0 || recovery.was_truncated {
                tracing::info!(
                    recovered = recovery.entries_recovered,
                    replayed,
                    corrupted = recovery.entries_corrupted,
                    truncated = recovery.was_truncated,
                    last_lsn,
                    "WAL recovery complete"
                );
            }
        }

        let wal = WalWriter::open_at(&wal_path, config.wal_sync_strategy, last_lsn + 1)?;

        Ok(Self {
            config,
            wal: Mutex::new(wal),
            memtable,
            write_lock: Mutex::new(()),
            snapshot_path,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config)
    }

    /// Apply a batch: WAL first, then the memtable, then maybe checkpoint
    fn write_batch(&self, writes: Vec<WritePair>) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let _write_guard = self.write_lock.lock();

        let wal_size = {
            let mut wal = self.wal.lock();
            wal.append(&writes)?;
            wal.size()
        };

        self.memtable.apply(writes);

        if wal_size >= self.config.checkpoint_threshold {
            // The batch is already durable in the WAL; a failed checkpoint
            // only postpones truncation.
            if let Err(e) = self.checkpoint_internal() {
                tracing::warn!(error = %e, "checkpoint failed");
            }
        }

        Ok(())
    }

    /// Write a snapshot of the whole key space and truncate the WAL
    pub fn checkpoint(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        self.checkpoint_internal()
    }

    /// Internal checkpoint (called with write lock held)
    fn checkpoint_internal(&self) -> Result<()> {
        let mut wal = self.wal.lock();
        let last_lsn = wal.current_lsn();

        let written = {
            let view = self.memtable.view();
            let mut writer = SnapshotWriter::create(&self.snapshot_path, last_lsn)?;
            for (key, value) in view.iter() {
                writer.add(key, value)?;
            }
            writer.finish()?
        };

        wal.truncate()?;
        tracing::info!(entries = written, last_lsn, "checkpoint complete");
        Ok(())
    }

    /// Close the engine gracefully
    ///
    /// Checkpoints so the next open does not need to replay the WAL
    pub fn close(self) -> Result<()> {
        self.checkpoint()?;
        self.wal.lock().sync()?;
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Number of live keys
    pub fn key_count(&self) -> usize {
        self.memtable.entry_count()
    }

    /// Current WAL size in bytes
    pub fn wal_size(&self) -> u64 {
        self.wal.lock().size()
    }

    /// LSN of the last committed batch
    pub fn current_lsn(&self) -> u64 {
        self.wal.lock().current_lsn()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Store for Engine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.memtable.get(key))
    }

    fn get_many(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        let view = self.memtable.view();
        Ok(keys
            .iter()
            .map(|key| view.get(key).map(<[u8]>::to_vec))
            .collect())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<WritePair>> {
        let view = self.memtable.view();
        Ok(view
            .scan_prefix(prefix)
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect())
    }

    fn list_keys(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let view = self.memtable.view();
        Ok(view.scan_prefix(prefix).map(|(k, _)| k.to_vec()).collect())
    }

    fn set_many(&self, writes: Vec<WritePair>) -> Result<()> {
        self.write_batch(writes)
    }
}
