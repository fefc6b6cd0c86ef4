//! Snapshot files
//!
//! A snapshot is a full copy of the key space taken at a known LSN. It is
//! written next to its final path and renamed into place, so a crash leaves
//! either the old snapshot or the new one, never a half-written file.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, TideError};
use crate::wal::{WritePair, MAX_RECORD_SIZE};

/// Magic bytes identifying a TideKV snapshot file
pub(crate) const MAGIC: &[u8; 4] = b"TKVS";

/// Current snapshot format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + EntryCount (8) + LastLsn (8)
pub(crate) const HEADER_SIZE: usize = 22;

/// A loaded snapshot
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Snapshot {
    /// LSN of the last WAL record folded into this snapshot
    pub last_lsn: u64,
    /// Entries in ascending key order
    pub entries: Vec<WritePair>,
}

impl Snapshot {
    /// Load and validate a snapshot file
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);

        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header).map_err(|e| {
            TideError::SnapshotCorruption(format!("short header in {}: {}", path.display(), e))
        })?;

        if &header[0..4] != MAGIC {
            return Err(TideError::SnapshotCorruption(format!(
                "invalid magic: expected TKVS, got {:?}",
                &header[0..4]
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(TideError::SnapshotCorruption(format!(
                "unsupported snapshot version: {}",
                version
            )));
        }

        let entry_count = read_u64(&header[6..14]);
        let last_lsn = read_u64(&header[14..22]);

        let mut hasher = crc32fast::Hasher::new();
        let mut entries = Vec::new();

        for index in 0..entry_count {
            let mut lens = [0u8; 8];
            reader.read_exact(&mut lens).map_err(|e| truncated(index, e))?;
            hasher.update(&lens);

            let key_len = u32::from_le_bytes([lens[0], lens[1], lens[2], lens[3]]) as usize;
            let val_len = u32::from_le_bytes([lens[4], lens[5], lens[6], lens[7]]) as usize;
            if key_len + val_len > MAX_RECORD_SIZE as usize {
                return Err(TideError::SnapshotCorruption(format!(
                    "implausible entry size {} at entry {}",
                    key_len + val_len,
                    index
                )));
            }

            let mut key = vec![0u8; key_len];
            reader.read_exact(&mut key).map_err(|e| truncated(index, e))?;
            let mut value = vec![0u8; val_len];
            reader.read_exact(&mut value).map_err(|e| truncated(index, e))?;

            hasher.update(&key);
            hasher.update(&value);
            entries.push((key, value));
        }

        let mut footer = [0u8; 4];
        reader
            .read_exact(&mut footer)
            .map_err(|e| truncated(entry_count, e))?;
        let expected = u32::from_le_bytes(footer);
        let actual = hasher.finalize();
        if expected != actual {
            return Err(TideError::SnapshotCorruption(format!(
                "CRC mismatch: expected {:08x}, got {:08x}",
                expected, actual
            )));
        }

        Ok(Self { last_lsn, entries })
    }
}

/// Writes a snapshot to a temporary file, then renames it over the target
pub struct SnapshotWriter {
    target: PathBuf,
    temp: PathBuf,
    writer: BufWriter<File>,
    entry_count: u64,
    last_lsn: u64,
    hasher: crc32fast::Hasher,
}

impl SnapshotWriter {
    /// Start a snapshot that will replace `target` on `finish`
    pub fn create(target: &Path, last_lsn: u64) -> Result<Self> {
        let temp = target.with_extension("tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp)?;
        let mut writer = BufWriter::new(file);

        // Entry count is patched in `finish`
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&0u64.to_le_bytes())?;
        writer.write_all(&last_lsn.to_le_bytes())?;

        Ok(Self {
            target: target.to_path_buf(),
            temp,
            writer,
            entry_count: 0,
            last_lsn,
            hasher: crc32fast::Hasher::new(),
        })
    }

    /// Append one entry (callers supply keys in ascending order)
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let key_len = (key.len() as u32).to_le_bytes();
        let val_len = (value.len() as u32).to_le_bytes();

        for chunk in [&key_len[..], &val_len[..], key, value] {
            self.writer.write_all(chunk)?;
            self.hasher.update(chunk);
        }

        self.entry_count += 1;
        Ok(())
    }

    /// Write the footer, fix up the header, fsync and rename into place
    pub fn finish(mut self) -> Result<u64> {
        use std::io::{Seek, SeekFrom};

        let crc = self.hasher.finalize();
        self.writer.write_all(&crc.to_le_bytes())?;
        self.writer.flush()?;

        let mut file = self
            .writer
            .into_inner()
            .map_err(|e| TideError::Storage(format!("failed to flush snapshot: {}", e)))?;
        file.seek(SeekFrom::Start(6))?; // After magic + version
        file.write_all(&self.entry_count.to_le_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.temp, &self.target)?;
        if let Some(dir) = self.target.parent() {
            // Persist the rename itself; not every platform allows opening a directory
            if let Ok(dir) = File::open(dir) {
                let _ = dir.sync_all();
            }
        }

        tracing::debug!(
            path = %self.target.display(),
            entries = self.entry_count,
            last_lsn = self.last_lsn,
            "snapshot written"
        );
        Ok(self.entry_count)
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

fn truncated(index: u64, e: std::io::Error) -> TideError {
    TideError::SnapshotCorruption(format!("truncated at entry {}: {}", index, e))
}
