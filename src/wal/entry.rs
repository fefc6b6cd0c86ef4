//! WAL Entry definitions
//!
//! Defines the structure of individual WAL records and their encoding.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TideError};

/// Record header: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// Upper bound on a single record body; larger lengths are treated as corruption
pub const MAX_RECORD_SIZE: u32 = 64 * 1024 * 1024;

/// A raw key/value write
pub type WritePair = (Vec<u8>, Vec<u8>);

/// A single entry in the WAL: one atomically applied write batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,

    /// Every key/value pair of the batch
    pub writes: Vec<WritePair>,
}

/// Borrowed form used when appending, so callers keep ownership of the batch.
/// Encodes identically to `WalEntry`.
#[derive(Serialize)]
struct WalEntryRef<'a> {
    lsn: u64,
    timestamp: u64,
    writes: &'a [WritePair],
}

impl WalEntry {
    /// Encode a record without taking ownership of the writes
    pub fn encode(lsn: u64, timestamp: u64, writes: &[WritePair]) -> Result<Vec<u8>> {
        let body = bincode::serialize(&WalEntryRef {
            lsn,
            timestamp,
            writes,
        })?;

        if body.len() > MAX_RECORD_SIZE as usize {
            return Err(TideError::WalWrite(format!(
                "batch too large: {} bytes (max {})",
                body.len(),
                MAX_RECORD_SIZE
            )));
        }

        let crc = crc32fast::hash(&body);

        let mut record = Vec::with_capacity(HEADER_SIZE + body.len());
        record.extend_from_slice(&lsn.to_le_bytes());
        record.extend_from_slice(&crc.to_le_bytes());
        record.extend_from_slice(&(body.len() as u32).to_le_bytes());
        record.extend_from_slice(&body);
        Ok(record)
    }

    /// Split a header into (lsn, crc, body_len)
    pub fn decode_header(header: &[u8; HEADER_SIZE]) -> (u64, u32, u32) {
        let mut lsn = [0u8; 8];
        let mut crc = [0u8; 4];
        let mut len = [0u8; 4];
        lsn.copy_from_slice(&header[0..8]);
        crc.copy_from_slice(&header[8..12]);
        len.copy_from_slice(&header[12..16]);
        (
            u64::from_le_bytes(lsn),
            u32::from_le_bytes(crc),
            u32::from_le_bytes(len),
        )
    }

    /// Validate and decode a record body
    pub fn deserialize(header_lsn: u64, expected_crc: u32, body: &[u8]) -> Result<Self> {
        let actual_crc = crc32fast::hash(body);
        if actual_crc != expected_crc {
            return Err(TideError::WalCorruption(format!(
                "CRC mismatch at lsn {}: expected {:08x}, got {:08x}",
                header_lsn, expected_crc, actual_crc
            )));
        }

        let entry: WalEntry = bincode::deserialize(body)
            .map_err(|e| TideError::WalCorruption(format!("undecodable body: {}", e)))?;

        if entry.lsn != header_lsn {
            return Err(TideError::WalCorruption(format!(
                "header lsn {} does not match body lsn {}",
                header_lsn, entry.lsn
            )));
        }

        Ok(entry)
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
