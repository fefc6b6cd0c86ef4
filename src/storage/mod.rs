//! Storage Module
//!
//! The storage adapter boundary and the on-disk checkpoint format.
//!
//! ## Responsibilities
//! - [`Store`]: what the hub needs from a transactional engine (snapshot
//!   reads, atomic multi-key writes, ordered prefix iteration)
//! - [`snapshot`]: persist the whole key space as one checksummed file
//!
//! ## Snapshot File Format (V1)
//! ```text
//! ┌────────────────────────────────────────┐
//! │ Header                                 │
//! │ ┌──────────┬──────────┬──────┬───────┐ │
//! │ │Magic (4) │Version(2)│Count │LastLSN│ │
//! │ └──────────┴──────────┴──────┴───────┘ │
//! ├────────────────────────────────────────┤
//! │ Data Block                             │
//! │ ┌────────┬────────┬─────┬───────────┐ │
//! │ │KeyLen  │ValLen  │ Key │   Value   │ │
//! │ └────────┴────────┴─────┴───────────┘ │
//! │ ... (repeated for each entry)         │
//! ├────────────────────────────────────────┤
//! │ Footer: CRC32 of the data block (4)    │
//! └────────────────────────────────────────┘
//! ```

pub mod snapshot;

pub use snapshot::{Snapshot, SnapshotWriter};

use crate::error::Result;
use crate::wal::WritePair;

/// Storage adapter used by the hub
///
/// Keys and values are raw bytes; the adapter never interprets them.
/// "Not found" is `Ok(None)`, never an error.
pub trait Store: Send + Sync {
    /// Point lookup
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Several lookups against one consistent snapshot, in input order
    fn get_many(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>>;

    /// Every entry whose key starts with `prefix`, ascending by key
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<WritePair>>;

    /// Every key starting with `prefix`, ascending
    fn list_keys(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>>;

    /// Single write
    fn set(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.set_many(vec![(key, value)])
    }

    /// Atomic multi-key write: all pairs become visible together, or none do
    fn set_many(&self, writes: Vec<WritePair>) -> Result<()>;
}
