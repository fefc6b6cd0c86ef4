//! MemTable Module
//!
//! The live, ordered key space.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Snapshot reads: a reader sees a batch entirely or not at all
//! - Ordered prefix iteration for scans and checkpoints
//!
//! ## Data Structure Choice
//! BTreeMap wrapped in RwLock:
//! - Ordered keys (prefix scans are a range walk)
//! - Many concurrent readers, one writer applying a whole batch at a time

mod table;

pub use table::{MemTable, MemTableView, PrefixIter};
