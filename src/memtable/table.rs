//! MemTable implementation
//!
//! BTreeMap-based memtable with RwLock for concurrency.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::{RwLock, RwLockReadGuard};

use crate::wal::WritePair;

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-memory table holding every live key
pub struct MemTable {
    data: RwLock<Map>,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
        }
    }

    /// Get a value by key (read lock)
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.read().get(key).cloned()
    }

    /// Apply a whole batch under one write lock
    ///
    /// Readers holding a [`MemTableView`] see either none or all of the batch.
    pub fn apply(&self, writes: Vec<WritePair>) {
        let mut data = self.data.write();
        for (key, value) in writes {
            data.insert(key, value);
        }
    }

    /// Take a consistent read view (holds the read lock until dropped)
    pub fn view(&self) -> MemTableView<'_> {
        MemTableView {
            guard: self.data.read(),
        }
    }

    /// Get entry count
    pub fn entry_count(&self) -> usize {
        self.data.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Replace the whole contents (used when loading a snapshot)
    pub fn load(&self, entries: Vec<WritePair>) {
        let mut data = self.data.write();
        data.clear();
        data.extend(entries);
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A consistent, read-locked view of the table
///
/// Writers block while a view is alive, so keep views short-lived.
pub struct MemTableView<'a> {
    guard: RwLockReadGuard<'a, Map>,
}

impl<'a> MemTableView<'a> {
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.guard.get(key).map(Vec::as_slice)
    }

    /// Entries whose key starts with `prefix`, in ascending key order
    pub fn scan_prefix<'v>(&'v self, prefix: &'v [u8]) -> PrefixIter<'v> {
        PrefixIter {
            inner: self
                .guard
                .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded)),
            prefix,
        }
    }

    /// Every entry in ascending key order
    pub fn iter(&self) -> btree_map::Iter<'_, Vec<u8>, Vec<u8>> {
        self.guard.iter()
    }

    pub fn len(&self) -> usize {
        self.guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard.is_empty()
    }
}

/// Iterator over the entries sharing a prefix
pub struct PrefixIter<'a> {
    inner: btree_map::Range<'a, Vec<u8>, Vec<u8>>,
    prefix: &'a [u8],
}

impl<'a> Iterator for PrefixIter<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let (key, value) = self.inner.next()?;
        if key.starts_with(self.prefix) {
            Some((key.as_slice(), value.as_slice()))
        } else {
            None
        }
    }
}
