//! In-memory key directory.
//!
//! Maps every live key to the byte offset of its most recent PUT record in
//! the data file. Tombstoned keys are absent. The index is never persisted;
//! it is rebuilt from the log on every open.

use std::collections::HashMap;

use crate::record::Record;

/// Key → record offset map.
#[derive(Debug, Default)]
pub(crate) struct Index {
    entries: HashMap<Vec<u8>, u64>,
}

impl Index {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Offset of the latest PUT for `key`, if the key is live.
    pub(crate) fn get(&self, key: &[u8]) -> Option<u64> {
        self.entries.get(key).copied()
    }

    pub(crate) fn contains(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    /// Points `key` at `offset`, returning the previous offset.
    pub(crate) fn insert(&mut self, key: Vec<u8>, offset: u64) -> Option<u64> {
        self.entries.insert(key, offset)
    }

    pub(crate) fn remove(&mut self, key: &[u8]) -> Option<u64> {
        self.entries.remove(key)
    }

    /// Applies one replayed record found at `offset`.
    ///
    /// A PUT points its key at `offset`; a DEL removes the key. Replaying
    /// the same log twice yields the same index.
    pub(crate) fn apply(&mut self, offset: u64, record: Record) {
        if record.is_tombstone() {
            self.entries.remove(record.key());
        } else {
            let (key, _) = record.into_parts();
            self.entries.insert(key, offset);
        }
    }

    /// Whether `offset` is the current location of `key`.
    pub(crate) fn is_current(&self, key: &[u8], offset: u64) -> bool {
        self.get(key) == Some(offset)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&[u8], u64)> {
        self.entries.iter().map(|(k, v)| (k.as_slice(), *v))
    }
}
