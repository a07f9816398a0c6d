//! # Storage Engine
//!
//! A **synchronous**, single-file, log-structured key-value engine in the
//! Bitcask family.
//!
//! ## Design Overview
//!
//! Every mutation is appended to one data file, `minibitcask.data`, as an
//! immutable [`Record`]. An in-memory [`Index`](index::Index) maps each live
//! key to the offset of its latest PUT record, so a point lookup is one hash
//! probe plus one positioned read.
//!
//! - **Put** appends a PUT record and points the key at it.
//! - **Delete** appends a tombstone and drops the key from the index.
//! - **Get** reads the record at the indexed offset.
//! - **Merge** rewrites the file down to the live records (see [`merge`]).
//!
//! The index is never persisted. [`Engine::open`] rebuilds it by replaying
//! the whole log (see [`recovery`]).
//!
//! ## Concurrency Model
//!
//! The index and the log handle live together in an
//! `Arc<RwLock<EngineInner>>`. Reads take a **read lock**; puts, deletes
//! and the merge swap take a **write lock**. Only the write-lock holder
//! advances the log's end offset. Merges are additionally serialized by a
//! dedicated mutex so at most one merge runs at a time.
//!
//! ## Guarantees
//!
//! - **Recovery:** after reopen, every key maps to the value of its last
//!   PUT, unless a later DEL removed it.
//! - **Merge:** a merge never changes the result of any `get`, and a
//!   failure before the final rename leaves the original log in place.
//! - **Durability:** with [`EngineConfig::sync_writes`], each append is
//!   `fdatasync`ed before it is acknowledged. Otherwise durability is
//!   best-effort until [`Engine::close`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::log_file::{LogFile, LogFileError, LogFileOptions};
use crate::record::{Record, RecordError};

mod index;
mod merge;
mod recovery;

use index::Index;

#[cfg(test)]
pub(crate) use merge::MergeStep;

#[cfg(test)]
mod tests;

/// Name of the data file inside the engine directory.
pub const DATA_FILE_NAME: &str = "minibitcask.data";

/// Name of the transient file a merge writes before swapping it in.
pub const MERGE_FILE_NAME: &str = "minibitcask.data.merge";

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error originating from the data file.
    #[error("Log file error: {0}")]
    LogFile(#[from] LogFileError),

    /// A key or value could not be encoded.
    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine was closed.
    #[error("Engine is closed")]
    Closed,

    /// Internal invariant violation (poisoned lock, dangling index entry, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration for an [`Engine`] instance. Passed to [`Engine::open`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `fdatasync` the data file after every append.
    pub sync_writes: bool,

    /// Number of header read buffers kept in the pool.
    pub header_pool_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_writes: false,
            header_pool_size: 16,
        }
    }
}

impl EngineConfig {
    fn log_options(&self) -> LogFileOptions {
        LogFileOptions {
            sync_writes: self.sync_writes,
            header_pool_size: self.header_pool_size,
        }
    }
}

/// Snapshot of engine statistics returned by [`Engine::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Number of keys currently present in the index.
    pub live_keys: usize,
    /// Logical size of the data file in bytes.
    pub log_size_bytes: u64,
}

struct EngineInner {
    /// Key → offset of the latest PUT record.
    index: Index,

    /// Open data file. `None` once the engine has been closed.
    log: Option<LogFile>,

    /// Directory holding the data file.
    data_dir: PathBuf,

    config: EngineConfig,

    /// Merge step at which the next merge fails.
    #[cfg(test)]
    merge_failpoint: Option<merge::MergeStep>,
}

impl EngineInner {
    fn log(&self) -> Result<&LogFile, EngineError> {
        self.log.as_ref().ok_or(EngineError::Closed)
    }

    fn log_mut(&mut self) -> Result<&mut LogFile, EngineError> {
        self.log.as_mut().ok_or(EngineError::Closed)
    }
}

/// The main storage engine handle.
///
/// Thread-safe. Can be cloned and shared across threads via the
/// internal `Arc<RwLock<_>>`.
pub struct Engine {
    inner: Arc<RwLock<EngineInner>>,
    merge_lock: Arc<Mutex<()>>,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            merge_lock: Arc::clone(&self.merge_lock),
        }
    }
}

impl Engine {
    // --------------------------------------------------------------------------------------------
    // Lock helpers
    // --------------------------------------------------------------------------------------------

    /// Acquires a read lock on the engine state.
    fn read_lock(&self) -> Result<RwLockReadGuard<'_, EngineInner>, EngineError> {
        self.inner
            .read()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))
    }

    /// Acquires a write lock on the engine state.
    fn write_lock(&self) -> Result<RwLockWriteGuard<'_, EngineInner>, EngineError> {
        self.inner
            .write()
            .map_err(|_| EngineError::Internal("RwLock poisoned".into()))
    }

    // --------------------------------------------------------------------------------------------
    // Lifecycle
    // --------------------------------------------------------------------------------------------

    /// Opens (or creates) an engine rooted at the given directory.
    ///
    /// Creates the directory if needed, deletes a merge file left behind by
    /// an interrupted merge, and rebuilds the index from the data file.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        let base = path.as_ref();
        fs::create_dir_all(base)?;

        // 1. A merge file is only authoritative after its rename, so any
        //    leftover belongs to a merge that never finished.
        let merge_path = base.join(MERGE_FILE_NAME);
        if merge_path.exists() {
            warn!(path = %merge_path.display(), "removing stale merge file");
            fs::remove_file(&merge_path)?;
        }

        // 2. Open the data file and replay it.
        let mut log = LogFile::open(base.join(DATA_FILE_NAME), config.log_options())?;
        let mut index = Index::new();
        let report = recovery::replay(&mut log, &mut index)?;

        info!(
            path = %base.display(),
            records = report.records,
            live_keys = index.len(),
            log_size = report.end,
            truncated = report.truncated,
            "engine opened"
        );

        let inner = EngineInner {
            index,
            log: Some(log),
            data_dir: base.to_path_buf(),
            config,
            #[cfg(test)]
            merge_failpoint: None,
        };

        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
            merge_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Syncs and releases the data file.
    ///
    /// Every later call on this engine (or any clone) returns
    /// [`EngineError::Closed`], including a second `close`.
    pub fn close(&self) -> Result<(), EngineError> {
        let mut inner = self.write_lock()?;
        let log = inner.log.take().ok_or(EngineError::Closed)?;
        log.sync()?;

        info!(
            path = %inner.data_dir.display(),
            live_keys = inner.index.len(),
            log_size = log.len(),
            "engine closed"
        );
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Point operations
    // --------------------------------------------------------------------------------------------

    /// Stores `value` under `key`. An empty key is accepted and ignored.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), EngineError> {
        let mut inner = self.write_lock()?;
        inner.log()?;

        if key.is_empty() {
            trace!("put with empty key ignored");
            return Ok(());
        }

        let record = Record::put(key, value)?;
        let offset = inner.log_mut()?.append(&record)?;
        trace!(
            offset,
            key_len = record.key().len(),
            value_len = record.value().len(),
            "engine put"
        );

        let (key, _) = record.into_parts();
        inner.index.insert(key, offset);
        Ok(())
    }

    /// Returns the latest value for `key`, or `None` if it is absent.
    ///
    /// An empty key always yields an empty value.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        let inner = self.read_lock()?;
        let log = inner.log()?;

        if key.is_empty() {
            return Ok(Some(Vec::new()));
        }

        let Some(offset) = inner.index.get(key) else {
            trace!(key_len = key.len(), "engine get miss");
            return Ok(None);
        };

        let record = log.read_at(offset)?.ok_or_else(|| {
            EngineError::Internal(format!(
                "indexed offset {offset} is past end of log ({})",
                log.len()
            ))
        })?;

        Ok(Some(record.into_value()))
    }

    /// Removes `key`.
    ///
    /// Deleting an empty or absent key succeeds without writing anything.
    pub fn delete(&self, key: &[u8]) -> Result<(), EngineError> {
        let mut inner = self.write_lock()?;
        inner.log()?;

        if key.is_empty() || !inner.index.contains(key) {
            trace!(key_len = key.len(), "delete of absent key ignored");
            return Ok(());
        }

        let record = Record::delete(key.to_vec())?;
        let offset = inner.log_mut()?.append(&record)?;
        trace!(offset, key_len = key.len(), "engine delete");

        inner.index.remove(key);
        Ok(())
    }

    /// Returns a snapshot of engine statistics.
    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let inner = self.read_lock()?;
        let log = inner.log()?;
        let stats = EngineStats {
            live_keys: inner.index.len(),
            log_size_bytes: log.len(),
        };
        debug!(?stats, "engine stats");
        Ok(stats)
    }

    // --------------------------------------------------------------------------------------------
    // Test hooks
    // --------------------------------------------------------------------------------------------

    /// Makes the next merge fail at `step`. `None` disarms the failpoint.
    #[cfg(test)]
    pub(crate) fn inject_merge_failure(&self, step: Option<merge::MergeStep>) {
        if let Ok(mut inner) = self.inner.write() {
            inner.merge_failpoint = step;
        }
    }

    /// Makes the next append write `written` bytes of its record and fail.
    #[cfg(test)]
    pub(crate) fn inject_torn_append(&self, written: usize) {
        if let Ok(mut inner) = self.inner.write() {
            if let Some(log) = inner.log.as_mut() {
                log.inject_torn_append(written);
            }
        }
    }

    /// Snapshot of the index as `(key, offset)` pairs.
    #[cfg(test)]
    pub(crate) fn index_snapshot(&self) -> Vec<(Vec<u8>, u64)> {
        let inner = self.read_lock().unwrap();
        let mut entries: Vec<_> = inner
            .index
            .iter()
            .map(|(k, off)| (k.to_vec(), off))
            .collect();
        entries.sort();
        entries
    }
}
