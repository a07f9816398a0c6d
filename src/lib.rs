//! # minibitcask
//!
//! An embeddable, persistent key-value store in the **Bitcask** family:
//! one append-only data file, a full in-memory key directory, and an
//! explicit merge that rewrites the file down to its live records.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use minibitcask::{Db, DbConfig, DbError};
//!
//! let db = Db::open("/tmp/minibitcask", DbConfig::default()).unwrap();
//!
//! // Write
//! db.put(b"dbname", b"minibitcask").unwrap();
//!
//! // Read
//! assert_eq!(db.get(b"dbname").unwrap(), b"minibitcask".to_vec());
//!
//! // Delete
//! db.delete(b"dbname").unwrap();
//! assert!(matches!(db.get(b"dbname"), Err(DbError::KeyNotFound)));
//!
//! // Reclaim space held by deleted and overwritten records
//! db.merge().unwrap();
//!
//! // Graceful shutdown
//! db.close().unwrap();
//! ```
//!
//! ## Features
//!
//! - **Single data file**: every put and delete is one appended record.
//! - **O(1) lookups**: one hash probe plus one positioned read.
//! - **Crash recovery**: the index is rebuilt by replaying the log, and a
//!   torn tail from an interrupted append is cut off.
//! - **Atomic merge**: compaction writes a new file and renames it over
//!   the old one, so a failed merge never loses data.
//!
//! Keys and values are arbitrary bytes. There is no checksum, no range
//! scan and no TTL.

pub(crate) mod engine;

// Low-level access to the data file format, for inspection tools.
pub mod log_file;
pub mod record;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use engine::{Engine, EngineConfig, EngineError};
use thiserror::Error;
use tracing::{debug, info};

pub use engine::{DATA_FILE_NAME, EngineStats, MERGE_FILE_NAME};

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`Db`] instance.
///
/// All fields have sensible defaults via [`DbConfig::default()`].
/// The configuration is validated when passed to [`Db::open`].
///
/// # Example
///
/// ```rust
/// use minibitcask::DbConfig;
///
/// // Use defaults (no per-write fsync, 16 pooled header buffers)
/// let config = DbConfig::default();
///
/// // Or customize
/// let config = DbConfig {
///     sync_writes: true,
///     ..DbConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Whether every put and delete is `fdatasync`ed before returning.
    ///
    /// Default: `false`. Without it, acknowledged writes can be lost on a
    /// power failure until the next [`Db::close`].
    pub sync_writes: bool,

    /// Number of header read buffers retained for reuse.
    ///
    /// Reads beyond this many in parallel allocate a temporary buffer.
    ///
    /// Default: 16. Must be ≥ 1.
    pub header_pool_size: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            sync_writes: false,
            header_pool_size: 16,
        }
    }
}

impl DbConfig {
    /// Validates all configuration parameters.
    fn validate(&self) -> Result<(), DbError> {
        if self.header_pool_size < 1 {
            return Err(DbError::InvalidConfig(
                "header_pool_size must be >= 1".into(),
            ));
        }
        Ok(())
    }

    /// Converts to the internal engine configuration.
    fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            sync_writes: self.sync_writes,
            header_pool_size: self.header_pool_size,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`Db`] operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// The database has been closed.
    #[error("database is closed")]
    Closed,

    /// Invalid configuration parameter.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The requested key is not present.
    #[error("key not found")]
    KeyNotFound,

    /// An engine-internal error occurred.
    #[error("{0}")]
    Engine(#[source] EngineError),
}

impl From<EngineError> for DbError {
    fn from(e: EngineError) -> Self {
        match e {
            // A close that raced past `check_open`.
            EngineError::Closed => DbError::Closed,
            other => DbError::Engine(other),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Database handle
// ------------------------------------------------------------------------------------------------

/// The main database handle.
///
/// # Thread safety
///
/// `Db` is `Send + Sync` and can be shared across threads via
/// `Arc<Db>`. Reads run in parallel; writes and the final phase of a
/// merge are exclusive.
///
/// # Shutdown
///
/// Call [`Db::close`] for a graceful shutdown. If the handle is dropped
/// without calling `close`, the destructor will attempt cleanup, but
/// errors are silently ignored.
pub struct Db {
    engine: Engine,
    closed: AtomicBool,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Db {
    /// Opens (or creates) a database in the given directory.
    ///
    /// The directory is created if missing. An existing data file is
    /// replayed to rebuild the index, and a merge file left by an
    /// interrupted merge is deleted.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidConfig`] if any configuration parameter
    /// is out of range, or [`DbError::Engine`] if the directory or data
    /// file cannot be opened or holds a corrupt record.
    pub fn open(path: impl AsRef<Path>, config: DbConfig) -> Result<Self, DbError> {
        config.validate()?;

        let engine = Engine::open(&path, config.to_engine_config())?;

        info!(
            path = %path.as_ref().display(),
            sync_writes = config.sync_writes,
            "database opened"
        );

        Ok(Self {
            engine,
            closed: AtomicBool::new(false),
        })
    }

    /// Gracefully shuts down the database, syncing the data file.
    ///
    /// Subsequent operations on this handle return [`DbError::Closed`],
    /// including a second call to `close`.
    pub fn close(&self) -> Result<(), DbError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(DbError::Closed);
        }
        self.engine.close()?;
        info!("database closed");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Write operations
    // --------------------------------------------------------------------------------------------

    /// Inserts or updates a key-value pair.
    ///
    /// An empty key is accepted and ignored. An empty value is stored as
    /// is.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        self.check_open()?;
        self.engine.put(key.to_vec(), value.to_vec())?;
        Ok(())
    }

    /// Deletes a key by appending a tombstone.
    ///
    /// Deleting an empty or absent key succeeds without writing anything.
    pub fn delete(&self, key: &[u8]) -> Result<(), DbError> {
        self.check_open()?;
        self.engine.delete(key)?;
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Read operations
    // --------------------------------------------------------------------------------------------

    /// Retrieves the value associated with a key.
    ///
    /// An empty key yields an empty value.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::KeyNotFound`] if the key was never written or has
    /// been deleted.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, DbError> {
        self.check_open()?;
        self.engine.get(key)?.ok_or(DbError::KeyNotFound)
    }

    /// Returns the number of live keys and the current data file size.
    pub fn stats(&self) -> Result<EngineStats, DbError> {
        self.check_open()?;
        Ok(self.engine.stats()?)
    }

    // --------------------------------------------------------------------------------------------
    // Compaction
    // --------------------------------------------------------------------------------------------

    /// Rewrites the data file so it holds only the latest value of each
    /// live key.
    ///
    /// This is a **blocking** operation. Reads and writes continue while
    /// live records are located; they pause while records are copied and
    /// the new file is swapped in. Merging an empty database is a no-op.
    pub fn merge(&self) -> Result<(), DbError> {
        self.check_open()?;
        if !self.engine.merge()? {
            debug!("merge found nothing to do");
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Internal helpers
    // --------------------------------------------------------------------------------------------

    /// Returns `Err(DbError::Closed)` if the database has been closed.
    fn check_open(&self) -> Result<(), DbError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbError::Closed);
        }
        Ok(())
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            let _ = self.engine.close();
        }
    }
}
