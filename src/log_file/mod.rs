//! # Append-Only Log File
//!
//! Owns the single on-disk data file and its logical end offset.
//!
//! The file is an ordered sequence of encoded [`Record`]s starting at
//! byte 0. Records are never modified in place: [`LogFile::append`]
//! writes at the current end and advances it, and [`LogFile::read_at`]
//! decodes the record starting at a given offset.
//!
//! # Positioned I/O
//!
//! All reads and writes are positioned (`pread`/`pwrite`), so readers
//! never share a file cursor and a shared `&LogFile` can serve any number
//! of concurrent reads. The file is deliberately **not** opened in append
//! mode, since `O_APPEND` would ignore the write position.
//!
//! # End of log
//!
//! The logical end is `write_offset`. A header that does not fit before
//! the logical end is reported as end-of-log (`Ok(None)`), which is how
//! forward scans terminate. Once a header has been decoded, a payload
//! that cannot be read in full is a hard I/O error: a truncated record is
//! corruption, not a normal end.
//!
//! # Failure atomicity
//!
//! `write_offset` advances only after the whole record was written (and
//! synced, when configured). A failed append leaves the offset where it
//! was and cuts the file back to it, so partial bytes never outlive the
//! failure and a later replay cannot mistake them for a record.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

mod pool;

pub use pool::HeaderPool;

use std::{
    fs::{self, File, OpenOptions},
    io,
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{error, info, trace, warn};

use crate::record::{HEADER_SIZE, Record, RecordError, RecordHeader, decode_header};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by log file operations.
#[derive(Debug, Error)]
pub enum LogFileError {
    /// Underlying I/O error, including short reads inside a record.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A header on disk could not be decoded.
    #[error("Record error: {0}")]
    Record(#[from] RecordError),
}

// ------------------------------------------------------------------------------------------------
// Options
// ------------------------------------------------------------------------------------------------

/// Per-file behaviour knobs.
#[derive(Debug, Clone, Copy)]
pub struct LogFileOptions {
    /// `fdatasync` after every append.
    pub sync_writes: bool,

    /// Number of header buffers retained by the read pool.
    pub header_pool_size: usize,
}

impl Default for LogFileOptions {
    fn default() -> Self {
        Self {
            sync_writes: false,
            header_pool_size: 16,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// LogFile Core
// ------------------------------------------------------------------------------------------------

/// An append-only data file with positioned reads.
#[derive(Debug)]
pub struct LogFile {
    /// Open read/write handle.
    file: File,

    /// Current path of the file on disk.
    path: PathBuf,

    /// Logical end of the log; the next record is written here.
    write_offset: u64,

    /// Scratch buffers for header reads.
    pool: HeaderPool,

    /// Whether each append is followed by `fdatasync`.
    sync_writes: bool,

    /// Bytes the next append writes before failing.
    #[cfg(test)]
    torn_append: Option<usize>,
}

impl LogFile {
    /// Opens an existing log file or creates an empty one.
    ///
    /// The write offset starts at the current file length.
    pub fn open<P: AsRef<Path>>(path: P, options: LogFileOptions) -> Result<Self, LogFileError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        let log = Self::from_file(file, path, options)?;
        info!(path = %path.display(), len = log.write_offset, "opened log file");
        Ok(log)
    }

    /// Creates an empty log file, truncating any existing content.
    pub fn create<P: AsRef<Path>>(path: P, options: LogFileOptions) -> Result<Self, LogFileError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let log = Self::from_file(file, path, options)?;
        info!(path = %path.display(), "created log file");
        Ok(log)
    }

    fn from_file(file: File, path: &Path, options: LogFileOptions) -> Result<Self, LogFileError> {
        let write_offset = file.metadata()?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            write_offset,
            pool: HeaderPool::new(options.header_pool_size),
            sync_writes: options.sync_writes,
            #[cfg(test)]
            torn_append: None,
        })
    }

    /// Reads the record starting at `offset`.
    ///
    /// Returns `Ok(None)` when no complete header fits before the end of
    /// the log.
    pub fn read_at(&self, offset: u64) -> Result<Option<Record>, LogFileError> {
        let Some(header) = self.read_header(offset)? else {
            trace!(offset, "end of log");
            return Ok(None);
        };

        let end = offset.saturating_add(header.record_size());
        if end > self.write_offset {
            error!(offset, end, log_end = self.write_offset, "record runs past end of log");
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "record at offset {offset} ends at {end}, past end of log {}",
                    self.write_offset
                ),
            )
            .into());
        }

        let key_offset = offset + HEADER_SIZE as u64;
        let key = self.read_payload(key_offset, header.key_size)?;
        let value = self.read_payload(key_offset + u64::from(header.key_size), header.value_size)?;

        Ok(Some(Record::from_parts(header, key, value)))
    }

    /// Reads and decodes the fixed header at `offset` using a pooled buffer.
    fn read_header(&self, offset: u64) -> Result<Option<RecordHeader>, LogFileError> {
        if offset.saturating_add(HEADER_SIZE as u64) > self.write_offset {
            return Ok(None);
        }

        self.pool.with_buffer(|buf| -> Result<Option<RecordHeader>, LogFileError> {
            match self.file.read_exact_at(buf, offset) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e.into()),
            }
            Ok(Some(decode_header(buf)?))
        })
    }

    /// Reads exactly `len` bytes at `offset`; zero-length reads skip I/O.
    fn read_payload(&self, offset: u64, len: u32) -> Result<Vec<u8>, LogFileError> {
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; len as usize];
        self.file.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }

    /// Appends one record at the end of the log.
    ///
    /// Returns the offset at which the record begins.
    pub fn append(&mut self, record: &Record) -> Result<u64, LogFileError> {
        let bytes = record.encode();
        let offset = self.write_offset;

        if let Err(e) = self.write_record(&bytes, offset) {
            self.discard_from(offset);
            return Err(e.into());
        }

        self.write_offset += bytes.len() as u64;

        trace!(
            offset,
            len = bytes.len(),
            mark = ?record.mark(),
            "appended record"
        );
        Ok(offset)
    }

    fn write_record(&mut self, bytes: &[u8], offset: u64) -> io::Result<()> {
        #[cfg(test)]
        if let Some(written) = self.torn_append.take() {
            self.file.write_all_at(&bytes[..written.min(bytes.len())], offset)?;
            return Err(io::Error::other("injected torn append"));
        }

        self.file.write_all_at(bytes, offset)?;
        if self.sync_writes {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Drops whatever a failed append left past the logical end.
    fn discard_from(&self, offset: u64) {
        if let Err(e) = self.file.set_len(offset) {
            warn!(
                path = %self.path.display(),
                offset,
                "failed to discard partial append: {e}"
            );
        }
    }

    /// Makes the next append write only `written` bytes and then fail.
    #[cfg(test)]
    pub(crate) fn inject_torn_append(&mut self, written: usize) {
        self.torn_append = Some(written);
    }

    /// Returns an iterator over all records from the start of the log.
    pub fn iter(&self) -> LogIter<'_> {
        self.iter_from(0)
    }

    /// Returns an iterator over records starting at `offset`.
    ///
    /// `offset` must be a record boundary.
    pub fn iter_from(&self, offset: u64) -> LogIter<'_> {
        LogIter {
            log: self,
            offset,
            done: false,
        }
    }

    /// Cuts the file back to `len` bytes and moves the logical end there.
    pub fn truncate(&mut self, len: u64) -> Result<(), LogFileError> {
        self.file.set_len(len)?;
        self.file.sync_all()?;
        self.write_offset = len;
        Ok(())
    }

    /// Flushes data and metadata to disk.
    pub fn sync(&self) -> Result<(), LogFileError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Renames the file on disk, keeping the open handle.
    pub fn rename<P: AsRef<Path>>(&mut self, to: P) -> Result<(), LogFileError> {
        let to = to.as_ref();
        fs::rename(&self.path, to)?;
        trace!(from = %self.path.display(), to = %to.display(), "renamed log file");
        self.path = to.to_path_buf();
        Ok(())
    }

    /// Turns per-append `fdatasync` on or off.
    pub fn set_sync_writes(&mut self, sync_writes: bool) {
        self.sync_writes = sync_writes;
    }

    /// Logical length of the log in bytes.
    pub fn len(&self) -> u64 {
        self.write_offset
    }

    pub fn is_empty(&self) -> bool {
        self.write_offset == 0
    }

    /// Length of the file on disk. Equals [`LogFile::len`] unless a failed
    /// append could not be cut back.
    pub fn physical_len(&self) -> Result<u64, LogFileError> {
        Ok(self.file.metadata()?.len())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header buffer pool used by [`LogFile::read_at`].
    pub fn header_pool(&self) -> &HeaderPool {
        &self.pool
    }
}

impl Drop for LogFile {
    fn drop(&mut self) {
        if let Err(e) = self.file.sync_all() {
            error!(path = %self.path.display(), "failed to sync log file on drop: {e}");
        }
    }
}

// ------------------------------------------------------------------------------------------------
// LogIter
// ------------------------------------------------------------------------------------------------

/// Forward scan over a [`LogFile`].
///
/// Yields `(offset, record)` pairs in append order. Iteration ends at the
/// first end-of-log, or after the first error.
pub struct LogIter<'a> {
    log: &'a LogFile,

    /// Offset of the next record to read.
    offset: u64,

    done: bool,
}

impl LogIter<'_> {
    /// Offset just past the last record yielded so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Iterator for LogIter<'_> {
    type Item = Result<(u64, Record), LogFileError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.log.read_at(self.offset) {
            Ok(Some(record)) => {
                let at = self.offset;
                self.offset += record.size();
                Some(Ok((at, record)))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
