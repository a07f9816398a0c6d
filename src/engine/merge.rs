//! # Merge
//!
//! Rewrites the data file so it holds exactly one PUT record per live key,
//! dropping tombstones and superseded versions.
//!
//! # Phases
//!
//! 1. **Scan** (shared lock) - walk the log and collect `(key, offset)` for
//!    every record that is still the index's current version of its key.
//! 2. **Commit** (exclusive lock) - drop candidates that were overwritten
//!    or deleted after the scan, pick up live records appended after the
//!    scan ended, then copy them into `minibitcask.data.merge`. New offsets
//!    are staged, not applied.
//! 3. **Swap** - rename the merge file over the data file, install the
//!    merged handle, apply the staged offsets and fsync the directory.
//!    Once the rename succeeded the merge is committed: a failed
//!    directory fsync is logged and the merge still reports success.
//!
//! # Failure atomicity
//!
//! Everything before the rename only touches the merge file. On any error
//! the merge file is removed, and the index and data file are unchanged.
//! A crash before the rename leaves a stale merge file, which the next
//! open deletes.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info, warn};

use super::{DATA_FILE_NAME, Engine, EngineError, EngineInner, MERGE_FILE_NAME};
use crate::log_file::{LogFile, LogFileOptions};

/// Points in a merge where a test can inject a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MergeStep {
    /// Exclusive lock taken, nothing written yet.
    AfterScan,

    /// Merge file created and empty.
    AfterCreate,

    /// One record copied into the merge file.
    AfterFirstCopy,

    /// Merge file complete and synced, rename not yet attempted.
    BeforeRename,

    /// Merge swapped in, directory not yet synced.
    DirSync,
}

/// Result of the shared-lock scan phase.
#[derive(Debug)]
pub(crate) struct MergePlan {
    /// Live `(key, offset)` pairs in log order.
    live: Vec<(Vec<u8>, u64)>,

    /// Offset where the scan stopped.
    scanned_to: u64,

    /// Records visited by the scan.
    scanned: u64,
}

#[cfg(test)]
impl MergePlan {
    pub(crate) fn scanned_to(&self) -> u64 {
        self.scanned_to
    }

    pub(crate) fn live_count(&self) -> usize {
        self.live.len()
    }
}

/// Counters for a completed merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MergeReport {
    pub records_scanned: u64,
    pub tail_records: u64,
    pub live_records: usize,
    pub size_before: u64,
    pub size_after: u64,
}

impl Engine {
    /// Compacts the data file down to its live records.
    ///
    /// Returns `Ok(false)` when the log is empty and nothing was done.
    /// Concurrent merges are serialized; reads proceed during the scan
    /// phase and block only for the copy and swap.
    pub fn merge(&self) -> Result<bool, EngineError> {
        let _merging = self
            .merge_lock
            .lock()
            .map_err(|_| EngineError::Internal("merge lock poisoned".into()))?;

        let Some(plan) = self.merge_scan()? else {
            return Ok(false);
        };
        self.merge_commit(plan)?;
        Ok(true)
    }

    /// Collects the current location of every live key under a shared lock.
    pub(crate) fn merge_scan(&self) -> Result<Option<MergePlan>, EngineError> {
        let inner = self.read_lock()?;
        let log = inner.log()?;

        if log.is_empty() {
            debug!("merge skipped, log is empty");
            return Ok(None);
        }

        let mut live = Vec::new();
        let mut scanned = 0u64;
        let mut iter = log.iter();
        for item in iter.by_ref() {
            let (offset, record) = item?;
            scanned += 1;
            if inner.index.is_current(record.key(), offset) {
                let (key, _) = record.into_parts();
                live.push((key, offset));
            }
        }

        debug!(scanned, live = live.len(), "merge scan finished");

        Ok(Some(MergePlan {
            live,
            scanned_to: iter.offset(),
            scanned,
        }))
    }

    /// Copies live records into a fresh file and swaps it in under an
    /// exclusive lock.
    pub(crate) fn merge_commit(&self, plan: MergePlan) -> Result<MergeReport, EngineError> {
        let mut guard = self.write_lock()?;
        let inner = &mut *guard;

        let merge_path = inner.data_dir.join(MERGE_FILE_NAME);
        let data_path = inner.data_dir.join(DATA_FILE_NAME);

        let prepared = Self::prepare_merge(inner, plan, &merge_path).and_then(|prepared| {
            inner.failpoint(MergeStep::BeforeRename)?;
            let Prepared { mut merged, staged, report } = prepared;
            merged.rename(&data_path)?;
            Ok(Prepared {
                merged,
                staged,
                report,
            })
        });

        let Prepared {
            mut merged,
            staged,
            mut report,
        } = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(error = %e, "merge failed, keeping original log");
                remove_merge_file(&merge_path);
                return Err(e);
            }
        };

        // Point of no return: the merged file is now the data file.
        merged.set_sync_writes(inner.config.sync_writes);
        report.size_after = merged.len();
        inner.log = Some(merged);

        for (key, offset) in staged {
            inner.index.insert(key, offset);
        }

        // The swap is visible from here on; a failed directory sync only
        // weakens durability of the rename.
        if let Err(e) = inner
            .failpoint(MergeStep::DirSync)
            .and_then(|()| sync_dir(&inner.data_dir).map_err(EngineError::from))
        {
            warn!(error = %e, "merge committed but directory sync failed");
        }

        info!(
            records_scanned = report.records_scanned,
            tail_records = report.tail_records,
            live_records = report.live_records,
            size_before = report.size_before,
            size_after = report.size_after,
            "merge complete"
        );

        Ok(report)
    }

    /// Re-validates the plan against the live index and writes the merge
    /// file. The index and data file are not modified.
    fn prepare_merge(
        inner: &EngineInner,
        plan: MergePlan,
        merge_path: &Path,
    ) -> Result<Prepared, EngineError> {
        inner.failpoint(MergeStep::AfterScan)?;

        let log = inner.log()?;
        let size_before = log.len();

        let mut live: Vec<(Vec<u8>, u64)> = plan
            .live
            .into_iter()
            .filter(|(key, offset)| inner.index.is_current(key, *offset))
            .collect();

        // Writes that landed between the scan and the exclusive lock.
        let mut tail_records = 0u64;
        for item in log.iter_from(plan.scanned_to) {
            let (offset, record) = item?;
            tail_records += 1;
            if inner.index.is_current(record.key(), offset) {
                let (key, _) = record.into_parts();
                live.push((key, offset));
            }
        }

        let options = LogFileOptions {
            sync_writes: false,
            header_pool_size: inner.config.header_pool_size,
        };
        let mut merged = LogFile::create(merge_path, options)?;
        inner.failpoint(MergeStep::AfterCreate)?;

        let live_records = live.len();
        let mut staged = Vec::with_capacity(live_records);
        for (key, offset) in live {
            let record = log.read_at(offset)?.ok_or_else(|| {
                EngineError::Internal(format!("indexed offset {offset} is past end of log"))
            })?;
            let new_offset = merged.append(&record)?;
            staged.push((key, new_offset));
            inner.failpoint(MergeStep::AfterFirstCopy)?;
        }

        merged.sync()?;

        Ok(Prepared {
            merged,
            staged,
            report: MergeReport {
                records_scanned: plan.scanned,
                tail_records,
                live_records,
                size_before,
                size_after: 0,
            },
        })
    }
}

/// A fully written merge file and the index updates it implies.
struct Prepared {
    merged: LogFile,
    staged: Vec<(Vec<u8>, u64)>,
    report: MergeReport,
}

impl EngineInner {
    #[cfg(test)]
    fn failpoint(&self, step: MergeStep) -> Result<(), EngineError> {
        if self.merge_failpoint == Some(step) {
            return Err(io::Error::other(format!("injected merge failure at {step:?}")).into());
        }
        Ok(())
    }

    #[cfg(not(test))]
    #[inline]
    fn failpoint(&self, _step: MergeStep) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Deletes a leftover merge file, logging anything other than "not found".
pub(crate) fn remove_merge_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed merge file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "failed to remove merge file: {e}"),
    }
}

/// Makes a rename inside `dir` durable.
fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}
