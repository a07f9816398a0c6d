//! Index rebuild from the data file.
//!
//! Replays every record from offset 0 in append order. The scan stops at
//! the first header that does not fit before the end of the file. Any
//! bytes past that point are a torn tail from an interrupted append and
//! are cut off, so the next append lands on a record boundary.

use tracing::{debug, trace, warn};

use super::EngineError;
use super::index::Index;
use crate::log_file::LogFile;

/// Counters describing one replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RecoveryReport {
    /// Records decoded from the log.
    pub records: u64,

    /// Offset just past the last complete record.
    pub end: u64,

    /// Torn-tail bytes removed from the file.
    pub truncated: u64,
}

/// Rebuilds `index` from `log`, truncating a torn tail if present.
///
/// A record whose header decodes but whose payload is short is corruption
/// and fails the replay.
pub(crate) fn replay(log: &mut LogFile, index: &mut Index) -> Result<RecoveryReport, EngineError> {
    let mut records = 0u64;

    let end = {
        let mut iter = log.iter();
        for item in iter.by_ref() {
            let (offset, record) = item?;
            trace!(
                offset,
                key_len = record.key().len(),
                tombstone = record.is_tombstone(),
                "replaying record"
            );
            index.apply(offset, record);
            records += 1;
        }
        iter.offset()
    };

    let len = log.len();
    let truncated = len.saturating_sub(end);
    if truncated > 0 {
        warn!(
            path = %log.path().display(),
            end,
            len,
            "truncating torn tail after last complete record"
        );
        log.truncate(end)?;
    }

    debug!(records, live_keys = index.len(), end, "replay finished");

    Ok(RecoveryReport {
        records,
        end,
        truncated,
    })
}
