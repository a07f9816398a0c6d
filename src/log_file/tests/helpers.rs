use crate::log_file::{LogFile, LogFileError, LogFileOptions};
use crate::record::Record;
use tracing_subscriber::EnvFilter;

/// Data file name used by log file tests.
pub const LOG_NAME: &str = "test.data";

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times; only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn put(key: &str, value: &str) -> Record {
    Record::put(key.as_bytes().to_vec(), value.as_bytes().to_vec()).unwrap()
}

pub fn del(key: &str) -> Record {
    Record::delete(key.as_bytes().to_vec()).unwrap()
}

/// Scan every record in the log into a `Vec`.
pub fn collect_iter(log: &LogFile) -> Result<Vec<(u64, Record)>, LogFileError> {
    log.iter().collect()
}

pub fn open(path: &std::path::Path) -> LogFile {
    LogFile::open(path, LogFileOptions::default()).unwrap()
}
