//! Torn-tail and corruption handling.
//!
//! A header that does not fit before the end of the file is a normal end
//! of log. A header that fits but whose payload does not is corruption
//! and surfaces as an I/O error.

#[cfg(test)]
mod tests {
    use crate::log_file::LogFileError;
    use crate::log_file::tests::helpers::*;
    use crate::record::Record;
    use std::fs::OpenOptions;
    use std::io::{ErrorKind, Write};
    use tempfile::TempDir;

    #[test]
    fn test_partial_header_is_end_of_log() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(LOG_NAME);
        let len = {
            let mut log = open(&path);
            log.append(&put("a", "1")).unwrap();
            log.len()
        };

        // Four bytes of a header that never completed.
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[0, 0, 0, 1]).unwrap();
        f.sync_all().unwrap();

        let log = open(&path);
        assert_eq!(log.len(), len + 4);
        assert!(log.read_at(len).unwrap().is_none());

        let mut iter = log.iter();
        assert!(iter.next().unwrap().is_ok());
        assert!(iter.next().is_none());
        assert_eq!(iter.offset(), len);
    }

    #[test]
    fn test_truncated_payload_is_io_error() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(LOG_NAME);
        {
            let mut log = open(&path);
            log.append(&put("key", "a-longer-value")).unwrap();
        }

        let f = OpenOptions::new().write(true).open(&path).unwrap();
        let len = f.metadata().unwrap().len();
        f.set_len(len - 3).unwrap();

        let log = open(&path);
        let err = log.read_at(0).unwrap_err();
        match err {
            LogFileError::Io(e) => assert_eq!(e.kind(), ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other:?}"),
        }

        // The iterator reports the error once and then stops.
        let mut iter = log.iter();
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_invalid_mark_is_record_error() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(LOG_NAME);
        {
            let mut log = open(&path);
            log.append(&put("k", "v")).unwrap();
        }

        // Overwrite the mark field (bytes 8..10) with an unknown value.
        let f = OpenOptions::new().write(true).open(&path).unwrap();
        std::os::unix::fs::FileExt::write_all_at(&f, &[0, 9], 8).unwrap();

        let log = open(&path);
        assert!(matches!(log.read_at(0), Err(LogFileError::Record(_))));
    }

    #[test]
    fn test_truncate_moves_logical_end() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(LOG_NAME);
        let mut log = open(&path);
        let keep = log.append(&put("a", "1")).unwrap() + put("a", "1").size();
        log.append(&put("b", "2")).unwrap();

        log.truncate(keep).unwrap();
        assert_eq!(log.len(), keep);
        assert_eq!(log.physical_len().unwrap(), keep);
        assert_eq!(collect_iter(&log).unwrap().len(), 1);

        assert_eq!(log.append(&put("c", "3")).unwrap(), keep);
    }

    #[test]
    fn test_failed_append_keeps_offset_and_file_length() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(LOG_NAME);
        let len = {
            let mut log = open(&path);
            log.append(&put("a", "1")).unwrap();
            let len = log.len();

            // Forty bytes of a record that claims a 1000-byte value.
            let big = Record::put(b"big".to_vec(), vec![b'x'; 1000]).unwrap();
            log.inject_torn_append(40);
            assert!(matches!(log.append(&big), Err(LogFileError::Io(_))));
            assert_eq!(log.len(), len);
            assert_eq!(log.physical_len().unwrap(), len);

            // A smaller record lands where the failed one started.
            assert_eq!(log.append(&put("b", "2")).unwrap(), len);
            log.len()
        };

        let log = open(&path);
        assert_eq!(log.len(), len);
        assert_eq!(log.physical_len().unwrap(), len);

        let records = collect_iter(&log).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].1.key(), b"b");
    }
}
