#[cfg(test)]
mod tests {
    use crate::log_file::HeaderPool;
    use crate::log_file::tests::helpers::*;
    use crate::record::HEADER_SIZE;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn test_pool_starts_full() {
        let pool = HeaderPool::new(4);
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let pool = HeaderPool::new(0);
        assert_eq!(pool.capacity(), 1);
        pool.with_buffer(|buf| assert_eq!(buf.len(), HEADER_SIZE));
    }

    #[test]
    fn test_buffer_is_returned_after_use() {
        let pool = HeaderPool::new(2);

        pool.with_buffer(|_| {
            assert_eq!(pool.available(), 1);
        });
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_buffer_is_returned_on_error_path() {
        let pool = HeaderPool::new(1);

        let result: Result<(), &str> = pool.with_buffer(|_| Err("read failed"));
        assert!(result.is_err());
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_borrowed_buffer_is_clean() {
        let pool = HeaderPool::new(1);

        pool.with_buffer(|buf| buf.fill(0xAB));
        pool.with_buffer(|buf| assert_eq!(*buf, [0u8; HEADER_SIZE]));
    }

    #[test]
    fn test_nested_borrows_allocate_past_capacity() {
        let pool = HeaderPool::new(1);

        pool.with_buffer(|outer| {
            outer[0] = 1;
            pool.with_buffer(|inner| {
                assert_eq!(inner[0], 0);
                assert_eq!(pool.available(), 0);
            });
        });

        // Only one buffer fits back.
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_reads_leave_pool_balanced() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let mut log = open(&tmp.path().join(LOG_NAME));
        log.append(&put("a", "1")).unwrap();

        let capacity = log.header_pool().capacity();
        log.read_at(0).unwrap();
        log.read_at(10_000).unwrap();
        assert_eq!(log.header_pool().available(), capacity);
    }

    #[test]
    fn test_concurrent_reads_share_pool() {
        init_tracing();

        let tmp = TempDir::new().unwrap();
        let mut log = open(&tmp.path().join(LOG_NAME));
        let mut offsets = Vec::new();
        for i in 0..50 {
            offsets.push(log.append(&put(&format!("key{i}"), &format!("value{i}"))).unwrap());
        }

        let log = Arc::new(log);
        let offsets = Arc::new(offsets);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let log = Arc::clone(&log);
            let offsets = Arc::clone(&offsets);
            handles.push(thread::spawn(move || {
                for (i, offset) in offsets.iter().enumerate() {
                    let record = log.read_at(*offset).unwrap().unwrap();
                    assert_eq!(record.key(), format!("key{i}").as_bytes());
                    assert_eq!(record.value(), format!("value{i}").as_bytes());
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(log.header_pool().available(), log.header_pool().capacity());
    }
}
