//! Bounded pool of header scratch buffers.
//!
//! Every positioned read of a record header borrows one buffer from the
//! pool for the duration of the read. The pooled type is a boxed
//! `[u8; HEADER_SIZE]`, so a buffer of the wrong size cannot enter the
//! pool. Buffers are zeroed on borrow and handed back on every exit path
//! of [`HeaderPool::with_buffer`].

use crossbeam::queue::ArrayQueue;

use crate::record::{HEADER_SIZE, HeaderBytes};

/// Lock-free pool of fixed-size header buffers.
///
/// When the pool is empty a fresh buffer is allocated; when it is full a
/// returned buffer is simply dropped. Capacity therefore bounds retained
/// memory, not concurrency.
#[derive(Debug)]
pub struct HeaderPool {
    slots: ArrayQueue<Box<HeaderBytes>>,
}

impl HeaderPool {
    /// Creates a pool retaining at most `capacity` buffers (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let slots = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            let _ = slots.push(Box::new([0u8; HEADER_SIZE]));
        }
        Self { slots }
    }

    /// Runs `f` with a clean borrowed buffer, then returns it to the pool.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&mut HeaderBytes) -> R) -> R {
        let mut buf = self
            .slots
            .pop()
            .unwrap_or_else(|| Box::new([0u8; HEADER_SIZE]));
        buf.fill(0);

        let out = f(&mut *buf);

        // Full pool: the extra buffer is dropped.
        let _ = self.slots.push(buf);
        out
    }

    /// Number of buffers currently idle in the pool.
    pub fn available(&self) -> usize {
        self.slots.len()
    }

    /// Maximum number of retained buffers.
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }
}
