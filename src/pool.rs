//! Recycling of fixed-capacity chunk buffers.

use std::{
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicUsize, Ordering},
};

use crossbeam_queue::ArrayQueue;

/// A thread-safe free list of byte buffers, all with the same capacity.
/// Buffers are never resized: every buffer handed out can hold `chunk_size + 1` bytes,
/// the extra byte leaving room for a synthetic trailing newline.
pub struct BufferPool {
    free: ArrayQueue<Vec<u8>>,
    buffer_capacity: usize,
    allocated: AtomicUsize,
}

impl BufferPool {
    /// `max_idle` bounds how many released buffers are kept around for reuse.
    /// `chunk_size` must not exceed [crate::config::MAX_CHUNK_SIZE].
    pub fn new(chunk_size: usize, max_idle: usize) -> Self {
        debug_assert!(chunk_size <= crate::config::MAX_CHUNK_SIZE);
        Self {
            free: ArrayQueue::new(max_idle.max(1)),
            buffer_capacity: chunk_size + 1,
            allocated: AtomicUsize::new(0),
        }
    }

    /// Returns an empty buffer, reusing a released one when available
    pub fn acquire(&self) -> PooledBuf<'_> {
        let buf = self.free.pop().unwrap_or_else(|| self.allocate());
        debug_assert!(buf.is_empty());
        PooledBuf {
            buf: Some(buf),
            pool: self,
        }
    }

    #[cold]
    fn allocate(&self) -> Vec<u8> {
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Vec::with_capacity(self.buffer_capacity)
    }

    fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        // a full free list means the buffer is surplus; let it go
        let _ = self.free.push(buf);
    }

    /// Usable bytes per buffer, not counting the spare byte for a trailing newline
    pub fn chunk_size(&self) -> usize {
        self.buffer_capacity - 1
    }

    /// How many buffers were ever allocated by this pool
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn idle(&self) -> usize {
        self.free.len()
    }
}

/// A buffer on loan from a [BufferPool]. Returned to the pool when dropped.
pub struct PooledBuf<'p> {
    // only `None` during drop
    buf: Option<Vec<u8>>,
    pool: &'p BufferPool,
}

impl Deref for PooledBuf<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        self.buf.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledBuf<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buf.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledBuf<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}
