use crossbeam::queue::SegQueue;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Default size of one relay copy buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;

/// Lock-free pool of fixed-size copy buffers shared by all relay streams.
///
/// Buffers are allocated lazily and at most `max_pooled` idle ones are kept;
/// extra buffers are freed when returned.
#[derive(Debug, Clone)]
pub struct BufferPool {
    queue: Arc<SegQueue<Vec<u8>>>,
    pooled: Arc<AtomicUsize>,
    buffer_size: usize,
    max_pooled: usize,
}

/// A borrowed buffer; goes back to its pool on drop.
pub struct PooledBuffer {
    buffer: Vec<u8>,
    queue: Arc<SegQueue<Vec<u8>>>,
    pooled: Arc<AtomicUsize>,
    max_pooled: usize,
}

impl BufferPool {
    pub fn new(buffer_size: usize, max_pooled: usize) -> Self {
        Self {
            queue: Arc::new(SegQueue::new()),
            pooled: Arc::new(AtomicUsize::new(0)),
            buffer_size: buffer_size.max(1),
            max_pooled,
        }
    }

    /// Idle buffers currently waiting in the pool.
    pub fn idle(&self) -> usize {
        self.pooled.load(Ordering::Relaxed)
    }

    pub fn acquire(&self) -> PooledBuffer {
        let buffer = match self.queue.pop() {
            Some(buffer) => {
                self.pooled.fetch_sub(1, Ordering::Relaxed);
                buffer
            }
            None => vec![0; self.buffer_size],
        };
        PooledBuffer {
            buffer,
            queue: Arc::clone(&self.queue),
            pooled: Arc::clone(&self.pooled),
            max_pooled: self.max_pooled,
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, 64)
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        // Reserve a slot first so concurrent drops never overfill the pool
        let mut current = self.pooled.load(Ordering::Relaxed);
        while current < self.max_pooled {
            match self.pooled.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.queue.push(std::mem::take(&mut self.buffer));
                    return;
                }
                Err(actual) => current = actual,
            }
        }
    }
}
