// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bounded Buffer Pool
//!
//! A fixed set of equally sized byte buffers shared by all writers and
//! readers. Acquiring blocks while the pool is empty, which is the engine's
//! only backpressure point: producers slow down to the speed of the disk
//! instead of growing memory.
//!
//! ## Ownership
//! ```text
//! BufferPool ──acquire()──► PooledBuffer (exclusive)
//!     ▲                          │
//!     └──────── Drop ────────────┘
//! ```
//! A buffer is owned by exactly one operation at a time. Dropping the guard
//! clears it and returns it to the pool.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};
use telestore_core::{Result, StorageError};

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    available: Condvar,
    capacity: usize,
    total: usize,
}

impl PoolInner {
    fn give_back(&self, mut buffer: Vec<u8>) {
        buffer.clear();
        self.free.lock().push(buffer);
        self.available.notify_all();
    }
}

#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("total", &self.inner.total)
            .field("capacity", &self.inner.capacity)
            .field("available", &self.available())
            .finish()
    }
}

impl BufferPool {
    /// Pool of `count` buffers of `capacity` bytes each
    pub fn new(count: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let free = (0..count).map(|_| Vec::with_capacity(capacity)).collect();
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                available: Condvar::new(),
                capacity,
                total: count,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn total(&self) -> usize {
        self.inner.total
    }

    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Number of buffers needed to hold `bytes`
    pub fn buffers_for(&self, bytes: usize) -> usize {
        bytes.div_ceil(self.inner.capacity).max(1)
    }

    fn wrap(&self, data: Vec<u8>) -> PooledBuffer {
        PooledBuffer {
            data,
            pool: Arc::clone(&self.inner),
        }
    }

    /// Block until a buffer is free
    pub fn acquire(&self) -> PooledBuffer {
        let mut free = self.inner.free.lock();
        loop {
            if let Some(data) = free.pop() {
                return self.wrap(data);
            }
            self.inner.available.wait(&mut free);
        }
    }

    pub fn try_acquire(&self) -> Option<PooledBuffer> {
        self.inner.free.lock().pop().map(|data| self.wrap(data))
    }

    pub fn acquire_timeout(&self, timeout: Duration) -> Result<PooledBuffer> {
        let mut buffers = self.acquire_many(1, Some(timeout))?;
        buffers
            .pop()
            .ok_or_else(|| StorageError::ResourceExhausted("no buffer acquired".into()))
    }

    /// Acquire `count` buffers at once
    ///
    /// All buffers are taken in one step so concurrent multi-buffer requests
    /// cannot each hold part of the pool and wait for the rest.
    pub fn acquire_many(&self, count: usize, timeout: Option<Duration>) -> Result<Vec<PooledBuffer>> {
        if count > self.inner.total {
            return Err(StorageError::ResourceExhausted(format!(
                "{} buffers requested, pool holds {}",
                count, self.inner.total
            )));
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut free = self.inner.free.lock();
        while free.len() < count {
            match deadline {
                Some(deadline) => {
                    if self
                        .inner
                        .available
                        .wait_until(&mut free, deadline)
                        .timed_out()
                        && free.len() < count
                    {
                        return Err(StorageError::ResourceExhausted(format!(
                            "timed out after {:?} waiting for {} buffer(s)",
                            timeout.unwrap_or_default(),
                            count
                        )));
                    }
                }
                None => self.inner.available.wait(&mut free),
            }
        }

        let at = free.len() - count;
        let taken: Vec<Vec<u8>> = free.drain(at..).collect();
        drop(free);
        Ok(taken.into_iter().map(|data| self.wrap(data)).collect())
    }
}

// ============================================================================
// Pooled buffer guard
// ============================================================================

pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    fn data(&self) -> &Vec<u8> {
        &self.data
    }

    fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity
    }

    pub fn clear(&mut self) {
        self.data_mut().clear();
    }

    /// Append as much of `bytes` as fits; returns the number of bytes taken
    pub fn fill_from(&mut self, bytes: &[u8]) -> usize {
        let room = self.pool.capacity - self.data().len();
        let take = room.min(bytes.len());
        self.data_mut().extend_from_slice(&bytes[..take]);
        take
    }

    /// Zeroed region of `len` bytes (clamped to capacity) for a read
    pub fn prepare_read(&mut self, len: usize) -> &mut [u8] {
        let len = len.min(self.pool.capacity);
        let data = self.data_mut();
        data.clear();
        data.resize(len, 0);
        data.as_mut_slice()
    }

    pub fn truncate(&mut self, len: usize) {
        self.data_mut().truncate(len);
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data().as_slice()
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len())
            .field("capacity", &self.pool.capacity)
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        self.pool.give_back(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_acquire_and_release() {
        let pool = BufferPool::new(2, 16);
        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(pool.available(), 0);
        assert!(pool.try_acquire().is_none());
        drop(a);
        assert_eq!(pool.available(), 1);
        drop(b);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_next_acquire_blocks_until_release() {
        let pool = BufferPool::new(3, 16);
        let held: Vec<_> = (0..3).map(|_| pool.acquire()).collect();
        let acquired = Arc::new(AtomicBool::new(false));

        let waiter = {
            let pool = pool.clone();
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let _buffer = pool.acquire();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!acquired.load(Ordering::SeqCst));

        drop(held);
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_acquire_timeout_exhausted() {
        let pool = BufferPool::new(1, 16);
        let _held = pool.acquire();
        let err = pool.acquire_timeout(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, StorageError::ResourceExhausted(_)));
    }

    #[test]
    fn test_acquire_many_more_than_total() {
        let pool = BufferPool::new(2, 16);
        assert!(matches!(
            pool.acquire_many(3, None),
            Err(StorageError::ResourceExhausted(_))
        ));
        assert_eq!(pool.acquire_many(2, None).unwrap().len(), 2);
    }

    #[test]
    fn test_fill_and_reuse_is_cleared() {
        let pool = BufferPool::new(1, 4);
        let mut buffer = pool.acquire();
        assert_eq!(buffer.fill_from(b"abcdef"), 4);
        assert_eq!(&buffer[..], b"abcd");
        drop(buffer);

        let buffer = pool.acquire();
        assert!(buffer.is_empty());
        assert_eq!(pool.buffers_for(9), 3);
        assert_eq!(pool.buffers_for(0), 1);
    }
}
