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

//! Asynchronous Channel I/O
//!
//! Reads and writes against append-only data files complete through one-shot
//! callbacks instead of blocking the caller.
//!
//! ## Architecture
//! ```text
//! ChannelManager
//! ├── channels: DashMap<PathBuf, ManagedChannel>
//! │   └── ManagedChannel
//! │       ├── jobs (FIFO, drained by at most one I/O worker at a time)
//! │       ├── next_position (append offset, assigned at enqueue)
//! │       ├── ref_count (open while referenced)
//! │       └── file handle (opened lazily, dropped when idle)
//! └── io executor: WorkerPool (shared by all channels)
//! ```
//!
//! Operations on one file are serialized; different files proceed
//! concurrently. Every callback fires exactly once. Write buffers go back to
//! the pool before the write callback runs.

use crate::buffer::PooledBuffer;
use crate::executor::WorkerPool;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telestore_core::{Result, StorageError};
use tracing::{debug, warn};

/// Outcome of a successful channel operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoCompletion {
    pub offset: u64,
    pub length: usize,
}

pub type WriteCallback = Box<dyn FnOnce(Result<IoCompletion>) + Send + 'static>;

/// Read callbacks get their buffer back, filled on success
pub type ReadCallback = Box<dyn FnOnce(Result<IoCompletion>, PooledBuffer) + Send + 'static>;

/// Asynchronous file access used by the writer and the input stream
pub trait ChannelIo: Send + Sync {
    /// Append the buffers' bytes to `path`
    ///
    /// The offset is fixed when the write is queued, so offsets follow
    /// submission order no matter when the write completes.
    fn write(&self, path: &Path, buffers: Vec<PooledBuffer>, on_complete: WriteCallback);

    /// Read `length` bytes at `offset` into `buffer`
    fn read(
        &self,
        path: &Path,
        offset: u64,
        length: usize,
        buffer: PooledBuffer,
        on_complete: ReadCallback,
    );

    /// Register a user of the channel for `path`
    fn acquire(&self, path: &Path);

    /// Drop a user; the file handle is closed when no user remains
    fn release(&self, path: &Path);

    /// Drop idle file handles; returns how many were closed
    fn close_idle(&self) -> usize {
        0
    }
}

// ============================================================================
// Managed channel
// ============================================================================

type ChannelJob = Box<dyn FnOnce(&ManagedChannel) + Send + 'static>;

struct OpenFile {
    file: File,
    writable: bool,
}

struct ManagedChannel {
    path: PathBuf,
    file: Mutex<Option<OpenFile>>,
    jobs: Mutex<VecDeque<ChannelJob>>,
    scheduled: AtomicBool,
    next_position: AtomicU64,
    ref_count: AtomicUsize,
    last_used: Mutex<Instant>,
}

impl ManagedChannel {
    fn new(path: &Path) -> Self {
        let existing = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        Self {
            path: path.to_path_buf(),
            file: Mutex::new(None),
            jobs: Mutex::new(VecDeque::new()),
            scheduled: AtomicBool::new(false),
            next_position: AtomicU64::new(existing),
            ref_count: AtomicUsize::new(0),
            last_used: Mutex::new(Instant::now()),
        }
    }

    fn with_file<T>(
        &self,
        writable: bool,
        op: impl FnOnce(&mut File) -> io::Result<T>,
    ) -> io::Result<T> {
        let mut slot = self.file.lock();
        *self.last_used.lock() = Instant::now();

        let reopen = match slot.as_ref() {
            Some(open) => writable && !open.writable,
            None => true,
        };
        if reopen {
            let file = if writable {
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(&self.path)?
            } else {
                OpenOptions::new().read(true).open(&self.path)?
            };
            debug!(path = ?self.path, writable, "opened channel");
            *slot = Some(OpenFile { file, writable });
        }

        match slot.as_mut() {
            Some(open) => op(&mut open.file),
            None => Err(io::Error::new(io::ErrorKind::Other, "channel not open")),
        }
    }

    /// Give back the tail reservation of a failed write
    ///
    /// Only possible while no later write has been queued; otherwise the
    /// region stays a hole that no descriptor references.
    fn rollback(&self, offset: u64, length: usize) -> bool {
        self.next_position
            .compare_exchange(
                offset + length as u64,
                offset,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    fn close_handle(&self) -> bool {
        let mut slot = self.file.lock();
        match slot.take() {
            Some(open) => {
                if open.writable {
                    if let Err(e) = open.file.sync_data() {
                        warn!(path = ?self.path, error = %e, "failed to sync channel on close");
                    }
                }
                debug!(path = ?self.path, "closed channel");
                true
            }
            None => false,
        }
    }

    fn is_open(&self) -> bool {
        self.file.lock().is_some()
    }

    fn drain(channel: Arc<ManagedChannel>) {
        loop {
            let job = channel.jobs.lock().pop_front();
            match job {
                Some(job) => job(channel.as_ref()),
                None => {
                    channel.scheduled.store(false, Ordering::SeqCst);
                    // A job may have been queued after the pop above
                    if channel.jobs.lock().is_empty() || channel.scheduled.swap(true, Ordering::SeqCst) {
                        break;
                    }
                }
            }
        }
    }
}

// ============================================================================
// Channel manager
// ============================================================================

pub struct ChannelManager {
    channels: DashMap<PathBuf, Arc<ManagedChannel>>,
    executor: WorkerPool,
    idle_close: Duration,
}

impl ChannelManager {
    pub fn new(io_threads: usize, idle_close: Duration) -> Result<Self> {
        Ok(Self {
            channels: DashMap::new(),
            executor: WorkerPool::new("telestore-io", io_threads)?,
            idle_close,
        })
    }

    fn channel(&self, path: &Path) -> Arc<ManagedChannel> {
        if let Some(channel) = self.channels.get(path) {
            return Arc::clone(channel.value());
        }
        Arc::clone(
            self.channels
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(ManagedChannel::new(path)))
                .value(),
        )
    }

    fn enqueue(&self, channel: Arc<ManagedChannel>, job: ChannelJob) {
        channel.jobs.lock().push_back(job);
        if channel.scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let worker_channel = Arc::clone(&channel);
        if self
            .executor
            .execute(move || ManagedChannel::drain(worker_channel))
            .is_err()
        {
            // Executor stopped: run on the caller so callbacks still fire
            ManagedChannel::drain(channel);
        }
    }

    /// Channels currently holding a file handle
    pub fn open_channel_count(&self) -> usize {
        self.channels.iter().filter(|e| e.value().is_open()).count()
    }

    pub fn ref_count(&self, path: &Path) -> usize {
        self.channels
            .get(path)
            .map(|c| c.value().ref_count.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Bytes reserved in the file so far (next append offset)
    pub fn reserved_len(&self, path: &Path) -> u64 {
        self.channel(path).next_position.load(Ordering::SeqCst)
    }

    /// Finish queued operations and close every handle
    pub fn shutdown(&self) {
        self.executor.shutdown();
        for entry in self.channels.iter() {
            entry.value().close_handle();
        }
    }
}

impl ChannelIo for ChannelManager {
    fn write(&self, path: &Path, buffers: Vec<PooledBuffer>, on_complete: WriteCallback) {
        let length: usize = buffers.iter().map(|b| b.len()).sum();
        let channel = self.channel(path);
        let offset = channel
            .next_position
            .fetch_add(length as u64, Ordering::SeqCst);

        self.enqueue(
            channel,
            Box::new(move |channel: &ManagedChannel| {
                let result = channel.with_file(true, |file| {
                    file.seek(SeekFrom::Start(offset))?;
                    for buffer in &buffers {
                        file.write_all(buffer)?;
                    }
                    Ok(())
                });
                drop(buffers);

                match result {
                    Ok(()) => on_complete(Ok(IoCompletion { offset, length })),
                    Err(e) => {
                        let rolled_back = channel.rollback(offset, length);
                        warn!(path = ?channel.path, offset, length, rolled_back, error = %e, "channel write failed");
                        on_complete(Err(StorageError::channel_io(&channel.path, e.to_string())))
                    }
                }
            }),
        );
    }

    fn read(
        &self,
        path: &Path,
        offset: u64,
        length: usize,
        mut buffer: PooledBuffer,
        on_complete: ReadCallback,
    ) {
        if length > buffer.capacity() {
            let err = StorageError::channel_io(
                path,
                format!("read of {} bytes exceeds buffer capacity {}", length, buffer.capacity()),
            );
            on_complete(Err(err), buffer);
            return;
        }

        let channel = self.channel(path);
        self.enqueue(
            channel,
            Box::new(move |channel: &ManagedChannel| {
                let result = channel.with_file(false, |file| {
                    file.seek(SeekFrom::Start(offset))?;
                    file.read_exact(buffer.prepare_read(length))
                });

                match result {
                    Ok(()) => on_complete(Ok(IoCompletion { offset, length }), buffer),
                    Err(e) => {
                        warn!(path = ?channel.path, offset, length, error = %e, "channel read failed");
                        buffer.clear();
                        on_complete(Err(StorageError::channel_io(&channel.path, e.to_string())), buffer)
                    }
                }
            }),
        );
    }

    fn acquire(&self, path: &Path) {
        self.channel(path).ref_count.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self, path: &Path) {
        let Some(channel) = self.channels.get(path).map(|c| Arc::clone(c.value())) else {
            return;
        };
        let previous = channel
            .ref_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if previous == Ok(1) {
            channel.close_handle();
        }
    }

    /// Drop file handles of unreferenced channels unused for longer than the
    /// idle timeout
    ///
    /// Handles reopen lazily on the next operation.
    fn close_idle(&self) -> usize {
        let mut closed = 0;
        for entry in self.channels.iter() {
            let channel = entry.value();
            if channel.ref_count.load(Ordering::SeqCst) > 0 {
                continue;
            }
            let idle = channel.last_used.lock().elapsed() >= self.idle_close;
            if idle && channel.jobs.lock().is_empty() && channel.close_handle() {
                closed += 1;
            }
        }
        if closed > 0 {
            debug!(closed, "closed idle channels");
        }
        closed
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
