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

//! Storage Input Stream
//!
//! Reads the byte ranges of an ordered descriptor list as one contiguous
//! stream.
//!
//! ## Architecture
//!
//! ```text
//!  descriptors ─► regions (≤ buffer capacity, seq 0..n)
//!                    │
//!   read-ahead thread: take free buffer ─► ChannelIo::read ─┐
//!                                                           │ completes in any order
//!   ready: BTreeMap<seq, buffer> ◄──────────────────────────┘
//!                    │
//!   Read::read takes only `next_seq`, returns the buffer to `free` when drained
//! ```
//!
//! The stream owns a fixed number of buffers, so read-ahead never runs more
//! than that many regions ahead of the consumer. Regions of one descriptor
//! are issued one at a time; regions of different descriptors overlap.

use crate::buffer::PooledBuffer;
use crate::channel::{ChannelIo, IoCompletion};
use crate::context::EngineContext;
use crate::layout::StorageLayout;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashSet};
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use telestore_core::{Result, StorageDescriptor, StorageError};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct Region {
    seq: usize,
    path: PathBuf,
    offset: u64,
    length: usize,
    /// Position of the region's first byte in the stream
    stream_offset: u64,
    /// Region that must complete before this one is issued
    after: Option<usize>,
}

#[derive(Default)]
struct StreamState {
    free: Vec<PooledBuffer>,
    ready: BTreeMap<usize, PooledBuffer>,
    completed: HashSet<usize>,
    in_flight: usize,
    failure: Option<String>,
    total_size: u64,
    closing: bool,
}

struct StreamShared {
    state: Mutex<StreamState>,
    changed: Condvar,
}

impl StreamShared {
    fn on_read(&self, region: &Region, result: Result<IoCompletion>, buffer: PooledBuffer) {
        let mut state = self.state.lock();
        state.in_flight -= 1;
        state.completed.insert(region.seq);

        match result {
            Ok(_) if !state.closing && state.failure.is_none() => {
                state.ready.insert(region.seq, buffer);
            }
            Ok(_) => state.free.push(buffer),
            Err(e) => {
                warn!(path = ?region.path, offset = region.offset, error = %e, "stream region read failed");
                state.free.push(buffer);
                if state.failure.is_none() {
                    state.failure = Some(format!(
                        "region {} of {:?} at offset {}: {}",
                        region.seq, region.path, region.offset, e
                    ));
                }
                // Everything from the earliest failed region on is unreadable
                state.total_size = state.total_size.min(region.stream_offset);
            }
        }
        self.changed.notify_all();
    }
}

pub struct StorageInputStream {
    shared: Arc<StreamShared>,
    channel_io: Arc<dyn ChannelIo>,
    opened_paths: Vec<PathBuf>,
    region_count: usize,
    next_seq: usize,
    current: Option<PooledBuffer>,
    current_pos: usize,
    position: u64,
    read_timeout: Duration,
    reader: Option<JoinHandle<()>>,
    closed: bool,
}

impl StorageInputStream {
    /// Open a stream over `descriptors`, resolved against `layout`
    pub fn open(
        ctx: &EngineContext,
        layout: &StorageLayout,
        descriptors: &[StorageDescriptor],
    ) -> Result<Self> {
        let capacity = ctx.buffer_pool.capacity();
        let mut regions = Vec::new();
        let mut total_size = 0u64;
        for descriptor in descriptors {
            let path = layout.channel_path(descriptor);
            let mut previous = None;
            for (offset, length) in descriptor.regions(capacity) {
                let seq = regions.len();
                regions.push(Region {
                    seq,
                    path: path.clone(),
                    offset,
                    length,
                    stream_offset: total_size,
                    after: previous,
                });
                previous = Some(seq);
                total_size += length as u64;
            }
        }

        let buffer_count = ctx
            .config
            .effective_stream_buffers()
            .min(ctx.buffer_pool.total())
            .min(regions.len().max(1));
        let free = ctx
            .buffer_pool
            .acquire_many(buffer_count, ctx.config.buffer_acquire_timeout())?;

        let mut opened_paths: Vec<PathBuf> = Vec::new();
        for region in &regions {
            if !opened_paths.contains(&region.path) {
                ctx.channel_io.acquire(&region.path);
                opened_paths.push(region.path.clone());
            }
        }

        let shared = Arc::new(StreamShared {
            state: Mutex::new(StreamState {
                free,
                total_size,
                ..Default::default()
            }),
            changed: Condvar::new(),
        });

        let region_count = regions.len();
        let read_timeout = ctx.config.stream_read_timeout();
        let mut stream = Self {
            shared: Arc::clone(&shared),
            channel_io: Arc::clone(&ctx.channel_io),
            opened_paths,
            region_count,
            next_seq: 0,
            current: None,
            current_pos: 0,
            position: 0,
            read_timeout,
            reader: None,
            closed: false,
        };

        if region_count > 0 {
            let channel_io = Arc::clone(&ctx.channel_io);
            let handle = thread::Builder::new()
                .name("telestore-stream".to_string())
                .spawn(move || read_ahead(shared, channel_io, regions, read_timeout))?;
            stream.reader = Some(handle);
        }
        debug!(regions = region_count, total_size, "opened storage input stream");
        Ok(stream)
    }

    /// Bytes the stream will yield in total; shrinks when a region fails
    pub fn total_size(&self) -> u64 {
        self.shared.state.lock().total_size
    }

    /// Bytes consumed so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read the remaining bytes of the stream
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let remaining = self.total_size().saturating_sub(self.position);
        let mut out = Vec::with_capacity(remaining as usize);
        self.read_to_end(&mut out).map_err(into_storage_error)?;
        Ok(out)
    }

    pub fn is_failed(&self) -> bool {
        self.shared.state.lock().failure.is_some()
    }

    /// Stop read-ahead, return all buffers and release channels
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        {
            let mut state = self.shared.state.lock();
            state.closing = true;
            self.shared.changed.notify_all();
        }
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                warn!("stream read-ahead thread panicked");
            }
        }

        self.current = None;
        {
            let mut state = self.shared.state.lock();
            state.ready.clear();
            state.free.clear();
        }
        for path in self.opened_paths.drain(..) {
            self.channel_io.release(&path);
        }
        debug!(position = self.position, "closed storage input stream");
    }

    fn next_buffer(&mut self) -> io::Result<Option<PooledBuffer>> {
        if self.next_seq >= self.region_count {
            return Ok(None);
        }
        let deadline = Instant::now() + self.read_timeout;
        let mut state = self.shared.state.lock();
        loop {
            if let Some(failure) = &state.failure {
                return Err(io::Error::other(StorageError::PartialRead(failure.clone())));
            }
            if let Some(buffer) = state.ready.remove(&self.next_seq) {
                self.next_seq += 1;
                return Ok(Some(buffer));
            }
            if self
                .shared
                .changed
                .wait_until(&mut state, deadline)
                .timed_out()
                && !state.ready.contains_key(&self.next_seq)
                && state.failure.is_none()
            {
                return Err(io::Error::other(StorageError::Timeout(self.read_timeout)));
            }
        }
    }

    fn recycle_current(&mut self) {
        if let Some(mut buffer) = self.current.take() {
            buffer.clear();
            self.shared.state.lock().free.push(buffer);
            self.shared.changed.notify_all();
        }
        self.current_pos = 0;
    }
}

/// Recover the [`StorageError`] carried by an error from [`Read::read`]
pub(crate) fn into_storage_error(err: io::Error) -> StorageError {
    let kind = err.kind();
    match err.into_inner() {
        Some(inner) => match inner.downcast::<StorageError>() {
            Ok(storage) => *storage,
            Err(other) => StorageError::Io(io::Error::new(kind, other)),
        },
        None => StorageError::Io(io::Error::from(kind)),
    }
}

fn read_ahead(
    shared: Arc<StreamShared>,
    channel_io: Arc<dyn ChannelIo>,
    regions: Vec<Region>,
    drain_timeout: Duration,
) {
    for region in regions {
        let buffer = {
            let mut state = shared.state.lock();
            loop {
                if state.closing || state.failure.is_some() {
                    break None;
                }
                let ordered = region.after.map_or(true, |seq| state.completed.contains(&seq));
                if ordered {
                    if let Some(buffer) = state.free.pop() {
                        state.in_flight += 1;
                        break Some(buffer);
                    }
                }
                shared.changed.wait(&mut state);
            }
        };
        let Some(buffer) = buffer else { break };

        let on_read = Arc::clone(&shared);
        let path = region.path.clone();
        let (offset, length) = (region.offset, region.length);
        channel_io.read(
            &path,
            offset,
            length,
            buffer,
            Box::new(move |result: Result<IoCompletion>, buffer: PooledBuffer| {
                on_read.on_read(&region, result, buffer)
            }),
        );
    }

    // Buffers lent to in-flight reads come back through their callbacks
    let deadline = Instant::now() + drain_timeout;
    let mut state = shared.state.lock();
    while state.in_flight > 0 {
        if shared.changed.wait_until(&mut state, deadline).timed_out() {
            warn!(in_flight = state.in_flight, "stream reads still pending at shutdown");
            break;
        }
    }
}

impl Read for StorageInputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed || buf.is_empty() {
            return Ok(0);
        }
        loop {
            if let Some(current) = &self.current {
                let remaining = &current[self.current_pos..];
                if !remaining.is_empty() {
                    let n = remaining.len().min(buf.len());
                    buf[..n].copy_from_slice(&remaining[..n]);
                    self.current_pos += n;
                    self.position += n as u64;
                    return Ok(n);
                }
                self.recycle_current();
            }
            match self.next_buffer()? {
                Some(buffer) => {
                    self.current = Some(buffer);
                    self.current_pos = 0;
                }
                None => return Ok(0),
            }
        }
    }
}

impl Drop for StorageInputStream {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ReadCallback, WriteCallback};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use telestore_core::EngineConfig;

    /// In-memory channel that completes reads on its own threads in reverse
    /// order of submission
    #[derive(Default)]
    struct MemoryChannel {
        files: Mutex<std::collections::HashMap<PathBuf, Vec<u8>>>,
        acquired: AtomicUsize,
        released: AtomicUsize,
        fail_offsets: Mutex<Vec<u64>>,
    }

    impl ChannelIo for MemoryChannel {
        fn write(&self, path: &Path, buffers: Vec<PooledBuffer>, on_complete: WriteCallback) {
            let mut files = self.files.lock();
            let file = files.entry(path.to_path_buf()).or_default();
            let offset = file.len() as u64;
            let mut length = 0;
            for buffer in &buffers {
                file.extend_from_slice(buffer);
                length += buffer.len();
            }
            drop(files);
            drop(buffers);
            on_complete(Ok(IoCompletion { offset, length }));
        }

        fn read(
            &self,
            path: &Path,
            offset: u64,
            length: usize,
            mut buffer: PooledBuffer,
            on_complete: ReadCallback,
        ) {
            let fail = self.fail_offsets.lock().contains(&offset);
            let bytes = self
                .files
                .lock()
                .get(path)
                .map(|f| f[offset as usize..offset as usize + length].to_vec())
                .unwrap_or_default();
            let delay = Duration::from_millis((5 - (offset % 5)) * 2);
            thread::spawn(move || {
                thread::sleep(delay);
                if fail {
                    on_complete(
                        Err(StorageError::channel_io(Path::new("mem"), "injected")),
                        buffer,
                    );
                } else {
                    buffer.prepare_read(length).copy_from_slice(&bytes);
                    on_complete(Ok(IoCompletion { offset, length }), buffer);
                }
            });
        }

        fn acquire(&self, _path: &Path) {
            self.acquired.fetch_add(1, Ordering::SeqCst);
        }

        fn release(&self, _path: &Path) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn setup(files: &[(u32, &[u8])]) -> (Arc<MemoryChannel>, EngineContext, StorageLayout) {
        let channel = Arc::new(MemoryChannel::default());
        let layout = StorageLayout::new("/mem");
        for (key, bytes) in files {
            channel
                .files
                .lock()
                .insert(layout.data_path(*key), bytes.to_vec());
        }
        let mut config = EngineConfig::for_testing();
        config.buffer_capacity = 4;
        let ctx = EngineContext::with_channel_io(config, channel.clone()).unwrap();
        (channel, ctx, layout)
    }

    #[test]
    fn test_concatenates_in_descriptor_order() {
        let (channel, ctx, layout) = setup(&[(1, b"0123456789"), (2, b"abcdefghij")]);
        let descriptors = [
            StorageDescriptor::new(2, 5, 5),
            StorageDescriptor::new(1, 0, 10),
            StorageDescriptor::new(2, 0, 3),
        ];
        let mut stream = StorageInputStream::open(&ctx, &layout, &descriptors).unwrap();
        assert_eq!(stream.total_size(), 18);

        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"fghij0123456789abc");

        stream.close();
        stream.close();
        assert_eq!(channel.acquired.load(Ordering::SeqCst), 2);
        assert_eq!(channel.released.load(Ordering::SeqCst), 2);
        assert_eq!(ctx.buffer_pool.available(), ctx.buffer_pool.total());
    }

    #[test]
    fn test_failed_region_shrinks_and_surfaces() {
        let (channel, ctx, layout) = setup(&[(1, b"0123456789")]);
        channel.fail_offsets.lock().push(4);
        let mut stream =
            StorageInputStream::open(&ctx, &layout, &[StorageDescriptor::new(1, 0, 10)]).unwrap();

        let mut out = Vec::new();
        let err = stream.read_to_end(&mut out).unwrap_err();
        let inner = err.into_inner().unwrap();
        assert!(matches!(
            inner.downcast_ref::<StorageError>(),
            Some(StorageError::PartialRead(_))
        ));
        assert!(stream.is_failed());
        assert_eq!(stream.total_size(), 4);

        drop(stream);
        assert_eq!(ctx.buffer_pool.available(), ctx.buffer_pool.total());
    }

    #[test]
    fn test_earliest_failure_bounds_total_size() {
        let (channel, ctx, layout) = setup(&[(1, b"abcdefgh")]);
        // The region at offset 4 completes first, then the one at offset 0
        channel.fail_offsets.lock().extend([0, 4]);
        let descriptors = [StorageDescriptor::new(1, 0, 4), StorageDescriptor::new(1, 4, 4)];
        let mut stream = StorageInputStream::open(&ctx, &layout, &descriptors).unwrap();

        let mut out = Vec::new();
        assert!(stream.read_to_end(&mut out).is_err());
        stream.close();
        assert_eq!(stream.total_size(), 0);
        assert_eq!(ctx.buffer_pool.available(), ctx.buffer_pool.total());
    }

    #[test]
    fn test_empty_stream() {
        let (_channel, ctx, layout) = setup(&[]);
        let mut stream = StorageInputStream::open(&ctx, &layout, &[]).unwrap();
        let mut out = Vec::new();
        assert_eq!(stream.read_to_end(&mut out).unwrap(), 0);
        assert_eq!(stream.total_size(), 0);
    }
}
