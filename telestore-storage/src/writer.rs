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

//! Storage Writer
//!
//! Orchestrates the write path of one storage:
//!
//! ```text
//! write(record) ─► worker pool ─► WriteTask
//!                                  1. reserve leaf (file key fixed)
//!                                  2. serialize
//!                                  3. acquire buffers   (backpressure)
//!                                  4. channel write     (offset fixed at enqueue)
//!                                  5. commit descriptor │ write_failed
//!                                        └────────► WriteFuture resolves
//! ```
//!
//! A write is complete when its bytes are handed to the operating system,
//! not when they are fsynced.

use crate::channel::IoCompletion;
use crate::context::EngineContext;
use crate::executor::WorkerPool;
use crate::handler::{HandlerStats, IndexingTreeHandler};
use crate::layout::StorageLayout;
use crate::processor::DataProcessor;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telestore_core::{Result, SerializationHints, StorageDescriptor, StorageError, TelemetryRecord};
use telestore_index::IndexingTree;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// Write futures
// ============================================================================

/// Pending result of one write
pub struct WriteFuture {
    receiver: Receiver<Result<StorageDescriptor>>,
    task: Option<(u64, Arc<IndexingTreeHandler>)>,
}

impl WriteFuture {
    fn pending(
        receiver: Receiver<Result<StorageDescriptor>>,
        task_id: u64,
        handler: Arc<IndexingTreeHandler>,
    ) -> Self {
        Self {
            receiver,
            task: Some((task_id, handler)),
        }
    }

    /// Already resolved future
    pub fn completed(result: Result<StorageDescriptor>) -> Self {
        let (tx, rx) = bounded(1);
        let _ = tx.send(result);
        Self {
            receiver: rx,
            task: None,
        }
    }

    pub fn wait(self) -> Result<StorageDescriptor> {
        self.receiver
            .recv()
            .unwrap_or_else(|_| Err(StorageError::Closed("write task dropped".into())))
    }

    /// Wait at most `timeout`; an expired wait fails the write and releases
    /// its reservation.
    pub fn wait_timeout(self, timeout: Duration) -> Result<StorageDescriptor> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                let released = match &self.task {
                    Some((task_id, handler)) => handler.write_failed(*task_id),
                    None => true,
                };
                if released {
                    Err(StorageError::Timeout(timeout))
                } else {
                    // Completed while we were timing out
                    self.wait()
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(StorageError::Closed("write task dropped".into()))
            }
        }
    }

    /// Non-blocking poll
    pub fn try_wait(&self) -> Option<Result<StorageDescriptor>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                Some(Err(StorageError::Closed("write task dropped".into())))
            }
        }
    }
}

/// Sink for records leaving the processor chain
pub trait RecordWriter: Send + Sync {
    fn write(&self, record: TelemetryRecord, hints: SerializationHints) -> WriteFuture;
}

// ============================================================================
// Writing status
// ============================================================================

/// Load indicator from arrived vs finished tasks in the last check period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WritingStatus {
    Good,
    Medium,
    High,
    Critical,
}

impl WritingStatus {
    pub fn from_rates(arrived: u64, finished: u64) -> Self {
        if arrived <= finished {
            return WritingStatus::Good;
        }
        if finished == 0 {
            return WritingStatus::Critical;
        }
        let ratio = arrived as f64 / finished as f64;
        if ratio <= 1.5 {
            WritingStatus::Medium
        } else if ratio <= 2.0 {
            WritingStatus::High
        } else {
            WritingStatus::Critical
        }
    }
}

#[derive(Debug)]
struct StatusWindow {
    arrived: u64,
    finished: u64,
    status: WritingStatus,
}

// ============================================================================
// Writer
// ============================================================================

const STATE_IDLE: u8 = 0;
const STATE_WRITING: u8 = 1;
const STATE_FINALIZING: u8 = 2;
const STATE_CANCELLED: u8 = 3;
const STATE_CLOSED: u8 = 4;

struct WriterInner {
    ctx: Arc<EngineContext>,
    handler: Arc<IndexingTreeHandler>,
    storage_id: Uuid,
    state: AtomicU8,
    layout: RwLock<Option<StorageLayout>>,
    /// Channels acquired by this writer, released at shutdown
    opened_paths: DashMap<PathBuf, ()>,
    arrived: AtomicU64,
    finished: AtomicU64,
    status: Mutex<StatusWindow>,
}

impl WriterInner {
    fn complete(&self, tx: &Sender<Result<StorageDescriptor>>, result: Result<StorageDescriptor>) {
        self.finished.fetch_add(1, Ordering::Relaxed);
        let _ = tx.send(result);
    }

    fn fail(&self, task_id: u64, tx: &Sender<Result<StorageDescriptor>>, err: StorageError) {
        self.handler.write_failed(task_id);
        self.complete(tx, Err(err));
    }

    fn run_write(
        self: &Arc<Self>,
        task_id: u64,
        record: TelemetryRecord,
        hints: SerializationHints,
        tx: Sender<Result<StorageDescriptor>>,
    ) {
        if self.state.load(Ordering::SeqCst) == STATE_CANCELLED {
            return self.fail(task_id, &tx, StorageError::Closed("storage writer cancelled".into()));
        }
        let Some(layout) = self.layout.read().clone() else {
            return self.fail(task_id, &tx, StorageError::NotWriting);
        };

        let ticket = match self.handler.start_write(task_id, &record) {
            Ok(ticket) => ticket,
            Err(e) => {
                debug!(record_id = record.id, error = %e, "reservation failed");
                return self.fail(task_id, &tx, e);
            }
        };

        let bytes = match self.ctx.serializer.serialize(&record, hints) {
            Ok(bytes) if bytes.len() <= u32::MAX as usize => bytes,
            Ok(bytes) => {
                let err = StorageError::Serialization(format!(
                    "record {} serialized to {} bytes",
                    record.id,
                    bytes.len()
                ));
                return self.fail(task_id, &tx, err);
            }
            Err(e) => {
                warn!(record_id = record.id, error = %e, "serialization failed");
                return self.fail(task_id, &tx, e);
            }
        };

        let pool = &self.ctx.buffer_pool;
        let mut buffers = match pool.acquire_many(
            pool.buffers_for(bytes.len()),
            self.ctx.config.buffer_acquire_timeout(),
        ) {
            Ok(buffers) => buffers,
            Err(e) => return self.fail(task_id, &tx, e),
        };
        let mut rest = bytes.as_slice();
        for buffer in buffers.iter_mut() {
            let taken = buffer.fill_from(rest);
            rest = &rest[taken..];
        }

        let path = layout.data_path(ticket.file_key);
        if self.opened_paths.insert(path.clone(), ()).is_none() {
            self.ctx.channel_io.acquire(&path);
        }

        let inner = Arc::clone(self);
        let file_key = ticket.file_key;
        self.ctx.channel_io.write(
            &path,
            buffers,
            Box::new(move |result: Result<IoCompletion>| {
                let outcome = match result {
                    Ok(completion) => {
                        let descriptor = StorageDescriptor::new(
                            file_key,
                            completion.offset,
                            completion.length as u32,
                        );
                        inner
                            .handler
                            .write_successful(task_id, descriptor)
                            .map(|_| descriptor)
                    }
                    Err(e) => {
                        inner.handler.write_failed(task_id);
                        Err(e)
                    }
                };
                inner.complete(&tx, outcome);
            }),
        );
    }
}

pub struct StorageWriter {
    inner: Arc<WriterInner>,
    workers: WorkerPool,
}

impl StorageWriter {
    pub fn new(ctx: Arc<EngineContext>, tree: Arc<IndexingTree>) -> Result<Self> {
        let workers = WorkerPool::new("telestore-write", ctx.config.write_threads)?;
        Ok(Self {
            inner: Arc::new(WriterInner {
                ctx,
                handler: Arc::new(IndexingTreeHandler::new(tree)),
                storage_id: Uuid::new_v4(),
                state: AtomicU8::new(STATE_IDLE),
                layout: RwLock::new(None),
                opened_paths: DashMap::new(),
                arrived: AtomicU64::new(0),
                finished: AtomicU64::new(0),
                status: Mutex::new(StatusWindow {
                    arrived: 0,
                    finished: 0,
                    status: WritingStatus::Good,
                }),
            }),
            workers,
        })
    }

    /// Create the storage directory and start accepting writes
    pub fn prepare_for_write(&self, dir: &Path) -> Result<()> {
        let layout = StorageLayout::new(dir);
        layout.create_dirs()?;
        *self.inner.layout.write() = Some(layout);

        self.inner
            .state
            .compare_exchange(STATE_IDLE, STATE_WRITING, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| StorageError::Config("storage writer was already prepared".into()))?;
        info!(storage_id = %self.inner.storage_id, dir = ?dir, "storage writer prepared");
        Ok(())
    }

    pub fn storage_id(&self) -> Uuid {
        self.inner.storage_id
    }

    pub fn is_writing(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst) == STATE_WRITING
    }

    pub fn layout(&self) -> Option<StorageLayout> {
        self.inner.layout.read().clone()
    }

    pub fn tree(&self) -> &Arc<IndexingTree> {
        self.inner.handler.tree()
    }

    pub fn handler(&self) -> &Arc<IndexingTreeHandler> {
        &self.inner.handler
    }

    pub fn stats(&self) -> HandlerStats {
        self.inner.handler.stats()
    }

    /// Queue one record for writing
    pub fn write(&self, record: TelemetryRecord, hints: SerializationHints) -> WriteFuture {
        if !self.is_writing() {
            return WriteFuture::completed(Err(StorageError::NotWriting));
        }

        let task_id = self.inner.handler.register_task();
        self.inner.arrived.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = bounded(1);
        let future = WriteFuture::pending(rx, task_id, Arc::clone(&self.inner.handler));

        let inner = Arc::clone(&self.inner);
        let fallback_tx = tx.clone();
        if let Err(e) = self
            .workers
            .execute(move || inner.run_write(task_id, record, hints, tx))
        {
            self.inner.fail(task_id, &fallback_tx, e);
        }
        future
    }

    /// Run `records` through the processor chain, then flush every processor
    pub fn process(
        &self,
        records: &[TelemetryRecord],
        processors: &[Arc<dyn DataProcessor>],
    ) -> Vec<WriteFuture> {
        let mut futures = Vec::new();
        for record in records {
            for processor in processors {
                if processor.can_be_processed(record) {
                    futures.extend(processor.process(record, self));
                }
            }
        }
        for processor in processors {
            futures.extend(processor.flush(self));
        }
        futures
    }

    /// [`StorageWriter::process`] and wait for every resulting write
    pub fn process_synchronously(
        &self,
        records: &[TelemetryRecord],
        processors: &[Arc<dyn DataProcessor>],
    ) -> Vec<Result<StorageDescriptor>> {
        self.process(records, processors)
            .into_iter()
            .map(WriteFuture::wait)
            .collect()
    }

    /// Recompute the writing status over the period since the last check
    pub fn check_writing_status(&self) -> WritingStatus {
        let arrived = self.inner.arrived.load(Ordering::Relaxed);
        let finished = self.inner.finished.load(Ordering::Relaxed);
        let mut window = self.inner.status.lock();

        window.status = if self.is_writing() {
            WritingStatus::from_rates(arrived - window.arrived, finished - window.finished)
        } else {
            WritingStatus::Good
        };
        window.arrived = arrived;
        window.finished = finished;
        window.status
    }

    pub fn writing_status(&self) -> WritingStatus {
        self.inner.status.lock().status
    }

    /// Wait for pending writes, save the index and release channels
    pub fn close_storage_writer(&self) -> Result<()> {
        self.shutdown(true)
    }

    /// Fail queued writes, wait for in-flight ones and release channels
    /// without saving the index.
    pub fn cancel(&self) -> Result<()> {
        self.shutdown(false)
    }

    fn shutdown(&self, finalize: bool) -> Result<()> {
        let next = if finalize {
            STATE_FINALIZING
        } else {
            STATE_CANCELLED
        };
        if self
            .inner
            .state
            .compare_exchange(STATE_WRITING, next, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        // Drains the queue; cancelled tasks fail fast
        self.workers.shutdown();
        self.inner.handler.wait_idle(None);

        let result = match (finalize, self.layout()) {
            (true, Some(layout)) => {
                let index_path = layout.index_path(&self.inner.storage_id);
                self.inner.handler.finish(&index_path, None).map(|entries| {
                    info!(entries, path = ?index_path, "storage writer finalized");
                })
            }
            _ => {
                info!(storage_id = %self.inner.storage_id, "storage writer cancelled");
                Ok(())
            }
        };

        for entry in self.inner.opened_paths.iter() {
            self.inner.ctx.channel_io.release(entry.key());
        }
        self.inner.opened_paths.clear();
        self.inner.state.store(STATE_CLOSED, Ordering::SeqCst);
        result
    }
}

impl RecordWriter for StorageWriter {
    fn write(&self, record: TelemetryRecord, hints: SerializationHints) -> WriteFuture {
        StorageWriter::write(self, record, hints)
    }
}

impl Drop for StorageWriter {
    fn drop(&mut self) {
        if self.is_writing() {
            if let Err(e) = self.cancel() {
                warn!(error = %e, "failed to cancel storage writer on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telestore_core::EngineConfig;
    use telestore_index::IndexQuery;

    fn writer() -> (tempfile::TempDir, StorageWriter) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(EngineContext::new(EngineConfig::for_testing()).unwrap());
        let writer = StorageWriter::new(ctx, Arc::new(IndexingTree::new())).unwrap();
        writer.prepare_for_write(dir.path()).unwrap();
        (dir, writer)
    }

    #[test]
    fn test_writing_status_thresholds() {
        assert_eq!(WritingStatus::from_rates(0, 0), WritingStatus::Good);
        assert_eq!(WritingStatus::from_rates(10, 12), WritingStatus::Good);
        assert_eq!(WritingStatus::from_rates(12, 10), WritingStatus::Medium);
        assert_eq!(WritingStatus::from_rates(20, 10), WritingStatus::High);
        assert_eq!(WritingStatus::from_rates(31, 10), WritingStatus::Critical);
        assert_eq!(WritingStatus::from_rates(5, 0), WritingStatus::Critical);
    }

    #[test]
    fn test_write_commits_descriptor() {
        let (dir, writer) = writer();
        let record = TelemetryRecord::timer(1, 1, 2, 3, 100, 5.0);
        let descriptor = writer
            .write(record.clone(), SerializationHints::default())
            .wait()
            .unwrap();

        let entries = writer.tree().query(&IndexQuery::new().platform_id(1));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].descriptor, descriptor);

        let bytes = std::fs::read(StorageLayout::new(dir.path()).channel_path(&descriptor)).unwrap();
        assert_eq!(bytes.len() as u64, descriptor.end());
    }

    #[test]
    fn test_duplicate_id_fails_without_commit() {
        let (_dir, writer) = writer();
        let record = TelemetryRecord::timer(7, 1, 1, 1, 1, 1.0);
        writer.write(record.clone(), SerializationHints::default()).wait().unwrap();

        let err = writer
            .write(record, SerializationHints::default())
            .wait()
            .unwrap_err();
        assert!(matches!(err, StorageError::Reservation(_)));
        assert_eq!(writer.tree().len(), 1);
        assert_eq!(writer.stats().failed, 1);
    }

    #[test]
    fn test_not_prepared_rejects() {
        let ctx = Arc::new(EngineContext::new(EngineConfig::for_testing()).unwrap());
        let writer = StorageWriter::new(ctx, Arc::new(IndexingTree::new())).unwrap();
        let err = writer
            .write(TelemetryRecord::timer(1, 1, 1, 1, 1, 1.0), SerializationHints::default())
            .wait()
            .unwrap_err();
        assert!(matches!(err, StorageError::NotWriting));
    }

    #[test]
    fn test_large_record_spans_buffers() {
        let (_dir, writer) = writer();
        let mut record = TelemetryRecord::new(
            1,
            1,
            1,
            1,
            1,
            telestore_core::RecordPayload::Sql(telestore_core::SqlPayload {
                stats: telestore_core::TimerStats::single(1.0),
                sql: "x".repeat(10_000),
                prepared: false,
                parameters: vec![],
            }),
        );
        record.invocation_parent_ids.insert(3);
        let descriptor = writer.write(record, SerializationHints::default()).wait().unwrap();
        assert!(descriptor.length as usize > EngineConfig::for_testing().buffer_capacity);
    }

    #[test]
    fn test_close_saves_index_and_rejects_writes() {
        let (dir, writer) = writer();
        let futures: Vec<_> = (1..=20u64)
            .map(|id| writer.write(TelemetryRecord::timer(id, 1, 1, id % 3, id, 1.0), SerializationHints::default()))
            .collect();
        writer.close_storage_writer().unwrap();
        for future in futures {
            assert!(future.wait().is_ok());
        }

        let index_path = StorageLayout::new(dir.path()).index_path(&writer.storage_id());
        assert_eq!(IndexingTree::load_snapshot(&index_path).unwrap().len(), 20);
        assert!(matches!(
            writer.write(TelemetryRecord::timer(99, 1, 1, 1, 1, 1.0), SerializationHints::default()).wait(),
            Err(StorageError::NotWriting)
        ));
        // Second close is a no-op
        assert!(writer.close_storage_writer().is_ok());
    }

    #[test]
    fn test_status_check_period() {
        let (_dir, writer) = writer();
        for id in 1..=5u64 {
            writer
                .write(TelemetryRecord::timer(id, 1, 1, 1, id, 1.0), SerializationHints::default())
                .wait()
                .unwrap();
        }
        assert_eq!(writer.check_writing_status(), WritingStatus::Good);
        assert_eq!(writer.writing_status(), WritingStatus::Good);
    }
}
