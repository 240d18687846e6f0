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

//! Engine facade
//!
//! [`Engine`] owns one writable storage: the shared [`EngineContext`], the
//! indexing tree, the storage writer and a housekeeping thread that closes
//! idle channels and samples the writing status. [`StorageReader`] opens a
//! finalized storage for queries only.

use crate::context::EngineContext;
use crate::layout::StorageLayout;
use crate::processor::DataProcessor;
use crate::stream::StorageInputStream;
use crate::writer::{StorageWriter, WriteFuture, WritingStatus};
use crossbeam_channel::{bounded, select, tick, Sender};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use telestore_core::{
    EngineConfig, Result, StorageDescriptor, StorageError, TelemetryRecord,
};
use telestore_index::{IndexEntry, IndexQuery, IndexingTree, ParallelConfig, ParallelQueryExecutor};
use tracing::{info, warn};
use uuid::Uuid;

/// Period of idle-channel sweeps and writing status checks
pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(5);

/// Read the record behind every entry, in entry order
fn read_entries(
    ctx: &EngineContext,
    layout: &StorageLayout,
    entries: &[IndexEntry],
) -> Result<Vec<TelemetryRecord>> {
    entries
        .iter()
        .map(|entry| {
            let mut stream = StorageInputStream::open(ctx, layout, &[entry.descriptor])?;
            let bytes = stream.read_all()?;
            ctx.serializer.deserialize(&bytes)
        })
        .collect()
}

fn executor_for(config: &EngineConfig) -> Result<ParallelQueryExecutor> {
    ParallelQueryExecutor::new(ParallelConfig {
        num_threads: config.parallel_query_threads,
        min_branches: config.parallel_query_min_branches,
    })
}

struct Housekeeper {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Housekeeper {
    fn start(ctx: Arc<EngineContext>, writer: Arc<StorageWriter>, interval: Duration) -> Result<Self> {
        let (stop, stopped) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("telestore-housekeeper".to_string())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(stopped) -> _ => break,
                        recv(ticker) -> _ => {
                            ctx.channel_io.close_idle();
                            match writer.check_writing_status() {
                                WritingStatus::Good => {}
                                status => warn!(?status, "storage writer falling behind"),
                            }
                        }
                    }
                }
            })?;
        Ok(Self { stop, handle })
    }

    fn stop(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            warn!("housekeeper thread panicked");
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct Engine {
    ctx: Arc<EngineContext>,
    layout: StorageLayout,
    writer: Arc<StorageWriter>,
    executor: ParallelQueryExecutor,
    housekeeper: Mutex<Option<Housekeeper>>,
}

impl Engine {
    /// Open a new writable storage in `dir`
    pub fn open(config: EngineConfig, dir: impl AsRef<Path>) -> Result<Self> {
        let ctx = Arc::new(EngineContext::new(config)?);
        Self::with_context(ctx, dir)
    }

    /// Open with an already built context (custom channel I/O or codec)
    pub fn with_context(ctx: Arc<EngineContext>, dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let tree = Arc::new(IndexingTree::new());
        let writer = Arc::new(StorageWriter::new(Arc::clone(&ctx), tree)?);
        writer.prepare_for_write(dir)?;

        let executor = executor_for(&ctx.config)?;
        let housekeeper = Housekeeper::start(
            Arc::clone(&ctx),
            Arc::clone(&writer),
            HOUSEKEEPING_INTERVAL.min(ctx.config.channel_idle_close()),
        )?;

        info!(storage_id = %writer.storage_id(), dir = ?dir, "engine opened");
        Ok(Self {
            layout: StorageLayout::new(dir),
            ctx,
            writer,
            executor,
            housekeeper: Mutex::new(Some(housekeeper)),
        })
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn writer(&self) -> &StorageWriter {
        &self.writer
    }

    pub fn tree(&self) -> &Arc<IndexingTree> {
        self.writer.tree()
    }

    pub fn storage_id(&self) -> Uuid {
        self.writer.storage_id()
    }

    pub fn writing_status(&self) -> WritingStatus {
        self.writer.writing_status()
    }

    /// Feed records through the processor list
    pub fn ingest(
        &self,
        records: &[TelemetryRecord],
        processors: &[Arc<dyn DataProcessor>],
    ) -> Vec<WriteFuture> {
        self.writer.process(records, processors)
    }

    pub fn ingest_synchronously(
        &self,
        records: &[TelemetryRecord],
        processors: &[Arc<dyn DataProcessor>],
    ) -> Vec<Result<StorageDescriptor>> {
        self.writer.process_synchronously(records, processors)
    }

    pub fn query(&self, query: &IndexQuery) -> Vec<IndexEntry> {
        self.tree().query(query)
    }

    pub fn query_parallel(&self, query: &IndexQuery) -> Vec<IndexEntry> {
        self.tree().query_parallel(query, &self.executor)
    }

    pub fn open_stream(&self, descriptors: &[StorageDescriptor]) -> Result<StorageInputStream> {
        StorageInputStream::open(&self.ctx, &self.layout, descriptors)
    }

    /// Deserialize the records behind query results
    ///
    /// An aggregated entry resolves to the record its descriptor points at.
    pub fn read_records(&self, entries: &[IndexEntry]) -> Result<Vec<TelemetryRecord>> {
        read_entries(&self.ctx, &self.layout, entries)
    }

    /// Finalize the storage: wait for writes, save the index, stop housekeeping
    pub fn close(&self) -> Result<()> {
        if let Some(housekeeper) = self.housekeeper.lock().take() {
            housekeeper.stop();
        }
        self.writer.close_storage_writer()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close engine");
        }
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Query-only view of a finalized storage directory
pub struct StorageReader {
    ctx: Arc<EngineContext>,
    layout: StorageLayout,
    tree: IndexingTree,
    executor: ParallelQueryExecutor,
}

impl StorageReader {
    /// Load the newest index snapshot in `dir`
    pub fn open(ctx: Arc<EngineContext>, dir: impl AsRef<Path>) -> Result<Self> {
        let layout = StorageLayout::new(dir.as_ref());
        let index_path = layout.index_files()?.into_iter().next().ok_or_else(|| {
            StorageError::Config(format!("no index snapshot in {:?}", layout.root()))
        })?;
        let tree = IndexingTree::load_snapshot(&index_path)?;
        let executor = executor_for(&ctx.config)?;

        info!(path = ?index_path, entries = tree.len(), "storage reader opened");
        Ok(Self {
            ctx,
            layout,
            tree,
            executor,
        })
    }

    pub fn tree(&self) -> &IndexingTree {
        &self.tree
    }

    pub fn query(&self, query: &IndexQuery) -> Vec<IndexEntry> {
        self.tree.query(query)
    }

    pub fn query_parallel(&self, query: &IndexQuery) -> Vec<IndexEntry> {
        self.tree.query_parallel(query, &self.executor)
    }

    pub fn open_stream(&self, descriptors: &[StorageDescriptor]) -> Result<StorageInputStream> {
        StorageInputStream::open(&self.ctx, &self.layout, descriptors)
    }

    pub fn read_records(&self, entries: &[IndexEntry]) -> Result<Vec<TelemetryRecord>> {
        read_entries(&self.ctx, &self.layout, entries)
    }
}
