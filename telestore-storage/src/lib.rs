// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Telestore Storage Layer
//!
//! Append-only persistence for telemetry records.
//!
//! ## Architecture
//!
//! ```text
//! producer ─► processors ─► StorageWriter ─► BufferPool ─► ChannelManager ─► <file_key>.tsd
//!                                │                                  ▲
//!                                ▼                                  │
//!                          IndexingTree ◄── query ── caller ─► StorageInputStream
//! ```
//!
//! - **Buffer pool**: fixed set of byte buffers; acquiring blocks when all
//!   are in flight, which throttles producers to disk speed
//! - **Channel I/O**: one serialized queue per data file, write offsets
//!   fixed at enqueue time
//! - **Writer**: reserve → serialize → write → commit, one task per record
//! - **Input stream**: ordered read-ahead over a descriptor list
//! - **Processors**: filtering, extraction and aggregation before writing
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use telestore_core::{EngineConfig, RecordKind};
//! use telestore_index::IndexQuery;
//! use telestore_storage::{DataProcessor, Engine, SaverProcessor};
//!
//! let engine = Engine::open(EngineConfig::default(), "/var/lib/telestore/s1")?;
//! let saver: Arc<dyn DataProcessor> = Arc::new(SaverProcessor::new(RecordKind::ALL));
//! engine.ingest_synchronously(&records, &[saver]);
//! let latest = engine.query(&IndexQuery::new().platform_id(1).limit(10));
//! let records = engine.read_records(&latest)?;
//! engine.close()?;
//! ```

pub mod buffer;
pub mod channel;
pub mod context;
pub mod engine;
pub mod executor;
pub mod handler;
pub mod layout;
pub mod processor;
pub mod stream;
pub mod writer;

pub use buffer::{BufferPool, PooledBuffer};
pub use channel::{ChannelIo, ChannelManager, IoCompletion, ReadCallback, WriteCallback};
pub use context::EngineContext;
pub use engine::{Engine, StorageReader, HOUSEKEEPING_INTERVAL};
pub use executor::WorkerPool;
pub use handler::{HandlerStats, IndexingTreeHandler, WriteTicket};
pub use layout::{StorageLayout, DATA_FILE_EXTENSION, INDEX_FILE_EXTENSION};
pub use processor::{
    AgentFilterProcessor, AggregatorProcessor, DataProcessor, ExtractorProcessor,
    InvocationClonerProcessor, SaverProcessor, TimeFrameProcessor,
};
pub use stream::StorageInputStream;
pub use writer::{RecordWriter, StorageWriter, WriteFuture, WritingStatus};
