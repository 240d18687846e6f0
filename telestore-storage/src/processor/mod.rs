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

//! Data processor pipeline
//!
//! Records enter an explicit, ordered list of processors. Each processor
//! decides whether it handles a record and forwards zero, one or many
//! derived records to its own chained processors, or, at the end of a chain,
//! to the [`RecordWriter`].
//!
//! ```text
//! records ─► [TimeFrame] ─► [AgentFilter] ─► [Extractor] ─► [Aggregator] ─► writer
//!                                                      └──► [Saver] ──────► writer
//! ```
//!
//! Stateful processors (the aggregator) hold open state until `flush`.

mod aggregating;
mod extractor;
mod filter;
mod saver;

pub use aggregating::AggregatorProcessor;
pub use extractor::{ExtractorProcessor, InvocationClonerProcessor};
pub use filter::{AgentFilterProcessor, TimeFrameProcessor};
pub use saver::SaverProcessor;

use crate::writer::{RecordWriter, WriteFuture};
use std::sync::Arc;
use telestore_core::TelemetryRecord;

pub trait DataProcessor: Send + Sync {
    fn can_be_processed(&self, record: &TelemetryRecord) -> bool;

    /// Handle one record; returns the futures of every write it caused
    fn process(&self, record: &TelemetryRecord, writer: &dyn RecordWriter) -> Vec<WriteFuture>;

    /// Emit any buffered state
    fn flush(&self, _writer: &dyn RecordWriter) -> Vec<WriteFuture> {
        Vec::new()
    }
}

/// Hand `record` to every chained processor that accepts it
pub(crate) fn forward(
    chained: &[Arc<dyn DataProcessor>],
    record: &TelemetryRecord,
    writer: &dyn RecordWriter,
) -> Vec<WriteFuture> {
    chained
        .iter()
        .filter(|processor| processor.can_be_processed(record))
        .flat_map(|processor| processor.process(record, writer))
        .collect()
}

pub(crate) fn flush_chain(
    chained: &[Arc<dyn DataProcessor>],
    writer: &dyn RecordWriter,
) -> Vec<WriteFuture> {
    chained
        .iter()
        .flat_map(|processor| processor.flush(writer))
        .collect()
}
