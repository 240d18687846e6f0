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

//! Streaming aggregation before persistence
//!
//! Open aggregates live in a map bounded by `max_open_aggregates`. Overflow
//! flushes the aggregate with the oldest start; a record arriving more than
//! `window_ms` after its aggregate started flushes that aggregate and opens a
//! new one.
//!
//! Flushed aggregates take fresh ids from [`AGGREGATE_ID_BASE`] upward.

use super::DataProcessor;
use crate::writer::{RecordWriter, WriteFuture};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use telestore_core::{
    AggregationConfig, RecordKind, SerializationHints, TelemetryRecord, AGGREGATE_ID_BASE,
};
use telestore_index::{AggregationKey, Aggregator};
use tracing::debug;

static NEXT_AGGREGATE_ID: AtomicU64 = AtomicU64::new(AGGREGATE_ID_BASE);

struct OpenAggregate {
    order: (u64, u64),
    aggregate: TelemetryRecord,
}

#[derive(Default)]
struct AggregationState {
    open: HashMap<AggregationKey, OpenAggregate>,
    /// (start timestamp, arrival sequence) → key, oldest first
    by_start: BTreeMap<(u64, u64), AggregationKey>,
    next_seq: u64,
}

impl AggregationState {
    fn take(&mut self, key: &AggregationKey) -> Option<TelemetryRecord> {
        let open = self.open.remove(key)?;
        self.by_start.remove(&open.order);
        Some(open.aggregate)
    }

    fn take_oldest(&mut self) -> Option<TelemetryRecord> {
        let (_, key) = self.by_start.pop_first()?;
        self.open.remove(&key).map(|open| open.aggregate)
    }
}

pub struct AggregatorProcessor {
    aggregator: Arc<dyn Aggregator<TelemetryRecord>>,
    kinds: HashSet<RecordKind>,
    max_open_aggregates: usize,
    window_ms: Option<u64>,
    write_invocation_affiliation: bool,
    state: Mutex<AggregationState>,
}

impl AggregatorProcessor {
    /// Aggregate records of `kinds` with the bounds from `config`
    pub fn new(
        aggregator: Arc<dyn Aggregator<TelemetryRecord>>,
        kinds: impl IntoIterator<Item = RecordKind>,
        config: &AggregationConfig,
    ) -> Self {
        Self {
            aggregator,
            kinds: kinds.into_iter().collect(),
            max_open_aggregates: config.max_open_aggregates.max(1),
            window_ms: config.window_ms,
            write_invocation_affiliation: false,
            state: Mutex::new(AggregationState::default()),
        }
    }

    pub fn with_invocation_affiliation(mut self, write: bool) -> Self {
        self.write_invocation_affiliation = write;
        self
    }

    pub fn open_aggregates(&self) -> usize {
        self.state.lock().open.len()
    }

    fn hints(&self) -> SerializationHints {
        SerializationHints {
            write_invocation_affiliation: self.write_invocation_affiliation,
        }
    }

    fn write_all(&self, aggregates: Vec<TelemetryRecord>, writer: &dyn RecordWriter) -> Vec<WriteFuture> {
        let hints = self.hints();
        aggregates
            .into_iter()
            .map(|mut aggregate| {
                aggregate.id = NEXT_AGGREGATE_ID.fetch_add(1, Ordering::Relaxed);
                writer.write(aggregate, hints)
            })
            .collect()
    }
}

impl DataProcessor for AggregatorProcessor {
    fn can_be_processed(&self, record: &TelemetryRecord) -> bool {
        self.kinds.contains(&record.kind())
    }

    fn process(&self, record: &TelemetryRecord, writer: &dyn RecordWriter) -> Vec<WriteFuture> {
        let key = self.aggregator.aggregation_key(record);
        let mut flushed = Vec::new();
        {
            let mut state = self.state.lock();

            let expired = match (state.open.get(&key), self.window_ms) {
                (Some(open), Some(window)) => record.timestamp_ms.saturating_sub(open.order.0) > window,
                _ => false,
            };
            if expired {
                flushed.extend(state.take(&key));
            }

            if !state.open.contains_key(&key) {
                while state.open.len() >= self.max_open_aggregates {
                    match state.take_oldest() {
                        Some(oldest) => flushed.push(oldest),
                        None => break,
                    }
                }
                let order = (record.timestamp_ms, state.next_seq);
                state.next_seq += 1;
                state.by_start.insert(order, key);
                state.open.insert(
                    key,
                    OpenAggregate {
                        order,
                        aggregate: self.aggregator.clone_aggregate(record),
                    },
                );
            }

            if let Some(open) = state.open.get_mut(&key) {
                self.aggregator.combine(&mut open.aggregate, record);
            }
        }

        if !flushed.is_empty() {
            debug!(count = flushed.len(), "flushing aggregates");
        }
        self.write_all(flushed, writer)
    }

    fn flush(&self, writer: &dyn RecordWriter) -> Vec<WriteFuture> {
        let aggregates: Vec<TelemetryRecord> = {
            let mut state = self.state.lock();
            let mut aggregates = Vec::with_capacity(state.open.len());
            while let Some(aggregate) = state.take_oldest() {
                aggregates.push(aggregate);
            }
            aggregates
        };
        self.write_all(aggregates, writer)
    }
}
