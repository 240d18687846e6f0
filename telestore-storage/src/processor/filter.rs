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

//! Pass-through filters

use super::{flush_chain, forward, DataProcessor};
use crate::writer::{RecordWriter, WriteFuture};
use std::collections::HashSet;
use std::sync::Arc;
use telestore_core::TelemetryRecord;

/// Forwards records whose timestamp lies in `[from, to]`
pub struct TimeFrameProcessor {
    from: u64,
    to: u64,
    chained: Vec<Arc<dyn DataProcessor>>,
}

impl TimeFrameProcessor {
    pub fn new(from: u64, to: u64, chained: Vec<Arc<dyn DataProcessor>>) -> Self {
        Self { from, to, chained }
    }
}

impl DataProcessor for TimeFrameProcessor {
    fn can_be_processed(&self, record: &TelemetryRecord) -> bool {
        (self.from..=self.to).contains(&record.timestamp_ms)
    }

    fn process(&self, record: &TelemetryRecord, writer: &dyn RecordWriter) -> Vec<WriteFuture> {
        forward(&self.chained, record, writer)
    }

    fn flush(&self, writer: &dyn RecordWriter) -> Vec<WriteFuture> {
        flush_chain(&self.chained, writer)
    }
}

/// Forwards records produced by one of the given platforms
pub struct AgentFilterProcessor {
    platform_ids: HashSet<u64>,
    chained: Vec<Arc<dyn DataProcessor>>,
}

impl AgentFilterProcessor {
    pub fn new(
        platform_ids: impl IntoIterator<Item = u64>,
        chained: Vec<Arc<dyn DataProcessor>>,
    ) -> Self {
        Self {
            platform_ids: platform_ids.into_iter().collect(),
            chained,
        }
    }
}

impl DataProcessor for AgentFilterProcessor {
    fn can_be_processed(&self, record: &TelemetryRecord) -> bool {
        self.platform_ids.contains(&record.platform_id)
    }

    fn process(&self, record: &TelemetryRecord, writer: &dyn RecordWriter) -> Vec<WriteFuture> {
        forward(&self.chained, record, writer)
    }

    fn flush(&self, writer: &dyn RecordWriter) -> Vec<WriteFuture> {
        flush_chain(&self.chained, writer)
    }
}
