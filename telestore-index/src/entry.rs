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

//! Index entries - descriptor plus the minimal attributes needed to filter,
//! order and aggregate without touching the data files.

use serde::{Deserialize, Serialize};
use telestore_core::{KeyPath, RecordKind, StorageDescriptor, TelemetryRecord, TimerStats};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: u64,
    pub platform_id: u64,
    pub sensor_type_id: u64,
    pub method_id: u64,
    pub kind: RecordKind,
    pub timestamp_ms: u64,
    /// Measurements represented by this entry (>1 for aggregates)
    pub count: u64,
    /// Present for timer, HTTP timer and SQL records
    pub stats: Option<TimerStats>,
    pub sql_hash: Option<u64>,
    pub descriptor: StorageDescriptor,
}

impl IndexEntry {
    pub fn from_record(record: &TelemetryRecord, descriptor: StorageDescriptor) -> Self {
        let stats = record.timer_stats().copied();
        Self {
            id: record.id,
            platform_id: record.platform_id,
            sensor_type_id: record.sensor_type_id,
            method_id: record.method_id,
            kind: record.kind(),
            timestamp_ms: record.timestamp_ms,
            count: stats.map(|s| s.count.max(1)).unwrap_or(1),
            stats,
            sql_hash: record.sql_hash(),
            descriptor,
        }
    }

    pub fn key_path(&self) -> KeyPath {
        KeyPath {
            platform_id: self.platform_id,
            sensor_type_id: self.sensor_type_id,
            method_id: self.method_id,
        }
    }

    /// Total duration, 0 for kinds without timing
    pub fn duration(&self) -> f64 {
        self.stats.map(|s| s.duration).unwrap_or(0.0)
    }
}
