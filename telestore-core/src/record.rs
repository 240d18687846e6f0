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

//! Telemetry record model
//!
//! A [`TelemetryRecord`] is one measurement produced by an instrumented
//! agent. Every record carries the identity attributes used for routing in
//! the indexing tree (platform, sensor type, method) and a tagged payload.
//!
//! ## Payload kinds
//! ```text
//! RecordPayload
//! ├── Timer        (TimerStats)
//! ├── HttpTimer    (TimerStats + uri/method/status)
//! ├── Sql          (TimerStats + statement/parameters)
//! ├── Exception    (throwable id, type, lifecycle event)
//! ├── RemoteCall   (correlation id, direction)
//! └── Invocation   (duration + owned nested records)
//! ```
//!
//! Records are immutable once handed to the storage writer; processors that
//! need a different shape build a new record.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::hash::Hasher;
use twox_hash::XxHash64;

// ============================================================================
// Identity
// ============================================================================

/// Discriminator of [`RecordPayload`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordKind {
    Timer,
    HttpTimer,
    Sql,
    Exception,
    RemoteCall,
    Invocation,
}

impl RecordKind {
    pub const ALL: [RecordKind; 6] = [
        RecordKind::Timer,
        RecordKind::HttpTimer,
        RecordKind::Sql,
        RecordKind::Exception,
        RecordKind::RemoteCall,
        RecordKind::Invocation,
    ];

    /// Kinds that carry aggregatable [`TimerStats`]
    pub fn is_timed(&self) -> bool {
        matches!(self, RecordKind::Timer | RecordKind::HttpTimer | RecordKind::Sql)
    }
}

/// Routing path of a record in the indexing tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyPath {
    pub platform_id: u64,
    pub sensor_type_id: u64,
    pub method_id: u64,
}

// ============================================================================
// Payloads
// ============================================================================

/// Aggregatable duration statistics (milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimerStats {
    pub count: u64,
    pub duration: f64,
    pub min: f64,
    pub max: f64,
    pub cpu_duration: f64,
}

impl TimerStats {
    /// Stats of a single measurement
    pub fn single(duration: f64) -> Self {
        Self {
            count: 1,
            duration,
            min: duration,
            max: duration,
            cpu_duration: 0.0,
        }
    }

    /// Neutral element for [`TimerStats::merge`]
    pub fn empty() -> Self {
        Self {
            count: 0,
            duration: 0.0,
            min: f64::MAX,
            max: f64::MIN,
            cpu_duration: 0.0,
        }
    }

    pub fn with_cpu(mut self, cpu_duration: f64) -> Self {
        self.cpu_duration = cpu_duration;
        self
    }

    pub fn merge(&mut self, other: &TimerStats) {
        if other.count == 0 {
            return;
        }
        self.count += other.count;
        self.duration += other.duration;
        self.cpu_duration += other.cpu_duration;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.duration / self.count as f64
        }
    }
}

impl Default for TimerStats {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpTimerPayload {
    pub stats: TimerStats,
    pub uri: String,
    pub http_method: String,
    pub status: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlPayload {
    pub stats: TimerStats,
    pub sql: String,
    pub prepared: bool,
    pub parameters: Vec<String>,
}

impl SqlPayload {
    /// Stable hash of the statement text, used as aggregation key
    pub fn statement_hash(&self) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(self.sql.as_bytes());
        hasher.finish()
    }
}

/// Lifecycle stage at which an exception was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExceptionEvent {
    Created,
    Passed,
    Handled,
    Rethrown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionPayload {
    pub throwable_id: u64,
    pub throwable_type: String,
    pub message: Option<String>,
    pub event: ExceptionEvent,
    pub cause: Option<String>,
}

/// Correlation record for a call leaving or entering a platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCallPayload {
    pub identification: u64,
    pub calling: bool,
    pub remote_platform_ident: u64,
    pub url: Option<String>,
}

/// Composite trace node owning its nested records
///
/// Nested `Invocation` children are nested call-tree nodes; every other child
/// is a measurement attached to this node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationPayload {
    pub duration: f64,
    pub children: Vec<TelemetryRecord>,
}

impl InvocationPayload {
    /// Number of records in the whole subtree, excluding this node
    pub fn nested_count(&self) -> usize {
        self.children
            .iter()
            .map(|child| match &child.payload {
                RecordPayload::Invocation(inv) => 1 + inv.nested_count(),
                _ => 1,
            })
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordPayload {
    Timer(TimerStats),
    HttpTimer(HttpTimerPayload),
    Sql(SqlPayload),
    Exception(ExceptionPayload),
    RemoteCall(RemoteCallPayload),
    Invocation(InvocationPayload),
}

// ============================================================================
// Record
// ============================================================================

/// First id handed to persisted aggregates; agent records stay below it
pub const AGGREGATE_ID_BASE: u64 = 1 << 62;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Non-zero identifier, unique within a storage
    pub id: u64,
    pub platform_id: u64,
    pub sensor_type_id: u64,
    pub method_id: u64,
    /// Milliseconds since epoch
    pub timestamp_ms: u64,
    /// Ids of the invocations that contain this record
    pub invocation_parent_ids: BTreeSet<u64>,
    pub payload: RecordPayload,
}

impl TelemetryRecord {
    pub fn new(
        id: u64,
        platform_id: u64,
        sensor_type_id: u64,
        method_id: u64,
        timestamp_ms: u64,
        payload: RecordPayload,
    ) -> Self {
        Self {
            id,
            platform_id,
            sensor_type_id,
            method_id,
            timestamp_ms,
            invocation_parent_ids: BTreeSet::new(),
            payload,
        }
    }

    /// Convenience constructor for a single timer measurement
    pub fn timer(
        id: u64,
        platform_id: u64,
        sensor_type_id: u64,
        method_id: u64,
        timestamp_ms: u64,
        duration: f64,
    ) -> Self {
        Self::new(
            id,
            platform_id,
            sensor_type_id,
            method_id,
            timestamp_ms,
            RecordPayload::Timer(TimerStats::single(duration)),
        )
    }

    pub fn with_parent(mut self, invocation_id: u64) -> Self {
        self.invocation_parent_ids.insert(invocation_id);
        self
    }

    pub fn kind(&self) -> RecordKind {
        match &self.payload {
            RecordPayload::Timer(_) => RecordKind::Timer,
            RecordPayload::HttpTimer(_) => RecordKind::HttpTimer,
            RecordPayload::Sql(_) => RecordKind::Sql,
            RecordPayload::Exception(_) => RecordKind::Exception,
            RecordPayload::RemoteCall(_) => RecordKind::RemoteCall,
            RecordPayload::Invocation(_) => RecordKind::Invocation,
        }
    }

    pub fn key_path(&self) -> KeyPath {
        KeyPath {
            platform_id: self.platform_id,
            sensor_type_id: self.sensor_type_id,
            method_id: self.method_id,
        }
    }

    pub fn timer_stats(&self) -> Option<&TimerStats> {
        match &self.payload {
            RecordPayload::Timer(stats) => Some(stats),
            RecordPayload::HttpTimer(http) => Some(&http.stats),
            RecordPayload::Sql(sql) => Some(&sql.stats),
            _ => None,
        }
    }

    pub fn timer_stats_mut(&mut self) -> Option<&mut TimerStats> {
        match &mut self.payload {
            RecordPayload::Timer(stats) => Some(stats),
            RecordPayload::HttpTimer(http) => Some(&mut http.stats),
            RecordPayload::Sql(sql) => Some(&mut sql.stats),
            _ => None,
        }
    }

    /// Duration used for index metadata and ordering
    pub fn duration(&self) -> Option<f64> {
        match &self.payload {
            RecordPayload::Invocation(inv) => Some(inv.duration),
            _ => self.timer_stats().map(|s| s.duration),
        }
    }

    pub fn sql_hash(&self) -> Option<u64> {
        match &self.payload {
            RecordPayload::Sql(sql) => Some(sql.statement_hash()),
            _ => None,
        }
    }

    pub fn is_exception_creation(&self) -> bool {
        matches!(
            &self.payload,
            RecordPayload::Exception(ExceptionPayload {
                event: ExceptionEvent::Created,
                ..
            })
        )
    }

    pub fn invocation(&self) -> Option<&InvocationPayload> {
        match &self.payload {
            RecordPayload::Invocation(inv) => Some(inv),
            _ => None,
        }
    }

    /// Copy of this record with the invocation back-references cleared,
    /// recursively for nested records.
    pub fn without_affiliation(&self) -> Self {
        let mut copy = self.clone();
        copy.strip_affiliation();
        copy
    }

    fn strip_affiliation(&mut self) {
        self.invocation_parent_ids.clear();
        if let RecordPayload::Invocation(inv) = &mut self.payload {
            for child in &mut inv.children {
                child.strip_affiliation();
            }
        }
    }
}
