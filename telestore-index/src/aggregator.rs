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

//! Aggregation strategies
//!
//! An [`Aggregator`] is a stateless strategy that groups items by a key and
//! folds each group into one aggregate. The same strategies serve two
//! callers:
//! - the query engine, over [`IndexEntry`] values
//! - the aggregating data processor, over [`TelemetryRecord`] values
//!
//! Folding is `aggregate = clone_aggregate(first); combine(aggregate, x)` for
//! every item `x` of the group, including the first.

use crate::entry::IndexEntry;
use telestore_core::{RecordKind, TelemetryRecord, TimerStats};

/// Grouping key produced by an [`Aggregator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregationKey {
    pub kind: RecordKind,
    pub platform_id: u64,
    pub method_id: u64,
    /// Strategy specific (statement hash for SQL, 0 otherwise)
    pub discriminator: u64,
}

pub trait Aggregator<T>: Send + Sync {
    fn aggregation_key(&self, item: &T) -> AggregationKey;

    /// Empty aggregate shaped like `item`
    fn clone_aggregate(&self, item: &T) -> T;

    fn combine(&self, aggregate: &mut T, item: &T);
}

// ============================================================================
// Shared helpers
// ============================================================================

fn entry_template(item: &IndexEntry) -> IndexEntry {
    let mut aggregate = item.clone();
    aggregate.count = 0;
    aggregate.stats = item.stats.map(|_| TimerStats::empty());
    aggregate
}

fn combine_entries(aggregate: &mut IndexEntry, item: &IndexEntry) {
    aggregate.count += item.count;
    match (&mut aggregate.stats, &item.stats) {
        (Some(stats), Some(other)) => stats.merge(other),
        (None, Some(other)) => aggregate.stats = Some(*other),
        _ => {}
    }
}

fn record_template(item: &TelemetryRecord) -> TelemetryRecord {
    let mut aggregate = item.clone();
    aggregate.invocation_parent_ids.clear();
    if let Some(stats) = aggregate.timer_stats_mut() {
        *stats = TimerStats::empty();
    }
    if let telestore_core::RecordPayload::Sql(sql) = &mut aggregate.payload {
        sql.parameters.clear();
    }
    aggregate
}

fn combine_records(aggregate: &mut TelemetryRecord, item: &TelemetryRecord) {
    if let (Some(stats), Some(other)) = (aggregate.timer_stats_mut(), item.timer_stats()) {
        stats.merge(other);
    }
}

// ============================================================================
// Strategies
// ============================================================================

/// Groups timed records by `(kind, platform, method)`
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerAggregator;

impl Aggregator<IndexEntry> for TimerAggregator {
    fn aggregation_key(&self, item: &IndexEntry) -> AggregationKey {
        AggregationKey {
            kind: item.kind,
            platform_id: item.platform_id,
            method_id: item.method_id,
            discriminator: 0,
        }
    }

    fn clone_aggregate(&self, item: &IndexEntry) -> IndexEntry {
        entry_template(item)
    }

    fn combine(&self, aggregate: &mut IndexEntry, item: &IndexEntry) {
        combine_entries(aggregate, item)
    }
}

impl Aggregator<TelemetryRecord> for TimerAggregator {
    fn aggregation_key(&self, item: &TelemetryRecord) -> AggregationKey {
        AggregationKey {
            kind: item.kind(),
            platform_id: item.platform_id,
            method_id: item.method_id,
            discriminator: 0,
        }
    }

    fn clone_aggregate(&self, item: &TelemetryRecord) -> TelemetryRecord {
        record_template(item)
    }

    fn combine(&self, aggregate: &mut TelemetryRecord, item: &TelemetryRecord) {
        combine_records(aggregate, item)
    }
}

/// Groups SQL records by `(platform, statement)` regardless of method
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlAggregator;

impl Aggregator<IndexEntry> for SqlAggregator {
    fn aggregation_key(&self, item: &IndexEntry) -> AggregationKey {
        AggregationKey {
            kind: item.kind,
            platform_id: item.platform_id,
            method_id: 0,
            discriminator: item.sql_hash.unwrap_or(0),
        }
    }

    fn clone_aggregate(&self, item: &IndexEntry) -> IndexEntry {
        entry_template(item)
    }

    fn combine(&self, aggregate: &mut IndexEntry, item: &IndexEntry) {
        combine_entries(aggregate, item)
    }
}

impl Aggregator<TelemetryRecord> for SqlAggregator {
    fn aggregation_key(&self, item: &TelemetryRecord) -> AggregationKey {
        AggregationKey {
            kind: item.kind(),
            platform_id: item.platform_id,
            method_id: 0,
            discriminator: item.sql_hash().unwrap_or(0),
        }
    }

    fn clone_aggregate(&self, item: &TelemetryRecord) -> TelemetryRecord {
        record_template(item)
    }

    fn combine(&self, aggregate: &mut TelemetryRecord, item: &TelemetryRecord) {
        combine_records(aggregate, item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telestore_core::{RecordPayload, SqlPayload, StorageDescriptor};

    fn sql_record(id: u64, method_id: u64, sql: &str, duration: f64) -> TelemetryRecord {
        TelemetryRecord::new(
            id,
            1,
            2,
            method_id,
            100,
            RecordPayload::Sql(SqlPayload {
                stats: TimerStats::single(duration),
                sql: sql.to_string(),
                prepared: true,
                parameters: vec!["42".to_string()],
            }),
        )
        .with_parent(7)
    }

    fn fold<T, A: Aggregator<T>>(aggregator: &A, items: &[T]) -> T {
        let mut aggregate = aggregator.clone_aggregate(&items[0]);
        for item in items {
            aggregator.combine(&mut aggregate, item);
        }
        aggregate
    }

    #[test]
    fn test_timer_record_fold() {
        let a = TelemetryRecord::timer(1, 1, 2, 3, 100, 10.0).with_parent(9);
        let b = TelemetryRecord::timer(2, 1, 2, 3, 150, 30.0);
        assert_eq!(
            TimerAggregator.aggregation_key(&a),
            TimerAggregator.aggregation_key(&b)
        );

        let aggregate = fold(&TimerAggregator, &[a.clone(), b]);
        let stats = aggregate.timer_stats().unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.duration, 40.0);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 30.0);
        // Identity of the first record, without its affiliation
        assert_eq!(aggregate.id, a.id);
        assert!(aggregate.invocation_parent_ids.is_empty());
    }

    #[test]
    fn test_sql_groups_across_methods() {
        let a = sql_record(1, 3, "SELECT * FROM t", 1.0);
        let b = sql_record(2, 4, "SELECT * FROM t", 2.0);
        let c = sql_record(3, 3, "SELECT 1", 2.0);

        assert_eq!(SqlAggregator.aggregation_key(&a), SqlAggregator.aggregation_key(&b));
        assert_ne!(SqlAggregator.aggregation_key(&a), SqlAggregator.aggregation_key(&c));

        let aggregate = fold(&SqlAggregator, &[a, b]);
        match &aggregate.payload {
            RecordPayload::Sql(sql) => {
                assert_eq!(sql.stats.count, 2);
                assert!(sql.parameters.is_empty());
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_entry_fold_counts() {
        let d = StorageDescriptor::new(1, 0, 10);
        let entries: Vec<IndexEntry> = (1..=3)
            .map(|i| IndexEntry::from_record(&TelemetryRecord::timer(i, 1, 2, 3, i, 1.0), d))
            .collect();

        let aggregate = fold(&TimerAggregator, &entries);
        assert_eq!(aggregate.count, 3);
        assert_eq!(aggregate.stats.map(|s| s.count), Some(3));
        assert_eq!(aggregate.id, 1);

        // Combining two aggregates adds their counts
        let mut merged = aggregate.clone();
        TimerAggregator.combine(&mut merged, &aggregate);
        assert_eq!(merged.count, 6);
    }
}
