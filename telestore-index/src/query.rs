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

//! Index queries
//!
//! ```text
//! IndexQuery::new()
//!     .platform_id(1)          ─┐
//!     .sensor_type_id(2)        ├─ branch pruning (equality per level)
//!     .method_id(3)            ─┘
//!     .from(t0).to(t1)         ─┐
//!     .kinds([Timer])           ├─ leaf filters
//!     .min_id(100)             ─┘
//!     .aggregator(..)          ── single streaming pass
//!     .comparator(..)          ── default: timestamp descending
//!     .limit(50)
//! ```

use crate::aggregator::{AggregationKey, Aggregator};
use crate::entry::IndexEntry;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use telestore_core::RecordKind;

pub type EntryComparator = Arc<dyn Fn(&IndexEntry, &IndexEntry) -> Ordering + Send + Sync>;

/// Ready-made orderings for [`IndexQuery::comparator`]
pub mod comparators {
    use super::*;

    pub fn timestamp_desc() -> EntryComparator {
        Arc::new(|a: &IndexEntry, b: &IndexEntry| b.timestamp_ms.cmp(&a.timestamp_ms))
    }

    pub fn timestamp_asc() -> EntryComparator {
        Arc::new(|a: &IndexEntry, b: &IndexEntry| a.timestamp_ms.cmp(&b.timestamp_ms))
    }

    pub fn duration_desc() -> EntryComparator {
        Arc::new(|a: &IndexEntry, b: &IndexEntry| b.duration().total_cmp(&a.duration()))
    }

    pub fn count_desc() -> EntryComparator {
        Arc::new(|a: &IndexEntry, b: &IndexEntry| b.count.cmp(&a.count))
    }
}

#[derive(Clone, Default)]
pub struct IndexQuery {
    pub(crate) platform_id: Option<u64>,
    pub(crate) sensor_type_id: Option<u64>,
    pub(crate) method_id: Option<u64>,
    pub(crate) from_ms: Option<u64>,
    pub(crate) to_ms: Option<u64>,
    pub(crate) kinds: Option<Vec<RecordKind>>,
    pub(crate) min_id: Option<u64>,
    pub(crate) aggregator: Option<Arc<dyn Aggregator<IndexEntry>>>,
    pub(crate) comparator: Option<EntryComparator>,
    pub(crate) limit: Option<usize>,
}

impl fmt::Debug for IndexQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexQuery")
            .field("platform_id", &self.platform_id)
            .field("sensor_type_id", &self.sensor_type_id)
            .field("method_id", &self.method_id)
            .field("from_ms", &self.from_ms)
            .field("to_ms", &self.to_ms)
            .field("kinds", &self.kinds)
            .field("min_id", &self.min_id)
            .field("aggregated", &self.aggregator.is_some())
            .field("limit", &self.limit)
            .finish()
    }
}

impl IndexQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn platform_id(mut self, platform_id: u64) -> Self {
        self.platform_id = Some(platform_id);
        self
    }

    pub fn sensor_type_id(mut self, sensor_type_id: u64) -> Self {
        self.sensor_type_id = Some(sensor_type_id);
        self
    }

    pub fn method_id(mut self, method_id: u64) -> Self {
        self.method_id = Some(method_id);
        self
    }

    /// Inclusive lower time bound (ms)
    pub fn from(mut self, from_ms: u64) -> Self {
        self.from_ms = Some(from_ms);
        self
    }

    /// Inclusive upper time bound (ms)
    pub fn to(mut self, to_ms: u64) -> Self {
        self.to_ms = Some(to_ms);
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = RecordKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Only entries with `id >= min_id`
    pub fn min_id(mut self, min_id: u64) -> Self {
        self.min_id = Some(min_id);
        self
    }

    pub fn aggregator(mut self, aggregator: Arc<dyn Aggregator<IndexEntry>>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    pub fn comparator(mut self, comparator: EntryComparator) -> Self {
        self.comparator = Some(comparator);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Leaf-level filters (time range, kind, id floor)
    pub fn matches(&self, entry: &IndexEntry) -> bool {
        if let Some(from) = self.from_ms {
            if entry.timestamp_ms < from {
                return false;
            }
        }
        if let Some(to) = self.to_ms {
            if entry.timestamp_ms > to {
                return false;
            }
        }
        if let Some(min_id) = self.min_id {
            if entry.id < min_id {
                return false;
            }
        }
        match &self.kinds {
            Some(kinds) => kinds.contains(&entry.kind),
            None => true,
        }
    }

    /// Sort by the comparator (ties broken by id, then descriptor) and cut to
    /// the limit.
    pub(crate) fn finish(&self, mut entries: Vec<IndexEntry>) -> Vec<IndexEntry> {
        let default_order = comparators::timestamp_desc();
        let comparator = self.comparator.as_ref().unwrap_or(&default_order);
        entries.sort_by(|a, b| {
            comparator(a, b)
                .then_with(|| a.id.cmp(&b.id))
                .then_with(|| a.descriptor.cmp(&b.descriptor))
        });
        if let Some(limit) = self.limit {
            entries.truncate(limit);
        }
        entries
    }
}

// ============================================================================
// Partial results
// ============================================================================

/// Result of scanning one top-level branch, before ordering and limiting
///
/// Partials are merged in branch order, so the sequential and the fan-out
/// path fold aggregates in exactly the same sequence.
#[derive(Debug, Default)]
pub(crate) struct PartialResult {
    entries: Vec<IndexEntry>,
    positions: HashMap<AggregationKey, usize>,
}

impl PartialResult {
    pub(crate) fn push(&mut self, query: &IndexQuery, entry: &IndexEntry) {
        match &query.aggregator {
            None => self.entries.push(entry.clone()),
            Some(aggregator) => {
                let key = aggregator.aggregation_key(entry);
                match self.positions.get(&key) {
                    Some(&pos) => aggregator.combine(&mut self.entries[pos], entry),
                    None => {
                        let mut aggregate = aggregator.clone_aggregate(entry);
                        aggregator.combine(&mut aggregate, entry);
                        self.positions.insert(key, self.entries.len());
                        self.entries.push(aggregate);
                    }
                }
            }
        }
    }

    pub(crate) fn merge(&mut self, query: &IndexQuery, other: PartialResult) {
        match &query.aggregator {
            None => self.entries.extend(other.entries),
            Some(aggregator) => {
                for aggregate in other.entries {
                    let key = aggregator.aggregation_key(&aggregate);
                    match self.positions.get(&key) {
                        Some(&pos) => aggregator.combine(&mut self.entries[pos], &aggregate),
                        None => {
                            self.positions.insert(key, self.entries.len());
                            self.entries.push(aggregate);
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn into_entries(self) -> Vec<IndexEntry> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telestore_core::{StorageDescriptor, TelemetryRecord};

    fn entry(id: u64, ts: u64) -> IndexEntry {
        IndexEntry::from_record(
            &TelemetryRecord::timer(id, 1, 1, 1, ts, id as f64),
            StorageDescriptor::new(1, id * 10, 10),
        )
    }

    #[test]
    fn test_time_range_inclusive() {
        let query = IndexQuery::new().from(10).to(20);
        assert!(query.matches(&entry(1, 10)));
        assert!(query.matches(&entry(1, 20)));
        assert!(!query.matches(&entry(1, 9)));
        assert!(!query.matches(&entry(1, 21)));
    }

    #[test]
    fn test_kind_and_min_id() {
        let query = IndexQuery::new().kinds([RecordKind::Sql]).min_id(5);
        assert!(!query.matches(&entry(6, 0)));

        let query = IndexQuery::new().kinds([RecordKind::Timer]).min_id(5);
        assert!(query.matches(&entry(6, 0)));
        assert!(!query.matches(&entry(4, 0)));
    }

    #[test]
    fn test_default_order_and_limit() {
        let query = IndexQuery::new().limit(2);
        let result = query.finish(vec![entry(1, 5), entry(2, 7), entry(3, 7), entry(4, 1)]);
        let ids: Vec<u64> = result.iter().map(|e| e.id).collect();
        // Newest first, ties by id
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_custom_comparator() {
        let query = IndexQuery::new().comparator(comparators::duration_desc());
        let result = query.finish(vec![entry(1, 0), entry(3, 0), entry(2, 0)]);
        let ids: Vec<u64> = result.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }
}
