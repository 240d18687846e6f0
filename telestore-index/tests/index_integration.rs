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

use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use telestore_core::{StorageDescriptor, TelemetryRecord};
use telestore_index::{
    IndexQuery, IndexingTree, ParallelConfig, ParallelQueryExecutor, TimerAggregator,
};

fn insert(tree: &IndexingTree, record: &TelemetryRecord) {
    let reservation = tree.reserve(record).unwrap();
    let key = reservation.file_key();
    reservation
        .commit(StorageDescriptor::new(key, record.id * 64, 64))
        .unwrap();
}

/// Test that an equality query on a full key path returns every record inserted under it
#[test]
fn test_equality_query_finds_all_inserted() {
    let tree = IndexingTree::new();
    let mut expected = Vec::new();
    for id in 1..=200u64 {
        let record = TelemetryRecord::timer(id, id % 4, 10 + id % 2, 100 + id % 5, 1_000 + id, 1.0);
        if record.platform_id == 1 && record.sensor_type_id == 11 && record.method_id == 103 {
            expected.push(id);
        }
        insert(&tree, &record);
    }

    let result = tree.query(
        &IndexQuery::new()
            .platform_id(1)
            .sensor_type_id(11)
            .method_id(103),
    );
    let mut ids: Vec<u64> = result.iter().map(|e| e.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, expected);
    assert!(!ids.is_empty());
}

/// Test concurrent writers on disjoint keys alongside readers
#[test]
fn test_concurrent_inserts_and_queries() {
    let tree = Arc::new(IndexingTree::new());
    let writers = 8u64;
    let per_writer = 250u64;

    let mut handles = Vec::new();
    for w in 0..writers {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            for i in 0..per_writer {
                let id = w * per_writer + i + 1;
                insert(&tree, &TelemetryRecord::timer(id, w, 1, i % 10, id, 1.0));
            }
        }));
    }

    let reader = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            let mut last = 0;
            for _ in 0..200 {
                let seen = tree.query(&IndexQuery::new()).len();
                // Committed entries only grow
                assert!(seen >= last);
                last = seen;
                for entry in tree.query(&IndexQuery::new().platform_id(3)) {
                    assert_eq!(entry.platform_id, 3);
                    assert_ne!(entry.descriptor.length, 0);
                }
            }
        })
    };

    for handle in handles {
        handle.join().unwrap();
    }
    reader.join().unwrap();

    assert_eq!(tree.len() as u64, writers * per_writer);
    for w in 0..writers {
        assert_eq!(
            tree.query(&IndexQuery::new().platform_id(w)).len() as u64,
            per_writer
        );
    }
    assert_eq!(tree.pending_len(), 0);
}

/// Test aggregated-by-method query over one hour of timers
#[test]
fn test_hour_of_timers_aggregated_by_method() {
    let tree = IndexingTree::new();
    let hour_ms = 3_600_000u64;
    let mut platform_one = 0u64;

    for id in 1..=1000u64 {
        let platform = 1 + id % 2;
        let method = id % 10;
        let ts = (id * 7_919) % hour_ms;
        if platform == 1 {
            platform_one += 1;
        }
        insert(&tree, &TelemetryRecord::timer(id, platform, 5, method, ts, 1.5));
    }

    let result = tree.query(
        &IndexQuery::new()
            .platform_id(1)
            .from(0)
            .to(hour_ms)
            .aggregator(Arc::new(TimerAggregator)),
    );
    assert!(result.len() <= 10);
    assert_eq!(result.iter().map(|e| e.count).sum::<u64>(), platform_one);
}

proptest! {
    /// Test that fan-out and sequential queries agree for arbitrary data and limits
    #[test]
    fn prop_parallel_equals_sequential(
        points in prop::collection::vec((0u64..8, 0u64..3, 0u64..6, 0u64..10_000, 0.0f64..100.0), 1..300),
        limit in prop::option::of(1usize..50),
        aggregate in any::<bool>(),
    ) {
        let tree = IndexingTree::new();
        for (i, (p, s, m, ts, d)) in points.iter().enumerate() {
            insert(&tree, &TelemetryRecord::timer(i as u64 + 1, *p, *s, *m, *ts, *d));
        }

        let mut query = IndexQuery::new().from(1_000);
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        if aggregate {
            query = query.aggregator(Arc::new(TimerAggregator));
        }

        let executor = ParallelQueryExecutor::new(ParallelConfig { num_threads: 3, min_branches: 1 }).unwrap();
        prop_assert_eq!(tree.query(&query), tree.query_parallel(&query, &executor));
    }
}
