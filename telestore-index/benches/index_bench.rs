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

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use telestore_core::{StorageDescriptor, TelemetryRecord};
use telestore_index::{IndexQuery, IndexingTree, ParallelConfig, ParallelQueryExecutor, TimerAggregator};

fn populate(size: u64) -> IndexingTree {
    let tree = IndexingTree::new();
    for id in 1..=size {
        let record = TelemetryRecord::timer(id, id % 16, id % 4, id % 50, id * 10, 1.0);
        let reservation = tree.reserve(&record).unwrap();
        let key = reservation.file_key();
        reservation.commit(StorageDescriptor::new(key, id * 64, 64)).unwrap();
    }
    tree
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");

    for size in [1_000u64, 10_000].iter() {
        group.throughput(Throughput::Elements(*size));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| black_box(populate(size)));
        });
    }

    group.finish();
}

fn bench_aggregated_query(c: &mut Criterion) {
    let tree = populate(100_000);
    let executor = ParallelQueryExecutor::new(ParallelConfig::default()).unwrap();
    let query = IndexQuery::new()
        .from(10_000)
        .to(900_000)
        .aggregator(Arc::new(TimerAggregator));

    let mut group = c.benchmark_group("aggregated_query");
    group.bench_function("sequential", |b| b.iter(|| black_box(tree.query(&query))));
    group.bench_function("parallel", |b| {
        b.iter(|| black_box(tree.query_parallel(&query, &executor)))
    });
    group.finish();
}

fn bench_point_query(c: &mut Criterion) {
    let tree = populate(100_000);
    let query = IndexQuery::new().platform_id(3).sensor_type_id(3).method_id(19);

    c.bench_function("point_query", |b| b.iter(|| black_box(tree.query(&query))));
}

criterion_group!(benches, bench_insert, bench_aggregated_query, bench_point_query);
criterion_main!(benches);
