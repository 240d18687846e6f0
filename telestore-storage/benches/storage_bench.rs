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
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use telestore_core::{EngineConfig, RecordKind, TelemetryRecord};
use telestore_index::IndexQuery;
use telestore_storage::{DataProcessor, Engine, SaverProcessor};
use tempfile::tempdir;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn records(count: u64) -> Vec<TelemetryRecord> {
    (0..count)
        .map(|i| {
            let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
            TelemetryRecord::timer(id, i % 4, 1, i % 32, 1_700_000_000_000 + i, (i % 100) as f64)
        })
        .collect()
}

fn bench_write_throughput(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let engine = Engine::open(EngineConfig::default(), dir.path()).unwrap();
    let saver: Arc<dyn DataProcessor> = Arc::new(SaverProcessor::new(RecordKind::ALL));
    let mut group = c.benchmark_group("write_throughput");

    for size in [100u64, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter_batched(
                || records(size),
                |batch| {
                    let results = engine.ingest_synchronously(black_box(&batch), &[saver.clone()]);
                    assert!(results.iter().all(|r| r.is_ok()));
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
    engine.close().unwrap();
}

fn bench_stream_read(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let engine = Engine::open(EngineConfig::default(), dir.path()).unwrap();
    let saver: Arc<dyn DataProcessor> = Arc::new(SaverProcessor::new(RecordKind::ALL));
    engine.ingest_synchronously(&records(5_000), &[saver]);

    let descriptors: Vec<_> = engine
        .query(&IndexQuery::new().platform_id(1))
        .into_iter()
        .map(|e| e.descriptor)
        .collect();
    let total: u64 = descriptors.iter().map(|d| d.length as u64).sum();

    let mut group = c.benchmark_group("stream_read");
    group.throughput(Throughput::Bytes(total));
    group.bench_function("platform_descriptors", |b| {
        b.iter(|| {
            let mut stream = engine.open_stream(black_box(&descriptors)).unwrap();
            let mut out = Vec::with_capacity(total as usize);
            stream.read_to_end(&mut out).unwrap();
            out.len()
        });
    });
    group.finish();
    engine.close().unwrap();
}

criterion_group!(benches, bench_write_throughput, bench_stream_read);
criterion_main!(benches);
