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

//! Parallel query execution using rayon
//!
//! One task per selected top-level (platform) branch runs on a shared pool.
//! Partial results are merged in branch order and then ordered and limited
//! exactly like the sequential path, so both return identical results.

use crate::entry::IndexEntry;
use crate::query::IndexQuery;
use crate::tree::IndexingTree;
use rayon::prelude::*;
use telestore_core::{Result, StorageError};
use tracing::debug;

/// Parallel execution configuration
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Number of worker threads (0 = rayon default)
    pub num_threads: usize,
    /// Queries selecting fewer top-level branches run sequentially
    pub min_branches: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            min_branches: 4,
        }
    }
}

pub struct ParallelQueryExecutor {
    config: ParallelConfig,
    thread_pool: rayon::ThreadPool,
}

impl ParallelQueryExecutor {
    pub fn new(config: ParallelConfig) -> Result<Self> {
        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("telestore-query-{}", i));
        if config.num_threads > 0 {
            builder = builder.num_threads(config.num_threads);
        }
        let thread_pool = builder
            .build()
            .map_err(|e| StorageError::Config(format!("failed to create query pool: {}", e)))?;

        Ok(Self {
            config,
            thread_pool,
        })
    }

    pub fn num_threads(&self) -> usize {
        self.thread_pool.current_num_threads()
    }

    pub fn query(&self, tree: &IndexingTree, query: &IndexQuery) -> Vec<IndexEntry> {
        let branches = tree.select_platforms(query);
        if branches.len() < self.config.min_branches.max(1) {
            return tree.query(query);
        }

        debug!(branches = branches.len(), "fan-out index query");
        let partials: Vec<_> = self.thread_pool.install(|| {
            branches
                .par_iter()
                .map(|(_, sensors)| IndexingTree::scan_platform(query, sensors))
                .collect()
        });
        IndexingTree::merge_partials(query, partials)
    }
}

impl IndexingTree {
    /// Fan-out query; same result as [`IndexingTree::query`]
    pub fn query_parallel(&self, query: &IndexQuery, executor: &ParallelQueryExecutor) -> Vec<IndexEntry> {
        executor.query(self, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{SqlAggregator, TimerAggregator};
    use crate::query::comparators;
    use std::sync::Arc;
    use telestore_core::{RecordPayload, SqlPayload, StorageDescriptor, TelemetryRecord, TimerStats};

    fn populated_tree() -> IndexingTree {
        let tree = IndexingTree::new();
        for id in 1..=600u64 {
            let platform = id % 6;
            let record = if id % 5 == 0 {
                TelemetryRecord::new(
                    id,
                    platform,
                    2,
                    id % 7,
                    id * 3,
                    RecordPayload::Sql(SqlPayload {
                        stats: TimerStats::single(0.1 * id as f64),
                        sql: format!("SELECT {}", id % 3),
                        prepared: false,
                        parameters: vec![],
                    }),
                )
            } else {
                TelemetryRecord::timer(id, platform, 1, id % 7, id * 3, 0.3 * id as f64)
            };
            let reservation = tree.reserve(&record).unwrap();
            let key = reservation.file_key();
            reservation.commit(StorageDescriptor::new(key, id, 1)).unwrap();
        }
        tree
    }

    fn executor() -> ParallelQueryExecutor {
        ParallelQueryExecutor::new(ParallelConfig {
            num_threads: 4,
            min_branches: 1,
        })
        .unwrap()
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let tree = populated_tree();
        let executor = executor();

        let queries = vec![
            IndexQuery::new(),
            IndexQuery::new().from(300).to(900).limit(25),
            IndexQuery::new().aggregator(Arc::new(TimerAggregator)),
            IndexQuery::new()
                .aggregator(Arc::new(SqlAggregator))
                .comparator(comparators::duration_desc()),
            IndexQuery::new().platform_id(3).sensor_type_id(1).min_id(100),
        ];

        for query in &queries {
            assert_eq!(tree.query(query), tree.query_parallel(query, &executor), "{:?}", query);
        }
    }

    #[test]
    fn test_small_fanout_runs_sequentially() {
        let tree = populated_tree();
        let executor = ParallelQueryExecutor::new(ParallelConfig {
            num_threads: 2,
            min_branches: 100,
        })
        .unwrap();
        let query = IndexQuery::new().aggregator(Arc::new(TimerAggregator));
        assert_eq!(executor.query(&tree, &query), tree.query(&query));
        assert_eq!(executor.num_threads(), 2);
    }
}
