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

//! Telestore Index Layer
//!
//! Concurrent hierarchical index over persisted telemetry records.
//!
//! ## Indexing Tree
//!
//! Records are routed by `platform_id → sensor_type_id → method_id` to a
//! leaf that owns one data file. Writers reserve a slot before their bytes
//! are written and commit the final descriptor afterwards; queries only ever
//! see committed entries.
//!
//! ## Queries
//!
//! - **Sequential** (`IndexingTree::query`): on the caller's thread
//! - **Fan-out** (`IndexingTree::query_parallel`): one rayon task per
//!   platform branch, merged into the same result
//!
//! ## Aggregation
//!
//! `Aggregator` strategies fold entries (or records, for the aggregating
//! processor) that share an `AggregationKey`.

pub mod aggregator;
pub mod entry;
pub mod error;
pub mod leaf;
pub mod parallel;
pub mod query;
pub mod tree;

pub use aggregator::{AggregationKey, Aggregator, SqlAggregator, TimerAggregator};
pub use entry::IndexEntry;
pub use error::{IndexError, IndexResult};
pub use leaf::{Leaf, Reservation};
pub use parallel::{ParallelConfig, ParallelQueryExecutor};
pub use query::{comparators, EntryComparator, IndexQuery};
pub use tree::IndexingTree;
