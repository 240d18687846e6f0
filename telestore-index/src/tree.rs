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

//! Concurrent Indexing Tree
//!
//! Hierarchical index over committed record descriptors.
//!
//! ## Architecture
//! ```text
//! IndexingTree
//! └── platform_id      Branch (RwLock<BTreeMap>)
//!     └── sensor_type_id   Branch
//!         └── method_id        Leaf (own RwLock, own data file)
//!             ├── pending   reserved, not yet written
//!             └── entries   committed IndexEntry values
//! ```
//!
//! Branch maps are locked only long enough to look up, insert or snapshot a
//! child. Queries traverse snapshots, so a write into one leaf never blocks a
//! query scanning another.

use crate::entry::IndexEntry;
use crate::error::{IndexError, IndexResult};
use crate::leaf::{Leaf, Reservation};
use crate::query::{IndexQuery, PartialResult};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use telestore_core::{KeyPath, TelemetryRecord};
use tracing::{debug, info};

/// Snapshot magic number (v1, bincode body + BLAKE3 trailer)
const SNAPSHOT_MAGIC: &[u8; 8] = b"TSIDX001";

const CHECKSUM_SIZE: usize = 32;

// ============================================================================
// Branches
// ============================================================================

#[derive(Debug)]
pub(crate) struct Branch<C> {
    children: RwLock<BTreeMap<u64, Arc<C>>>,
}

impl<C> Default for Branch<C> {
    fn default() -> Self {
        Self {
            children: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<C> Branch<C> {
    fn get(&self, key: u64) -> Option<Arc<C>> {
        self.children.read().get(&key).cloned()
    }

    fn get_or_create(&self, key: u64, create: impl FnOnce() -> C) -> Arc<C> {
        if let Some(child) = self.get(key) {
            return child;
        }
        let mut children = self.children.write();
        Arc::clone(children.entry(key).or_insert_with(|| Arc::new(create())))
    }

    /// Children matching an optional equality restriction, in key order
    fn select(&self, restriction: Option<u64>) -> Vec<(u64, Arc<C>)> {
        match restriction {
            Some(key) => self.get(key).map(|c| vec![(key, c)]).unwrap_or_default(),
            None => self
                .children
                .read()
                .iter()
                .map(|(k, c)| (*k, Arc::clone(c)))
                .collect(),
        }
    }

    fn len(&self) -> usize {
        self.children.read().len()
    }
}

pub(crate) type MethodBranch = Branch<Leaf>;
pub(crate) type SensorBranch = Branch<MethodBranch>;

// ============================================================================
// Snapshot format
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct LeafSnapshot {
    path: KeyPath,
    file_key: u32,
    entries: Vec<IndexEntry>,
}

// ============================================================================
// Tree
// ============================================================================

#[derive(Debug, Default)]
pub struct IndexingTree {
    platforms: Branch<SensorBranch>,
    /// File keys handed out to leaves, never reused
    file_keys: Mutex<HashSet<u32>>,
}

impl IndexingTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_file_key(&self) -> u32 {
        let mut keys = self.file_keys.lock();
        let mut rng = rand::thread_rng();
        loop {
            let key: u32 = rng.gen_range(1..=i32::MAX as u32);
            if keys.insert(key) {
                return key;
            }
        }
    }

    fn leaf_for(&self, path: KeyPath) -> Arc<Leaf> {
        let sensors = self
            .platforms
            .get_or_create(path.platform_id, SensorBranch::default);
        let methods = sensors.get_or_create(path.sensor_type_id, MethodBranch::default);
        methods.get_or_create(path.method_id, || {
            let leaf = Leaf::new(self.allocate_file_key());
            debug!(?path, file_key = leaf.file_key(), "created index leaf");
            leaf
        })
    }

    /// Reserve a slot for `record`, fixing the data file it will be written to
    pub fn reserve(&self, record: &TelemetryRecord) -> IndexResult<Reservation> {
        self.leaf_for(record.key_path()).reserve(record)
    }

    /// Leaf holding `path`, if it exists
    pub fn leaf(&self, path: KeyPath) -> Option<Arc<Leaf>> {
        self.platforms
            .get(path.platform_id)?
            .get(path.sensor_type_id)?
            .get(path.method_id)
    }

    /// Remove a committed entry
    pub fn remove(&self, path: KeyPath, record_id: u64) -> Option<IndexEntry> {
        self.leaf(path)?.remove(record_id)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Top-level branches selected by the query, in platform order
    pub(crate) fn select_platforms(&self, query: &IndexQuery) -> Vec<(u64, Arc<SensorBranch>)> {
        self.platforms.select(query.platform_id)
    }

    pub(crate) fn scan_platform(query: &IndexQuery, sensors: &SensorBranch) -> PartialResult {
        let mut partial = PartialResult::default();
        for (_, methods) in sensors.select(query.sensor_type_id) {
            for (_, leaf) in methods.select(query.method_id) {
                leaf.scan(query, &mut partial);
            }
        }
        partial
    }

    pub(crate) fn merge_partials(
        query: &IndexQuery,
        partials: impl IntoIterator<Item = PartialResult>,
    ) -> Vec<IndexEntry> {
        let mut merged = PartialResult::default();
        for partial in partials {
            merged.merge(query, partial);
        }
        query.finish(merged.into_entries())
    }

    /// Sequential query on the caller's thread
    pub fn query(&self, query: &IndexQuery) -> Vec<IndexEntry> {
        let partials = self
            .select_platforms(query)
            .into_iter()
            .map(|(_, sensors)| Self::scan_platform(query, &sensors));
        Self::merge_partials(query, partials)
    }

    // ------------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------------

    fn leaves(&self) -> Vec<(KeyPath, Arc<Leaf>)> {
        let mut leaves = Vec::new();
        for (platform_id, sensors) in self.platforms.select(None) {
            for (sensor_type_id, methods) in sensors.select(None) {
                for (method_id, leaf) in methods.select(None) {
                    let path = KeyPath {
                        platform_id,
                        sensor_type_id,
                        method_id,
                    };
                    leaves.push((path, leaf));
                }
            }
        }
        leaves
    }

    /// Number of committed entries
    pub fn len(&self) -> usize {
        self.leaves().iter().map(|(_, leaf)| leaf.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_len(&self) -> usize {
        self.leaves().iter().map(|(_, leaf)| leaf.pending_len()).sum()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves().len()
    }

    pub fn platform_count(&self) -> usize {
        self.platforms.len()
    }

    /// Data file keys of all leaves
    pub fn file_keys(&self) -> Vec<u32> {
        let mut keys: Vec<u32> = self.file_keys.lock().iter().copied().collect();
        keys.sort_unstable();
        keys
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Write all committed entries to `path`
    ///
    /// Format: magic, bincode body, BLAKE3 checksum of magic + body. Written
    /// to a temp file and renamed into place.
    pub fn save_snapshot(&self, path: &Path) -> IndexResult<usize> {
        let leaves: Vec<LeafSnapshot> = self
            .leaves()
            .into_iter()
            .map(|(path, leaf)| LeafSnapshot {
                path,
                file_key: leaf.file_key(),
                entries: leaf.entries(),
            })
            .collect();
        let entry_count = leaves.iter().map(|l| l.entries.len()).sum();

        let mut data = Vec::new();
        data.extend_from_slice(SNAPSHOT_MAGIC);
        bincode::serialize_into(&mut data, &leaves)
            .map_err(|e| IndexError::Snapshot(e.to_string()))?;
        let checksum = blake3::hash(&data);
        data.extend_from_slice(checksum.as_bytes());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("tmp");
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        writer.write_all(&data)?;
        writer.flush()?;
        drop(writer);
        std::fs::rename(&temp_path, path)?;

        info!(
            entries = entry_count,
            leaves = leaves.len(),
            path = ?path,
            "saved index snapshot"
        );
        Ok(entry_count)
    }

    /// Rebuild a tree from a snapshot written by [`IndexingTree::save_snapshot`]
    pub fn load_snapshot(path: &Path) -> IndexResult<Self> {
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;

        if data.len() < SNAPSHOT_MAGIC.len() + CHECKSUM_SIZE {
            return Err(IndexError::Snapshot("snapshot file too small".into()));
        }
        if &data[..SNAPSHOT_MAGIC.len()] != SNAPSHOT_MAGIC {
            return Err(IndexError::Snapshot(format!(
                "invalid snapshot magic number: {:?}",
                &data[..SNAPSHOT_MAGIC.len()]
            )));
        }

        let (body, stored_checksum) = data.split_at(data.len() - CHECKSUM_SIZE);
        if blake3::hash(body).as_bytes() != stored_checksum {
            return Err(IndexError::Snapshot(format!(
                "checksum mismatch in {:?}",
                path
            )));
        }

        let leaves: Vec<LeafSnapshot> = bincode::deserialize(&body[SNAPSHOT_MAGIC.len()..])
            .map_err(|e| IndexError::Snapshot(e.to_string()))?;

        let tree = Self::new();
        for snapshot in leaves {
            tree.file_keys.lock().insert(snapshot.file_key);
            let sensors = tree
                .platforms
                .get_or_create(snapshot.path.platform_id, SensorBranch::default);
            let methods =
                sensors.get_or_create(snapshot.path.sensor_type_id, MethodBranch::default);
            methods.get_or_create(snapshot.path.method_id, || {
                Leaf::with_entries(snapshot.file_key, snapshot.entries)
            });
        }
        debug!(entries = tree.len(), path = ?path, "loaded index snapshot");
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::TimerAggregator;
    use telestore_core::StorageDescriptor;

    fn insert(tree: &IndexingTree, record: &TelemetryRecord) -> IndexEntry {
        let reservation = tree.reserve(record).unwrap();
        let key = reservation.file_key();
        reservation
            .commit(StorageDescriptor::new(key, record.id * 100, 100))
            .unwrap()
    }

    #[test]
    fn test_same_path_same_leaf() {
        let tree = IndexingTree::new();
        let a = tree.reserve(&TelemetryRecord::timer(1, 1, 2, 3, 0, 1.0)).unwrap();
        let b = tree.reserve(&TelemetryRecord::timer(2, 1, 2, 3, 0, 1.0)).unwrap();
        let c = tree.reserve(&TelemetryRecord::timer(3, 1, 2, 4, 0, 1.0)).unwrap();

        assert_eq!(a.file_key(), b.file_key());
        assert_ne!(a.file_key(), c.file_key());
        assert_eq!(tree.leaf_count(), 2);
        assert_eq!(tree.pending_len(), 3);
    }

    #[test]
    fn test_equality_pruning() {
        let tree = IndexingTree::new();
        for id in 1..=12u64 {
            let record = TelemetryRecord::timer(id, id % 2, id % 3, id % 4, id, 1.0);
            insert(&tree, &record);
        }

        let result = tree.query(&IndexQuery::new().platform_id(1).sensor_type_id(0));
        assert!(result.iter().all(|e| e.platform_id == 1 && e.sensor_type_id == 0));
        assert_eq!(result.len(), 2); // ids 3 and 9

        assert!(tree.query(&IndexQuery::new().platform_id(7)).is_empty());
        assert_eq!(tree.query(&IndexQuery::new()).len(), 12);
    }

    #[test]
    fn test_aggregated_query() {
        let tree = IndexingTree::new();
        for id in 1..=10u64 {
            insert(&tree, &TelemetryRecord::timer(id, 1, 1, id % 2, id, 2.0));
        }

        let result = tree.query(&IndexQuery::new().aggregator(Arc::new(TimerAggregator)));
        assert_eq!(result.len(), 2);
        assert_eq!(result.iter().map(|e| e.count).sum::<u64>(), 10);
        assert!(result.iter().all(|e| e.stats.map(|s| s.duration) == Some(10.0)));
    }

    #[test]
    fn test_remove_committed() {
        let tree = IndexingTree::new();
        let record = TelemetryRecord::timer(4, 1, 1, 1, 4, 1.0);
        insert(&tree, &record);
        assert!(tree.remove(record.key_path(), 4).is_some());
        assert!(tree.is_empty());
        // Id becomes reusable
        assert!(tree.reserve(&record).is_ok());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.tsi");

        let tree = IndexingTree::new();
        for id in 1..=20u64 {
            insert(&tree, &TelemetryRecord::timer(id, id % 3, 1, id % 5, id * 10, 1.0));
        }
        // Pending entries are not persisted
        let _pending = tree.reserve(&TelemetryRecord::timer(99, 0, 1, 0, 0, 1.0)).unwrap();

        assert_eq!(tree.save_snapshot(&path).unwrap(), 20);
        let loaded = IndexingTree::load_snapshot(&path).unwrap();

        assert_eq!(loaded.len(), 20);
        assert_eq!(loaded.file_keys(), tree.file_keys());
        let query = IndexQuery::new().platform_id(2).from(50).to(150);
        assert_eq!(loaded.query(&query), tree.query(&query));
    }

    #[test]
    fn test_snapshot_corruption_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.tsi");

        let tree = IndexingTree::new();
        insert(&tree, &TelemetryRecord::timer(1, 1, 1, 1, 1, 1.0));
        tree.save_snapshot(&path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            IndexingTree::load_snapshot(&path),
            Err(IndexError::Snapshot(_))
        ));
    }
}
