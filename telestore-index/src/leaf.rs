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

//! Storage leaves and write reservations
//!
//! A leaf owns the entries of one `(platform, sensor type, method)` path and
//! one data file (its `file_key`). Writing into a leaf is two-phase:
//!
//! ```text
//! reserve(record) ──► pending (invisible to queries)
//!                        ├── commit(descriptor) ──► entries (queryable)
//!                        └── abort()            ──► dropped
//! ```
//!
//! Each leaf has its own lock, so writers on different method paths never
//! contend and a query only ever locks the leaf it is scanning.

use crate::entry::IndexEntry;
use crate::error::{IndexError, IndexResult};
use crate::query::{IndexQuery, PartialResult};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use telestore_core::{StorageDescriptor, TelemetryRecord};

#[derive(Debug, Default)]
struct LeafState {
    /// Every id reserved or committed in this leaf
    ids: HashSet<u64>,
    pending: HashMap<u64, IndexEntry>,
    entries: Vec<IndexEntry>,
}

#[derive(Debug)]
pub struct Leaf {
    file_key: u32,
    state: RwLock<LeafState>,
}

impl Leaf {
    pub fn new(file_key: u32) -> Self {
        Self {
            file_key,
            state: RwLock::new(LeafState::default()),
        }
    }

    pub(crate) fn with_entries(file_key: u32, entries: Vec<IndexEntry>) -> Self {
        let state = LeafState {
            ids: entries.iter().map(|e| e.id).collect(),
            pending: HashMap::new(),
            entries,
        };
        Self {
            file_key,
            state: RwLock::new(state),
        }
    }

    pub fn file_key(&self) -> u32 {
        self.file_key
    }

    pub(crate) fn reserve(self: &Arc<Self>, record: &TelemetryRecord) -> IndexResult<Reservation> {
        if record.id == 0 {
            return Err(IndexError::ZeroId);
        }

        let mut state = self.state.write();
        if !state.ids.insert(record.id) {
            return Err(IndexError::DuplicateId(record.id));
        }
        let skeleton = IndexEntry::from_record(record, StorageDescriptor::new(self.file_key, 0, 0));
        state.pending.insert(record.id, skeleton);

        Ok(Reservation {
            leaf: Some(Arc::clone(self)),
            record_id: record.id,
            file_key: self.file_key,
        })
    }

    fn commit(&self, record_id: u64, descriptor: StorageDescriptor) -> IndexResult<IndexEntry> {
        if descriptor.file_key != self.file_key {
            return Err(IndexError::FileKeyMismatch {
                expected: self.file_key,
                actual: descriptor.file_key,
            });
        }

        let mut state = self.state.write();
        let mut entry = state
            .pending
            .remove(&record_id)
            .ok_or(IndexError::NotPending(record_id))?;
        entry.descriptor = descriptor;
        state.entries.push(entry.clone());
        Ok(entry)
    }

    fn abort(&self, record_id: u64) -> bool {
        let mut state = self.state.write();
        if state.pending.remove(&record_id).is_some() {
            state.ids.remove(&record_id);
            true
        } else {
            false
        }
    }

    /// Remove a committed entry (the record's bytes turned out unreadable)
    pub fn remove(&self, record_id: u64) -> Option<IndexEntry> {
        let mut state = self.state.write();
        let pos = state.entries.iter().position(|e| e.id == record_id)?;
        state.ids.remove(&record_id);
        Some(state.entries.swap_remove(pos))
    }

    pub(crate) fn scan(&self, query: &IndexQuery, partial: &mut PartialResult) {
        let state = self.state.read();
        for entry in state.entries.iter().filter(|e| query.matches(e)) {
            partial.push(query, entry);
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_len(&self) -> usize {
        self.state.read().pending.len()
    }

    pub(crate) fn entries(&self) -> Vec<IndexEntry> {
        self.state.read().entries.clone()
    }
}

// ============================================================================
// Reservation
// ============================================================================

/// Pending slot for one record in one leaf
///
/// The file key is fixed at reservation time. Dropping a reservation without
/// committing it aborts it.
#[derive(Debug)]
pub struct Reservation {
    leaf: Option<Arc<Leaf>>,
    record_id: u64,
    file_key: u32,
}

impl Reservation {
    pub fn record_id(&self) -> u64 {
        self.record_id
    }

    pub fn file_key(&self) -> u32 {
        self.file_key
    }

    /// Make the entry visible to queries under `descriptor`
    pub fn commit(mut self, descriptor: StorageDescriptor) -> IndexResult<IndexEntry> {
        match self.leaf.take() {
            Some(leaf) => {
                let result = leaf.commit(self.record_id, descriptor);
                if result.is_err() {
                    leaf.abort(self.record_id);
                }
                result
            }
            None => Err(IndexError::NotPending(self.record_id)),
        }
    }

    /// Drop the pending entry; returns false if it was no longer pending
    pub fn abort(mut self) -> bool {
        self.leaf
            .take()
            .map(|leaf| leaf.abort(self.record_id))
            .unwrap_or(false)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if let Some(leaf) = self.leaf.take() {
            leaf.abort(self.record_id);
        }
    }
}
