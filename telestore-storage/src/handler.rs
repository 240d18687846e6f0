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

//! Bridge between write tasks and the indexing tree
//!
//! Every write task is registered under a task id before it runs. The slot
//! moves `Queued → Reserved` when the tree reserves a leaf for the record and
//! is removed exactly once, by either `write_successful` (commit) or
//! `write_failed` (abort). Whichever comes second finds no slot and does
//! nothing, so a timed-out write that completes late is never committed.

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telestore_core::{Result, StorageDescriptor, StorageError, TelemetryRecord};
use telestore_index::{IndexEntry, IndexingTree, Reservation};
use tracing::{debug, warn};

enum TaskSlot {
    Queued,
    Reserved(Reservation),
}

/// Reservation outcome handed back to the write task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteTicket {
    pub task_id: u64,
    pub file_key: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HandlerStats {
    pub committed: u64,
    pub failed: u64,
    pub in_flight: usize,
}

pub struct IndexingTreeHandler {
    tree: Arc<IndexingTree>,
    tasks: DashMap<u64, TaskSlot>,
    next_task_id: AtomicU64,
    committed: AtomicU64,
    failed: AtomicU64,
    idle_lock: Mutex<()>,
    idle: Condvar,
}

impl IndexingTreeHandler {
    pub fn new(tree: Arc<IndexingTree>) -> Self {
        Self {
            tree,
            tasks: DashMap::new(),
            next_task_id: AtomicU64::new(1),
            committed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            idle_lock: Mutex::new(()),
            idle: Condvar::new(),
        }
    }

    pub fn tree(&self) -> &Arc<IndexingTree> {
        &self.tree
    }

    /// Allocate a task id and track it as in flight
    pub fn register_task(&self) -> u64 {
        let task_id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        self.tasks.insert(task_id, TaskSlot::Queued);
        task_id
    }

    /// Reserve the record in the tree; fixes the file the task writes to
    pub fn start_write(&self, task_id: u64, record: &TelemetryRecord) -> Result<WriteTicket> {
        let mut slot = self.tasks.get_mut(&task_id).ok_or_else(|| {
            StorageError::Reservation(format!("write task {} was abandoned", task_id))
        })?;
        let reservation = self.tree.reserve(record)?;
        let ticket = WriteTicket {
            task_id,
            file_key: reservation.file_key(),
        };
        *slot = TaskSlot::Reserved(reservation);
        Ok(ticket)
    }

    /// Commit the descriptor of a completed write
    pub fn write_successful(
        &self,
        task_id: u64,
        descriptor: StorageDescriptor,
    ) -> Result<IndexEntry> {
        let removed = self.tasks.remove(&task_id);
        self.notify_if_idle();

        match removed {
            Some((_, TaskSlot::Reserved(reservation))) => {
                let entry = reservation.commit(descriptor)?;
                self.committed.fetch_add(1, Ordering::Relaxed);
                Ok(entry)
            }
            Some((_, TaskSlot::Queued)) => Err(StorageError::Reservation(format!(
                "write task {} completed without reservation",
                task_id
            ))),
            None => {
                debug!(task_id, ?descriptor, "late write completion ignored");
                Err(StorageError::Reservation(format!(
                    "write task {} already failed",
                    task_id
                )))
            }
        }
    }

    /// Release the task's reservation; true only for the first call
    pub fn write_failed(&self, task_id: u64) -> bool {
        let removed = self.tasks.remove(&task_id);
        self.notify_if_idle();

        match removed {
            Some((_, slot)) => {
                if let TaskSlot::Reserved(reservation) = slot {
                    reservation.abort();
                }
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(task_id, "write failed, reservation released");
                true
            }
            None => false,
        }
    }

    fn notify_if_idle(&self) {
        if self.tasks.is_empty() {
            let _guard = self.idle_lock.lock();
            self.idle.notify_all();
        }
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait until no task is in flight; false on timeout
    pub fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.idle_lock.lock();
        while !self.tasks.is_empty() {
            match deadline {
                Some(deadline) => {
                    if self.idle.wait_until(&mut guard, deadline).timed_out() {
                        return self.tasks.is_empty();
                    }
                }
                None => self.idle.wait(&mut guard),
            }
        }
        true
    }

    /// Abort everything still in flight
    pub fn abort_all(&self) -> usize {
        let ids: Vec<u64> = self.tasks.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter(|id| self.write_failed(*id)).count()
    }

    /// Wait for in-flight tasks, then persist the tree to `index_path`
    pub fn finish(&self, index_path: &Path, timeout: Option<Duration>) -> Result<usize> {
        if !self.wait_idle(timeout) {
            let aborted = self.abort_all();
            warn!(aborted, "tasks still in flight at finish, aborted");
        }
        Ok(self.tree.save_snapshot(index_path)?)
    }

    pub fn stats(&self) -> HandlerStats {
        HandlerStats {
            committed: self.committed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            in_flight: self.tasks.len(),
        }
    }
}
