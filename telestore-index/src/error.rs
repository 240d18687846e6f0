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

//! Indexing tree error types

use telestore_core::StorageError;
use thiserror::Error;

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Debug, Error)]
pub enum IndexError {
    /// Records with id 0 cannot be indexed
    #[error("Record id 0 is not indexable")]
    ZeroId,

    /// Id already reserved or committed in the target leaf
    #[error("Record {0} is already indexed")]
    DuplicateId(u64),

    /// Reservation was already committed or aborted
    #[error("No pending reservation for record {0}")]
    NotPending(u64),

    /// Descriptor points into a different file than the reservation
    #[error("Descriptor file {actual} does not match reserved file {expected}")]
    FileKeyMismatch { expected: u32, actual: u32 },

    /// Snapshot file is corrupt or has an unknown format
    #[error("Index snapshot error: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IndexError> for StorageError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Io(io) => StorageError::Io(io),
            other => StorageError::Reservation(other.to_string()),
        }
    }
}
