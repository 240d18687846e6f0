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

//! Storage error types

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur while writing, indexing or reading telemetry
#[derive(Debug, Error)]
pub enum StorageError {
    /// The indexing tree refused to reserve a descriptor for a record
    #[error("Reservation failed: {0}")]
    Reservation(String),

    /// Record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Asynchronous channel read or write failed
    #[error("Channel I/O error on {path:?}: {message}")]
    ChannelIo { path: PathBuf, message: String },

    /// No buffer became available in time
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A region of a streamed read could not be delivered
    #[error("Partial read: {0}")]
    PartialRead(String),

    /// Caller-imposed wait expired
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Writer is not prepared or already finalized
    #[error("Storage writer is not accepting writes")]
    NotWriting,

    /// Component was closed while the operation was pending
    #[error("Closed: {0}")]
    Closed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn channel_io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ChannelIo {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for StorageError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}
