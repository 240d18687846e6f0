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

//! Configuration for the Telestore engine
//!
//! Settings can be loaded from TOML, taken from defaults, and overridden by
//! `TELESTORE_*` environment variables for zero-config deployment.

use crate::error::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Default number of pooled buffers
pub const DEFAULT_BUFFER_COUNT: usize = 64;

/// Default capacity of one pooled buffer (64 KiB)
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// Bounds on the read-ahead buffers of one input stream
pub const MIN_STREAM_BUFFERS: usize = 2;
pub const MAX_STREAM_BUFFERS: usize = 5;
pub const DEFAULT_STREAM_BUFFERS: usize = 3;

/// Limits of the aggregating processor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AggregationConfig {
    /// Open aggregates kept before the oldest is flushed
    pub max_open_aggregates: usize,

    /// Length of an aggregation window in milliseconds.
    /// None = unbounded (aggregates are only flushed on overflow or flush())
    pub window_ms: Option<u64>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            max_open_aggregates: 10_000,
            window_ms: Some(15_000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub buffer_count: usize,
    pub buffer_capacity: usize,

    /// Maximum wait for a pooled buffer. None = block until one is released
    pub buffer_acquire_timeout_ms: Option<u64>,

    /// Workers draining the per-file channel queues
    pub io_threads: usize,

    /// Workers executing write tasks
    pub write_threads: usize,

    /// Read-ahead buffers per input stream, clamped to 2..=5
    pub stream_buffers: usize,

    /// Consumer wait for the next region before the stream fails
    pub stream_read_timeout_ms: u64,

    /// Channels unused for this long drop their file handle
    pub channel_idle_close_secs: u64,

    pub aggregation: AggregationConfig,

    /// rayon threads for fan-out queries (0 = rayon default)
    pub parallel_query_threads: usize,

    /// Fewer top-level branches than this are queried sequentially
    pub parallel_query_min_branches: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_count: DEFAULT_BUFFER_COUNT,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            buffer_acquire_timeout_ms: None,
            io_threads: 4,
            write_threads: 4,
            stream_buffers: DEFAULT_STREAM_BUFFERS,
            stream_read_timeout_ms: 3_000,
            channel_idle_close_secs: 60,
            aggregation: AggregationConfig::default(),
            parallel_query_threads: 0,
            parallel_query_min_branches: 4,
        }
    }
}

impl EngineConfig {
    /// Small pools and few threads, suitable for tests
    pub fn for_testing() -> Self {
        Self {
            buffer_count: 8,
            buffer_capacity: 4 * 1024,
            io_threads: 2,
            write_threads: 2,
            parallel_query_threads: 2,
            parallel_query_min_branches: 1,
            ..Self::default()
        }
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&source)?;
        debug!(path = ?path, "loaded engine config");
        Ok(config)
    }

    /// Defaults overridden by `TELESTORE_*` variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        fn parse<T: std::str::FromStr>(name: &str) -> Option<T> {
            let value = env::var(name).ok()?;
            match value.parse() {
                Ok(parsed) => {
                    debug!(name, %value, "config overridden from environment");
                    Some(parsed)
                }
                Err(_) => {
                    debug!(name, %value, "ignoring unparsable environment override");
                    None
                }
            }
        }

        if let Some(v) = parse("TELESTORE_BUFFER_COUNT") {
            self.buffer_count = v;
        }
        if let Some(v) = parse("TELESTORE_BUFFER_CAPACITY") {
            self.buffer_capacity = v;
        }
        if let Some(v) = parse("TELESTORE_BUFFER_ACQUIRE_TIMEOUT_MS") {
            self.buffer_acquire_timeout_ms = Some(v);
        }
        if let Some(v) = parse("TELESTORE_IO_THREADS") {
            self.io_threads = v;
        }
        if let Some(v) = parse("TELESTORE_WRITE_THREADS") {
            self.write_threads = v;
        }
        if let Some(v) = parse("TELESTORE_STREAM_BUFFERS") {
            self.stream_buffers = v;
        }
        if let Some(v) = parse("TELESTORE_CHANNEL_IDLE_CLOSE_SECS") {
            self.channel_idle_close_secs = v;
        }
        if let Some(v) = parse("TELESTORE_MAX_OPEN_AGGREGATES") {
            self.aggregation.max_open_aggregates = v;
        }
        if let Some(v) = parse("TELESTORE_AGGREGATION_WINDOW_MS") {
            self.aggregation.window_ms = Some(v);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("buffer_count", self.buffer_count),
            ("buffer_capacity", self.buffer_capacity),
            ("io_threads", self.io_threads),
            ("write_threads", self.write_threads),
            (
                "aggregation.max_open_aggregates",
                self.aggregation.max_open_aggregates,
            ),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(StorageError::Config(format!("{} must be > 0", name)));
            }
        }
        if self.channel_idle_close_secs == 0 {
            return Err(StorageError::Config(
                "channel_idle_close_secs must be > 0".to_string(),
            ));
        }
        if self.buffer_count < MIN_STREAM_BUFFERS {
            return Err(StorageError::Config(format!(
                "buffer_count must be at least {} to serve an input stream",
                MIN_STREAM_BUFFERS
            )));
        }
        Ok(())
    }

    pub fn effective_stream_buffers(&self) -> usize {
        self.stream_buffers.clamp(MIN_STREAM_BUFFERS, MAX_STREAM_BUFFERS)
    }

    pub fn buffer_acquire_timeout(&self) -> Option<Duration> {
        self.buffer_acquire_timeout_ms.map(Duration::from_millis)
    }

    pub fn stream_read_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_read_timeout_ms)
    }

    pub fn channel_idle_close(&self) -> Duration {
        Duration::from_secs(self.channel_idle_close_secs)
    }
}
