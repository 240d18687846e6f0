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

//! Shared engine resources, constructed once and passed explicitly

use crate::buffer::BufferPool;
use crate::channel::{ChannelIo, ChannelManager};
use std::fmt;
use std::sync::Arc;
use telestore_core::{BincodeSerializer, EngineConfig, RecordSerializer, Result};

pub struct EngineContext {
    pub config: EngineConfig,
    pub buffer_pool: BufferPool,
    pub channel_io: Arc<dyn ChannelIo>,
    pub serializer: Arc<dyn RecordSerializer>,
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("config", &self.config)
            .field("buffer_pool", &self.buffer_pool)
            .finish()
    }
}

impl EngineContext {
    /// Context backed by a [`ChannelManager`] and the bincode codec
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let channel_io = Arc::new(ChannelManager::new(
            config.io_threads,
            config.channel_idle_close(),
        )?);
        Self::with_channel_io(config, channel_io)
    }

    /// Context with a caller-supplied channel implementation
    pub fn with_channel_io(config: EngineConfig, channel_io: Arc<dyn ChannelIo>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            buffer_pool: BufferPool::new(config.buffer_count, config.buffer_capacity),
            channel_io,
            serializer: Arc::new(BincodeSerializer),
            config,
        })
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn RecordSerializer>) -> Self {
        self.serializer = serializer;
        self
    }
}
