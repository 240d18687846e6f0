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

//! Telestore Core
//!
//! Fundamental data structures shared by the index and storage crates:
//! telemetry records, storage descriptors, the record codec, the error
//! taxonomy and engine configuration.

pub mod codec;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod record;

pub use codec::{BincodeSerializer, RecordSerializer, SerializationHints};
pub use config::{AggregationConfig, EngineConfig};
pub use descriptor::StorageDescriptor;
pub use error::{Result, StorageError};
pub use record::{
    ExceptionEvent, ExceptionPayload, HttpTimerPayload, InvocationPayload, KeyPath, RecordKind,
    RecordPayload, RemoteCallPayload, SqlPayload, TelemetryRecord, TimerStats, AGGREGATE_ID_BASE,
};
