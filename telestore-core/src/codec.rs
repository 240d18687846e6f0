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

//! Record codec
//!
//! The storage layer treats serialization as an opaque contract: records go
//! in, bytes come out, and `deserialize(serialize(r)) == r`. The default
//! implementation is bincode.

use crate::error::Result;
use crate::record::TelemetryRecord;

/// Per-write serialization options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerializationHints {
    /// Keep the invocation back-references (`invocation_parent_ids`)
    pub write_invocation_affiliation: bool,
}

impl SerializationHints {
    pub fn without_affiliation() -> Self {
        Self {
            write_invocation_affiliation: false,
        }
    }
}

impl Default for SerializationHints {
    fn default() -> Self {
        Self {
            write_invocation_affiliation: true,
        }
    }
}

pub trait RecordSerializer: Send + Sync {
    /// Append the encoded record to `out`
    fn serialize_into(
        &self,
        record: &TelemetryRecord,
        hints: SerializationHints,
        out: &mut Vec<u8>,
    ) -> Result<()>;

    fn deserialize(&self, bytes: &[u8]) -> Result<TelemetryRecord>;

    fn serialize(&self, record: &TelemetryRecord, hints: SerializationHints) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.serialize_into(record, hints, &mut out)?;
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeSerializer;

impl RecordSerializer for BincodeSerializer {
    fn serialize_into(
        &self,
        record: &TelemetryRecord,
        hints: SerializationHints,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        if hints.write_invocation_affiliation {
            bincode::serialize_into(out, record)?;
        } else {
            bincode::serialize_into(out, &record.without_affiliation())?;
        }
        Ok(())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<TelemetryRecord> {
        Ok(bincode::deserialize(bytes)?)
    }
}
