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

use super::DataProcessor;
use crate::writer::{RecordWriter, WriteFuture};
use std::collections::HashSet;
use telestore_core::{RecordKind, SerializationHints, TelemetryRecord};

/// Terminal processor writing allow-listed kinds
///
/// Invocation back-references are only kept when invocations themselves are
/// saved, unless overridden.
pub struct SaverProcessor {
    kinds: HashSet<RecordKind>,
    write_invocation_affiliation: bool,
}

impl SaverProcessor {
    pub fn new(kinds: impl IntoIterator<Item = RecordKind>) -> Self {
        let kinds: HashSet<RecordKind> = kinds.into_iter().collect();
        let write_invocation_affiliation = kinds.contains(&RecordKind::Invocation);
        Self {
            kinds,
            write_invocation_affiliation,
        }
    }

    pub fn with_invocation_affiliation(mut self, write: bool) -> Self {
        self.write_invocation_affiliation = write;
        self
    }
}

impl DataProcessor for SaverProcessor {
    fn can_be_processed(&self, record: &TelemetryRecord) -> bool {
        self.kinds.contains(&record.kind())
    }

    fn process(&self, record: &TelemetryRecord, writer: &dyn RecordWriter) -> Vec<WriteFuture> {
        let hints = SerializationHints {
            write_invocation_affiliation: self.write_invocation_affiliation,
        };
        vec![writer.write(record.clone(), hints)]
    }
}
