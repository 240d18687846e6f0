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

//! Invocation decomposition

use super::{flush_chain, forward, DataProcessor};
use crate::writer::{RecordWriter, WriteFuture};
use std::sync::Arc;
use telestore_core::{
    InvocationPayload, RecordKind, RecordPayload, SerializationHints, TelemetryRecord,
};

/// Splits an invocation tree into its leaf measurements
///
/// Every extracted record carries the ids of all invocations enclosing it.
/// Only exception *creation* events are extracted; the rest of an
/// exception's causal chain stays inside the invocation.
pub struct ExtractorProcessor {
    chained: Vec<Arc<dyn DataProcessor>>,
}

impl ExtractorProcessor {
    pub fn new(chained: Vec<Arc<dyn DataProcessor>>) -> Self {
        Self { chained }
    }

    fn extract(
        &self,
        invocation: &TelemetryRecord,
        payload: &InvocationPayload,
        writer: &dyn RecordWriter,
        futures: &mut Vec<WriteFuture>,
    ) {
        for child in &payload.children {
            let mut extracted = child.clone();
            extracted
                .invocation_parent_ids
                .extend(invocation.invocation_parent_ids.iter().copied());
            extracted.invocation_parent_ids.insert(invocation.id);

            match &child.payload {
                RecordPayload::Invocation(nested) => {
                    self.extract(&extracted, nested, writer, futures);
                }
                RecordPayload::Exception(_) if !child.is_exception_creation() => {}
                _ => futures.extend(forward(&self.chained, &extracted, writer)),
            }
        }
    }
}

impl DataProcessor for ExtractorProcessor {
    fn can_be_processed(&self, record: &TelemetryRecord) -> bool {
        record.kind() == RecordKind::Invocation
    }

    fn process(&self, record: &TelemetryRecord, writer: &dyn RecordWriter) -> Vec<WriteFuture> {
        let mut futures = Vec::new();
        if let Some(payload) = record.invocation() {
            self.extract(record, payload, writer, &mut futures);
        }
        futures
    }

    fn flush(&self, writer: &dyn RecordWriter) -> Vec<WriteFuture> {
        flush_chain(&self.chained, writer)
    }
}

/// Writes invocations without their nested records
pub struct InvocationClonerProcessor;

impl DataProcessor for InvocationClonerProcessor {
    fn can_be_processed(&self, record: &TelemetryRecord) -> bool {
        record.kind() == RecordKind::Invocation
    }

    fn process(&self, record: &TelemetryRecord, writer: &dyn RecordWriter) -> Vec<WriteFuture> {
        let mut clone = record.clone();
        if let RecordPayload::Invocation(payload) = &mut clone.payload {
            payload.children.clear();
        }
        vec![writer.write(clone, SerializationHints::default())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::testing::CollectingWriter;
    use crate::processor::SaverProcessor;
    use std::collections::BTreeSet;
    use telestore_core::{ExceptionEvent, ExceptionPayload};

    fn exception(id: u64, event: ExceptionEvent) -> TelemetryRecord {
        TelemetryRecord::new(
            id,
            1,
            5,
            1,
            10,
            RecordPayload::Exception(ExceptionPayload {
                throwable_id: 77,
                throwable_type: "java.io.IOException".to_string(),
                message: Some("disk".to_string()),
                event,
                cause: None,
            }),
        )
    }

    fn trace() -> TelemetryRecord {
        let nested = TelemetryRecord::new(
            2,
            1,
            9,
            2,
            10,
            RecordPayload::Invocation(InvocationPayload {
                duration: 3.0,
                children: vec![
                    TelemetryRecord::timer(3, 1, 1, 3, 11, 1.0),
                    exception(4, ExceptionEvent::Created),
                    exception(5, ExceptionEvent::Passed),
                ],
            }),
        );
        TelemetryRecord::new(
            1,
            1,
            9,
            1,
            10,
            RecordPayload::Invocation(InvocationPayload {
                duration: 8.0,
                children: vec![nested, exception(6, ExceptionEvent::Handled)],
            }),
        )
    }

    #[test]
    fn test_extracts_leaves_with_affiliation() {
        let writer = CollectingWriter::default();
        let extractor = ExtractorProcessor::new(vec![Arc::new(SaverProcessor::new(RecordKind::ALL))]);
        extractor.process(&trace(), &writer);

        let records = writer.records();
        assert_eq!(writer.ids(), vec![3, 4]);
        assert_eq!(records[0].invocation_parent_ids, BTreeSet::from([1, 2]));
        assert!(records.iter().all(|r| r.kind() != RecordKind::Invocation));
    }

    #[test]
    fn test_cloner_strips_children() {
        let writer = CollectingWriter::default();
        InvocationClonerProcessor.process(&trace(), &writer);

        let records = writer.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 1);
        assert!(records[0].invocation().unwrap().children.is_empty());
    }
}
