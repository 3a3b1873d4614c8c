//! Bounded ring of terminally failed operations.

use std::collections::VecDeque;

use serde::Serialize;

use super::OperationSnapshot;
use crate::error::BridgeError;
use crate::protocol::now_timestamp_ms;

/// A terminal failure kept for postmortem inspection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEntry {
    pub operation: OperationSnapshot,
    #[serde(serialize_with = "serialize_error")]
    pub error: BridgeError,
    pub timestamp: i64,
}

fn serialize_error<S: serde::Serializer>(error: &BridgeError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(error)
}

/// Append-only ring; the oldest entry is evicted at capacity.
#[derive(Debug)]
pub(crate) struct DeadLetterRing {
    capacity: usize,
    entries: VecDeque<DeadLetterEntry>,
}

impl DeadLetterRing {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(128)),
        }
    }

    pub(crate) fn push(&mut self, operation: OperationSnapshot, error: BridgeError) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(DeadLetterEntry {
            operation,
            error,
            timestamp: now_timestamp_ms(),
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.iter().cloned().collect()
    }
}
