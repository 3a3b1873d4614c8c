//! Queued operations and their read-only snapshots.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::oneshot;

use super::Priority;
use crate::error::BridgeResult;
use crate::protocol::{Frame, Message, MessageKind, now_timestamp_ms};

/// Completion handle of a queued operation.
pub(crate) type Completion = oneshot::Sender<BridgeResult<Frame>>;

/// A message plus the queue's bookkeeping for it.
///
/// Owned exclusively by the queue from enqueue until terminal resolution.
/// Dropping it without resolving drops the completion sender, which the
/// caller observes as a shutdown.
pub(crate) struct QueuedOperation {
    pub(crate) id: u64,
    pub(crate) message: Message,
    pub(crate) priority: Priority,
    pub(crate) timeout: Duration,
    pub(crate) retry_count: u32,
    pub(crate) max_retries: u32,
    /// Wall-clock enqueue time, for diagnostics
    pub(crate) enqueued_at: i64,
    /// When the operation last became runnable (enqueue or retry re-entry)
    pub(crate) ready_since: Instant,
    completion: Option<Completion>,
}

impl QueuedOperation {
    pub(crate) fn new(
        id: u64,
        message: Message,
        priority: Priority,
        timeout: Duration,
        max_retries: u32,
        completion: Completion,
    ) -> Self {
        Self {
            id,
            message,
            priority,
            timeout,
            retry_count: 0,
            max_retries,
            enqueued_at: now_timestamp_ms(),
            ready_since: Instant::now(),
            completion: Some(completion),
        }
    }

    pub(crate) fn kind(&self) -> MessageKind {
        self.message.kind()
    }

    /// Resolve the caller's future. Later calls are ignored.
    pub(crate) fn resolve(&mut self, result: BridgeResult<Frame>) {
        if let Some(completion) = self.completion.take() {
            // Receiver gone means the caller stopped waiting.
            let _ = completion.send(result);
        }
    }

    pub(crate) fn snapshot(&self) -> OperationSnapshot {
        OperationSnapshot {
            id: self.id,
            kind: self.kind(),
            entity_id: self.message.entity_id.clone(),
            priority: self.priority,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            timeout_ms: self.timeout.as_millis() as u64,
            enqueued_at: self.enqueued_at,
        }
    }
}

/// Serializable view of a queued or running operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSnapshot {
    pub id: u64,
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub priority: Priority,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_ms: u64,
    pub enqueued_at: i64,
}
