//! Retry scheduler task.
//!
//! Operations waiting out a retry backoff are parked in a
//! `tokio_util::time::DelayQueue` owned by a single task. When a delay
//! expires the operation is handed back to the queue, which re-inserts it
//! at the front of its tier.

use std::collections::HashMap;
use std::sync::Weak;
use std::time::Duration;

use log::debug;
use tokio::sync::mpsc;
use tokio_util::time::DelayQueue;

use super::{QueueShared, QueuedOperation};
use crate::error::BridgeError;

pub(crate) enum SchedulerCommand {
    Schedule {
        operation: QueuedOperation,
        delay: Duration,
    },
    /// Reject every parked operation with `Cleared`
    Clear,
}

pub(crate) type SchedulerSender = mpsc::UnboundedSender<SchedulerCommand>;

/// Spawn the scheduler task.
///
/// The task holds only a weak reference to the queue; it exits when the
/// queue is dropped (the command channel closes) or when an expired
/// operation finds the queue gone.
pub(crate) fn spawn_scheduler(queue: Weak<QueueShared>) -> SchedulerSender {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(scheduler_loop(queue, rx));
    tx
}

async fn scheduler_loop(
    queue: Weak<QueueShared>,
    mut commands: mpsc::UnboundedReceiver<SchedulerCommand>,
) {
    let mut delays: DelayQueue<u64> = DelayQueue::new();
    let mut parked: HashMap<u64, QueuedOperation> = HashMap::new();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(SchedulerCommand::Schedule { operation, delay }) => {
                    debug!(
                        target: "workbridge::queue",
                        "Retry {}/{} of {} op#{} in {:?}",
                        operation.retry_count,
                        operation.max_retries,
                        operation.kind(),
                        operation.id,
                        delay
                    );
                    delays.insert(operation.id, delay);
                    parked.insert(operation.id, operation);
                }
                Some(SchedulerCommand::Clear) => {
                    delays.clear();
                    let cleared: Vec<QueuedOperation> =
                        parked.drain().map(|(_, operation)| operation).collect();
                    if let Some(shared) = queue.upgrade() {
                        shared.reject_parked(cleared, BridgeError::Cleared);
                    }
                }
                None => break,
            },
            Some(expired) = std::future::poll_fn(|cx| delays.poll_expired(cx)), if !delays.is_empty() => {
                let id = expired.into_inner();
                let Some(operation) = parked.remove(&id) else {
                    continue;
                };
                match queue.upgrade() {
                    Some(shared) => QueueShared::requeue(&shared, operation),
                    None => break,
                }
            }
        }
    }
}
