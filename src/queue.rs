//! Priority message queue in front of the worker.
//!
//! The queue owns the priority, concurrency, and retry policy for every
//! outbound message. It knows nothing about the worker's lifecycle: the
//! bridge hands it an executor at construction time and the queue calls
//! that executor whenever a concurrency slot is free.
//!
//! # Module Structure
//!
//! - `priority` - `Priority` tiers and dispatch order
//! - `operation` - `QueuedOperation` bookkeeping and `OperationSnapshot`
//! - `retry` - exponential backoff with jitter
//! - `scheduler` - `DelayQueue`-backed retry re-entry task
//! - `dead_letter` - bounded ring of terminal failures
//! - `stats` - `QueueStats`, `QueueBreakdown`, per-kind counters

mod dead_letter;
mod operation;
mod priority;
mod retry;
mod scheduler;
mod stats;

pub use dead_letter::DeadLetterEntry;
pub use operation::OperationSnapshot;
pub use priority::Priority;
pub use stats::{KindStats, QueueBreakdown, QueueStats};

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::sync::{Notify, oneshot};

use crate::config::QueueSettings;
use crate::config::defaults::{self, MAX_CONCURRENCY, MIN_CONCURRENCY};
use crate::error::{BridgeError, BridgeResult, LockResultExt};
use crate::protocol::{Frame, Message};
use dead_letter::DeadLetterRing;
use operation::QueuedOperation;
use retry::RetryPolicy;
use scheduler::{SchedulerCommand, SchedulerSender, spawn_scheduler};
use stats::{KindCounters, StatsRecorder};

/// Grace added on top of an operation's own timeout before the queue
/// gives up on an executor that never resolves.
const BACKSTOP_GRACE: Duration = Duration::from_secs(1);

/// Poll interval while `shutdown` waits for in-flight operations.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Boxed future returned by an executor.
pub type ExecutorFuture = Pin<Box<dyn Future<Output = BridgeResult<Frame>> + Send>>;

/// Function the queue calls to actually deliver a message.
///
/// Receives the message and the timeout the queue assigned to it.
pub type Executor = Arc<dyn Fn(Message, Duration) -> ExecutorFuture + Send + Sync>;

/// Handle to an accepted operation.
///
/// Resolves when the operation terminally succeeds or fails.
#[derive(Debug)]
pub struct QueueTicket {
    id: u64,
    receiver: oneshot::Receiver<BridgeResult<Frame>>,
}

impl QueueTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn wait(self) -> BridgeResult<Frame> {
        // A dropped completion means the queue went away with the operation.
        self.receiver.await.unwrap_or(Err(BridgeError::Shutdown))
    }
}

/// Cheaply cloneable handle to a shared queue.
#[derive(Clone)]
pub struct MessageQueue {
    shared: Arc<QueueShared>,
}

pub(crate) struct QueueShared {
    inner: Mutex<QueueInner>,
    retry_policy: RetryPolicy,
    default_max_retries: u32,
    kinds: KindCounters,
    drained: Notify,
    scheduler: OnceLock<SchedulerSender>,
}

struct QueueInner {
    tiers: [VecDeque<QueuedOperation>; 3],
    running: HashMap<u64, OperationSnapshot>,
    max_concurrency: usize,
    executor: Option<Executor>,
    dead_letters: DeadLetterRing,
    stats: StatsRecorder,
    /// Operations parked in the retry scheduler
    scheduled: usize,
    accepting: bool,
    next_id: u64,
}

impl QueueInner {
    fn pop_next(&mut self) -> Option<QueuedOperation> {
        self.tiers.iter_mut().find_map(VecDeque::pop_front)
    }

    fn queued(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }

    fn is_idle(&self) -> bool {
        self.running.is_empty() && self.scheduled == 0 && self.queued() == 0
    }
}

impl MessageQueue {
    pub fn new(settings: &QueueSettings) -> Self {
        let max_concurrency = clamp_concurrency(settings.max_concurrency);
        Self {
            shared: Arc::new(QueueShared {
                inner: Mutex::new(QueueInner {
                    tiers: Default::default(),
                    running: HashMap::new(),
                    max_concurrency,
                    executor: None,
                    dead_letters: DeadLetterRing::new(settings.dead_letter_capacity),
                    stats: StatsRecorder::default(),
                    scheduled: 0,
                    accepting: true,
                    next_id: 1,
                }),
                retry_policy: RetryPolicy::from_settings(settings),
                default_max_retries: settings.max_retries,
                kinds: KindCounters::default(),
                drained: Notify::new(),
                scheduler: OnceLock::new(),
            }),
        }
    }

    /// Register the function that delivers messages.
    ///
    /// Replaces any previous executor and dispatches work that was waiting.
    pub fn set_executor<F, Fut>(&self, executor: F)
    where
        F: Fn(Message, Duration) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BridgeResult<Frame>> + Send + 'static,
    {
        let executor: Executor =
            Arc::new(move |message: Message, timeout: Duration| -> ExecutorFuture {
                Box::pin(executor(message, timeout))
            });
        self.shared.lock().executor = Some(executor);
        QueueShared::dispatch(&self.shared);
    }

    pub fn has_executor(&self) -> bool {
        self.shared.lock().executor.is_some()
    }

    /// Enqueue a message and wait for its terminal result.
    ///
    /// `max_retries` of `None` uses the configured default.
    pub async fn enqueue(
        &self,
        message: Message,
        priority: Priority,
        max_retries: Option<u32>,
    ) -> BridgeResult<Frame> {
        self.submit(message, priority, max_retries)?.wait().await
    }

    /// Accept a message without waiting for it.
    ///
    /// Fails immediately with a configuration error when no executor is
    /// registered and with `Shutdown` once the queue stopped accepting.
    pub fn submit(
        &self,
        message: Message,
        priority: Priority,
        max_retries: Option<u32>,
    ) -> BridgeResult<QueueTicket> {
        let kind = message.kind();
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut inner = self.shared.lock();
            if inner.executor.is_none() {
                return Err(BridgeError::config("no executor registered with the queue"));
            }
            if !inner.accepting {
                return Err(BridgeError::Shutdown);
            }
            let id = inner.next_id;
            inner.next_id += 1;
            let operation = QueuedOperation::new(
                id,
                message,
                priority,
                defaults::operation_timeout(kind),
                max_retries.unwrap_or(self.shared.default_max_retries),
                tx,
            );
            inner.tiers[priority.index()].push_back(operation);
            inner.stats.record_enqueued();
            id
        };
        self.shared.kinds.update(kind, |s| s.enqueued += 1);
        debug!(
            target: "workbridge::queue",
            "Enqueued {} op#{} at {} priority",
            kind, id, priority
        );
        QueueShared::dispatch(&self.shared);
        Ok(QueueTicket { id, receiver: rx })
    }

    /// Change the concurrency limit (clamped to [1, 10]) and fill any
    /// newly freed slots.
    pub fn set_max_concurrency(&self, requested: usize) {
        let clamped = clamp_concurrency(requested);
        if clamped != requested {
            warn!(
                target: "workbridge::queue",
                "maxConcurrency {} clamped to {}",
                requested, clamped
            );
        }
        self.shared.lock().max_concurrency = clamped;
        QueueShared::dispatch(&self.shared);
    }

    pub fn max_concurrency(&self) -> usize {
        self.shared.lock().max_concurrency
    }

    /// Reject every queued operation (and every operation waiting out a
    /// retry delay) with `Cleared`. Running operations are untouched.
    ///
    /// Returns the number of queued operations rejected.
    pub fn clear(&self) -> usize {
        let mut cleared: Vec<QueuedOperation> = {
            let mut inner = self.shared.lock();
            let cleared: Vec<QueuedOperation> = inner
                .tiers
                .iter_mut()
                .flat_map(|tier| tier.drain(..))
                .collect();
            inner.stats.record_cleared(cleared.len());
            cleared
        };
        let count = cleared.len();
        for operation in &mut cleared {
            operation.resolve(Err(BridgeError::Cleared));
        }
        if let Some(scheduler) = self.shared.scheduler.get() {
            let _ = scheduler.send(SchedulerCommand::Clear);
        }
        if count > 0 {
            info!(target: "workbridge::queue", "Cleared {} queued operations", count);
        }
        QueueShared::dispatch(&self.shared);
        count
    }

    /// Stop accepting work, clear what is queued, then wait for in-flight
    /// operations to finish.
    ///
    /// Returns `false` if `timeout` elapsed with operations still running.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.shared.lock().accepting = false;
        self.clear();

        let deadline = Instant::now() + timeout;
        loop {
            let running = self.shared.lock().running.len();
            if running == 0 {
                info!(target: "workbridge::queue", "Queue shut down cleanly");
                return true;
            }
            if Instant::now() >= deadline {
                warn!(
                    target: "workbridge::queue",
                    "Queue shutdown timed out after {:?} with {} operations in flight",
                    timeout, running
                );
                return false;
            }
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.lock().accepting
    }

    /// Wait until nothing is queued, parked for retry, or running.
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.shared.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.lock().is_idle() {
                return;
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        {
            let inner = self.shared.lock();
            inner.stats.fill(&mut stats);
            stats.queued_high = inner.tiers[Priority::High.index()].len();
            stats.queued_normal = inner.tiers[Priority::Normal.index()].len();
            stats.queued_low = inner.tiers[Priority::Low.index()].len();
            stats.running = inner.running.len();
            stats.scheduled_retries = inner.scheduled;
            stats.max_concurrency = inner.max_concurrency;
            stats.dead_letters = inner.dead_letters.len();
        }
        stats.by_kind = self.shared.kinds.snapshot();
        stats
    }

    pub fn breakdown(&self) -> QueueBreakdown {
        let inner = self.shared.lock();
        let tier = |priority: Priority| -> Vec<OperationSnapshot> {
            inner.tiers[priority.index()]
                .iter()
                .map(QueuedOperation::snapshot)
                .collect()
        };
        let mut running: Vec<OperationSnapshot> = inner.running.values().cloned().collect();
        running.sort_by_key(|op| op.id);
        QueueBreakdown {
            high: tier(Priority::High),
            normal: tier(Priority::Normal),
            low: tier(Priority::Low),
            running,
            scheduled_retries: inner.scheduled,
        }
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.shared.lock().dead_letters.entries()
    }
}

impl QueueShared {
    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner.lock().recover_poison("queue state")
    }

    /// Fill free slots, HIGH first, then NORMAL, then LOW.
    fn dispatch(shared: &Arc<Self>) {
        let (executor, runnable, idle) = {
            let mut inner = shared.lock();
            let Some(executor) = inner.executor.clone() else {
                return;
            };
            let mut runnable = Vec::new();
            while inner.running.len() < inner.max_concurrency {
                let Some(operation) = inner.pop_next() else {
                    break;
                };
                inner.running.insert(operation.id, operation.snapshot());
                runnable.push(operation);
            }
            let running = inner.running.len();
            inner.stats.observe_running(running);
            (executor, runnable, inner.is_idle())
        };

        for operation in runnable {
            tokio::spawn(Self::execute(shared.clone(), executor.clone(), operation));
        }
        if idle {
            shared.drained.notify_waiters();
        }
    }

    async fn execute(shared: Arc<Self>, executor: Executor, operation: QueuedOperation) {
        let started = Instant::now();
        let kind = operation.kind();
        shared
            .lock()
            .stats
            .record_wait(started.duration_since(operation.ready_since));

        debug!(
            target: "workbridge::queue",
            "Executing {} op#{} (attempt {})",
            kind,
            operation.id,
            operation.retry_count + 1
        );

        // The executor runs in its own task so a panic surfaces as a
        // JoinError instead of unwinding through the dispatch path.
        let mut handle = tokio::spawn(executor(operation.message.clone(), operation.timeout));
        let outcome = match tokio::time::timeout(operation.timeout + BACKSTOP_GRACE, &mut handle).await
        {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(BridgeError::config(format!(
                "executor failed for {} op#{}: {}",
                kind, operation.id, join_error
            ))),
            Err(_) => {
                handle.abort();
                Err(BridgeError::Timeout {
                    kind,
                    timeout_ms: operation.timeout.as_millis() as u64,
                })
            }
        };

        Self::complete(&shared, operation, outcome, started.elapsed());
    }

    fn complete(
        shared: &Arc<Self>,
        mut operation: QueuedOperation,
        outcome: BridgeResult<Frame>,
        run_time: Duration,
    ) {
        let kind = operation.kind();
        match outcome {
            Ok(frame) => {
                {
                    let mut inner = shared.lock();
                    inner.running.remove(&operation.id);
                    inner.stats.record_run(run_time);
                    inner.stats.record_completed();
                }
                shared.kinds.update(kind, |s| s.completed += 1);
                operation.resolve(Ok(frame));
            }
            Err(error) if error.is_retryable() && operation.retry_count < operation.max_retries => {
                let delay = shared.retry_policy.delay(operation.retry_count);
                operation.retry_count += 1;
                {
                    let mut inner = shared.lock();
                    inner.running.remove(&operation.id);
                    inner.stats.record_run(run_time);
                    inner.stats.record_retried();
                    inner.scheduled += 1;
                }
                shared.kinds.update(kind, |s| s.retried += 1);
                warn!(
                    target: "workbridge::queue",
                    "{} op#{} failed ({}), retry {}/{} scheduled",
                    kind, operation.id, error, operation.retry_count, operation.max_retries
                );
                Self::schedule_retry(shared, operation, delay);
            }
            Err(error) => {
                {
                    let mut inner = shared.lock();
                    inner.running.remove(&operation.id);
                    inner.stats.record_run(run_time);
                    inner.stats.record_failed();
                    inner
                        .dead_letters
                        .push(operation.snapshot(), error.clone());
                }
                shared.kinds.update(kind, |s| s.failed += 1);
                warn!(
                    target: "workbridge::queue",
                    "{} op#{} dead-lettered after {} retries: {}",
                    kind, operation.id, operation.retry_count, error
                );
                operation.resolve(Err(error));
            }
        }
        Self::dispatch(shared);
    }

    fn schedule_retry(shared: &Arc<Self>, operation: QueuedOperation, delay: Duration) {
        let scheduler = shared
            .scheduler
            .get_or_init(|| spawn_scheduler(Arc::downgrade(shared)));
        if let Err(mpsc_error) = scheduler.send(SchedulerCommand::Schedule { operation, delay }) {
            let SchedulerCommand::Schedule { operation, .. } = mpsc_error.0 else {
                return;
            };
            shared.reject_parked(vec![operation], BridgeError::Shutdown);
        }
    }

    /// Put a retried operation back at the front of its tier.
    ///
    /// Sustained transient failures in the HIGH tier keep it non-empty,
    /// which can starve the NORMAL and LOW tiers until those retries run
    /// out.
    pub(crate) fn requeue(shared: &Arc<Self>, mut operation: QueuedOperation) {
        let rejected = {
            let mut inner = shared.lock();
            inner.scheduled = inner.scheduled.saturating_sub(1);
            if inner.accepting {
                operation.ready_since = Instant::now();
                inner.tiers[operation.priority.index()].push_front(operation);
                None
            } else {
                Some(operation)
            }
        };
        if let Some(mut operation) = rejected {
            operation.resolve(Err(BridgeError::Shutdown));
        }
        Self::dispatch(shared);
    }

    /// Resolve operations that left the retry scheduler without running.
    pub(crate) fn reject_parked(&self, operations: Vec<QueuedOperation>, error: BridgeError) {
        if operations.is_empty() {
            return;
        }
        let idle = {
            let mut inner = self.lock();
            inner.scheduled = inner.scheduled.saturating_sub(operations.len());
            inner.stats.record_cleared(operations.len());
            inner.is_idle()
        };
        for mut operation in operations {
            operation.resolve(Err(error.clone()));
        }
        if idle {
            self.drained.notify_waiters();
        }
    }
}

fn clamp_concurrency(requested: usize) -> usize {
    requested.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageKind, Payload};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings() -> QueueSettings {
        QueueSettings {
            max_concurrency: 1,
            retry_base_delay_ms: 10,
            retry_max_delay_ms: 40,
            ..QueueSettings::default()
        }
    }

    fn health() -> Message {
        Message::new(Payload::empty(MessageKind::Health))
    }

    fn ok_reply(message: &Message) -> BridgeResult<Frame> {
        Ok(message
            .to_frame(None)
            .reply(Payload::empty(MessageKind::Health)))
    }

    #[tokio::test]
    async fn enqueue_without_executor_is_a_configuration_error() {
        let queue = MessageQueue::new(&settings());
        let result = queue.enqueue(health(), Priority::Normal, None).await;
        assert!(matches!(result, Err(BridgeError::Config(_))));
        assert_eq!(queue.stats().total_enqueued, 0);
    }

    #[tokio::test]
    async fn successful_operation_resolves_and_counts() {
        let queue = MessageQueue::new(&settings());
        queue.set_executor(|message, _timeout| async move { ok_reply(&message) });

        let frame = queue
            .enqueue(health(), Priority::High, None)
            .await
            .expect("should succeed");
        assert_eq!(frame.kind(), MessageKind::Health);

        let stats = queue.stats();
        assert_eq!(stats.total_enqueued, 1);
        assert_eq!(stats.total_completed, 1);
        assert_eq!(stats.running, 0);
        assert_eq!(stats.by_kind["health"].completed, 1);
    }

    #[tokio::test]
    async fn concurrency_is_clamped() {
        let queue = MessageQueue::new(&settings());
        queue.set_max_concurrency(0);
        assert_eq!(queue.max_concurrency(), 1);
        queue.set_max_concurrency(42);
        assert_eq!(queue.max_concurrency(), 10);
    }

    #[tokio::test]
    async fn panicking_executor_fails_terminally_without_leaking_slot() {
        let queue = MessageQueue::new(&settings());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        queue.set_executor(move |message: Message, _timeout| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    panic!("executor bug");
                }
                ok_reply(&message)
            }
        });

        let first = queue.enqueue(health(), Priority::Normal, None).await;
        assert!(matches!(first, Err(BridgeError::Config(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "panics are not retried");

        // The single slot must be free again.
        let second = queue.enqueue(health(), Priority::Normal, None).await;
        assert!(second.is_ok());
        assert_eq!(queue.dead_letters().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backstop_timeout_fires_for_hung_executor() {
        let queue = MessageQueue::new(&settings());
        queue.set_executor(|_message, _timeout| std::future::pending::<BridgeResult<Frame>>());

        let result = queue.enqueue(health(), Priority::Normal, Some(0)).await;
        assert!(matches!(
            result,
            Err(BridgeError::Timeout {
                kind: MessageKind::Health,
                ..
            })
        ));
        assert_eq!(queue.stats().running, 0);
    }

    #[tokio::test]
    async fn clear_rejects_queued_but_not_running() {
        let queue = MessageQueue::new(&settings());
        let gate = Arc::new(Notify::new());
        let release = gate.clone();
        queue.set_executor(move |message: Message, _timeout| {
            let gate = release.clone();
            async move {
                gate.notified().await;
                ok_reply(&message)
            }
        });

        let running = queue.submit(health(), Priority::Normal, None).unwrap();
        let queued = queue.submit(health(), Priority::Low, None).unwrap();
        tokio::task::yield_now().await;

        assert_eq!(queue.clear(), 1);
        assert_eq!(queued.wait().await, Err(BridgeError::Cleared));

        gate.notify_one();
        assert!(running.wait().await.is_ok());
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let queue = MessageQueue::new(&settings());
        queue.set_executor(|message, _timeout| async move { ok_reply(&message) });
        assert!(queue.shutdown(Duration::from_millis(100)).await);
        let result = queue.enqueue(health(), Priority::Normal, None).await;
        assert_eq!(result, Err(BridgeError::Shutdown));
    }
}
