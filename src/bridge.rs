//! Supervisor side of the worker bridge.
//!
//! The bridge owns the worker's lifecycle (start, health checks, crash
//! detection, restart) and the request/response correlation layer. All
//! caller traffic enters through `send_message`, which goes through the
//! [`MessageQueue`]; the queue's executor is the bridge's direct send
//! path.
//!
//! # Module Structure
//!
//! - `transport` - `WorkerLauncher` seam and the child-process launcher
//! - `reader` - per-generation reader task feeding inbound frames back
//! - `router` - pending request table keyed by correlation id
//! - `handlers` - bounded broadcast handler registry
//! - `validation` - inbound/outbound frame checks and the circuit breaker
//! - `state` - lifecycle phases and the send decision table
//! - `restart` - rolling-window restart budget
//! - `health` - health/recovery loops and the diagnostics snapshot

mod handlers;
mod health;
mod reader;
mod restart;
mod router;
mod state;
mod transport;
mod validation;

pub use handlers::{FrameHandler, HandlerId};
pub use health::{BridgeHealthStatus, HealthCheckOutcome};
pub use state::{BridgePhase, BridgeState};
pub use transport::{LaunchFuture, ProcessLauncher, WorkerLauncher, WorkerLink, WorkerProcess};
pub use validation::ValidationStats;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::BridgeSettings;
use crate::error::{BridgeError, BridgeResult, LockResultExt};
use crate::protocol::{
    CorrelationId, Frame, HealthPayload, Message, Payload, ReadyPayload, now_timestamp_ms,
};
use crate::queue::{MessageQueue, Priority, QueueBreakdown, QueueStats};

use handlers::HandlerRegistry;
use reader::ReaderTaskHandle;
use restart::RestartBudget;
use router::PendingRequests;
use state::{SendAction, decide_send_action, phase_after_probe};
use validation::FrameValidator;

/// Cheaply cloneable handle to one worker bridge.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

pub(crate) struct BridgeInner {
    settings: BridgeSettings,
    launcher: Arc<dyn WorkerLauncher>,
    queue: MessageQueue,
    lifecycle: Mutex<Lifecycle>,
    router: PendingRequests,
    handlers: HandlerRegistry,
    validator: FrameValidator,
    link: Mutex<Option<ActiveLink>>,
    /// Fired by the first uncorrelated `ready` frame of a generation
    ready_tx: Mutex<Option<oneshot::Sender<ReadyPayload>>>,
    /// Serializes worker startup between `initialize` and restarts
    init_lock: tokio::sync::Mutex<()>,
    background_started: AtomicBool,
    shutdown: CancellationToken,
    generation: AtomicU64,
}

struct Lifecycle {
    phase: BridgePhase,
    state: BridgeState,
    budget: RestartBudget,
}

/// The currently connected worker.
struct ActiveLink {
    generation: u64,
    outbound: mpsc::Sender<String>,
    process: Option<WorkerProcess>,
    _reader: ReaderTaskHandle,
}

impl Bridge {
    /// Create a bridge and register its direct send path as the queue's
    /// executor.
    ///
    /// The worker is not launched until `start()` or the first
    /// `send_message()`.
    pub fn new(
        settings: BridgeSettings,
        launcher: Arc<dyn WorkerLauncher>,
        queue: MessageQueue,
    ) -> Self {
        let inner = Arc::new(BridgeInner {
            lifecycle: Mutex::new(Lifecycle {
                phase: BridgePhase::Uninitialized,
                state: BridgeState::default(),
                budget: RestartBudget::new(&settings),
            }),
            router: PendingRequests::new(),
            handlers: HandlerRegistry::new(settings.max_handlers),
            validator: FrameValidator::new(&settings),
            link: Mutex::new(None),
            ready_tx: Mutex::new(None),
            init_lock: tokio::sync::Mutex::new(()),
            background_started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            generation: AtomicU64::new(0),
            settings,
            launcher,
            queue: queue.clone(),
        });

        let weak = Arc::downgrade(&inner);
        queue.set_executor(move |message: Message, timeout: Duration| {
            let bridge = weak.upgrade();
            async move {
                match bridge {
                    Some(inner) => inner.direct_send(message, timeout).await,
                    None => Err(BridgeError::Shutdown),
                }
            }
        });

        Self { inner }
    }

    /// Launch the worker and start the health and recovery loops.
    ///
    /// The loops are started even when the first launch fails, so the
    /// recovery loop can bring the worker up later.
    pub async fn start(&self) -> BridgeResult<()> {
        let result = self.inner.initialize().await;
        if !self.inner.shutdown.is_cancelled() {
            self.inner.start_background();
        }
        result
    }

    /// Launch the worker if it is not running yet.
    pub async fn initialize(&self) -> BridgeResult<()> {
        self.inner.initialize().await
    }

    /// Send a message through the queue and wait for the worker's answer.
    ///
    /// Lazily initializes the bridge. Fails fast while crashed with no
    /// restart in flight, and after shutdown.
    pub async fn send_message(&self, message: Message, priority: Priority) -> BridgeResult<Frame> {
        match decide_send_action(self.phase()) {
            SendAction::Proceed => {}
            SendAction::Initialize => self.inner.initialize().await?,
            SendAction::Reject(error) => return Err(error),
        }
        self.inner.queue.enqueue(message, priority, None).await
    }

    /// Send directly to the worker, bypassing the queue.
    pub async fn send_direct(&self, message: Message, timeout: Duration) -> BridgeResult<Frame> {
        self.inner.direct_send(message, timeout).await
    }

    /// Run one health probe now.
    pub async fn check_health(&self) -> HealthCheckOutcome {
        self.inner.run_health_check().await
    }

    /// Restart the worker.
    ///
    /// A no-op while another restart is in flight. Fails when the
    /// restart budget for the current window is spent.
    pub async fn attempt_restart(&self) -> BridgeResult<()> {
        self.inner.attempt_restart().await
    }

    /// Stop the worker and reject everything pending with `Shutdown`.
    ///
    /// Idempotent. Every later call on the bridge fails with `Shutdown`.
    pub async fn shutdown(&self) {
        {
            let mut lifecycle = self.inner.lifecycle();
            if lifecycle.phase == BridgePhase::ShutDown {
                return;
            }
            lifecycle.phase = BridgePhase::ShutDown;
            lifecycle.state.initialized = false;
        }
        self.inner.shutdown.cancel();
        self.inner.ready_tx.lock().recover_poison("ready signal").take();

        let rejected = self.inner.router.fail_all(BridgeError::Shutdown);
        self.inner.teardown_link().await;
        info!(
            target: "workbridge::bridge",
            "Bridge shut down ({} pending requests rejected)",
            rejected
        );
    }

    /// Register a handler for frames no pending request claims.
    ///
    /// Handlers survive worker restarts.
    pub fn add_handler<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.inner.handlers.add(Arc::new(handler))
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.inner.handlers.remove(id)
    }

    pub fn phase(&self) -> BridgePhase {
        self.inner.lifecycle().phase
    }

    pub fn state(&self) -> BridgeState {
        self.inner.lifecycle().state.clone()
    }

    /// True only when ready, not crashed, not restarting, and under the
    /// health failure threshold.
    pub fn is_healthy(&self) -> bool {
        self.inner.is_healthy()
    }

    pub fn health_status(&self) -> BridgeHealthStatus {
        let (phase, state) = {
            let lifecycle = self.inner.lifecycle();
            (lifecycle.phase, lifecycle.state.clone())
        };
        BridgeHealthStatus {
            phase,
            healthy: self.is_healthy(),
            state,
            pending_requests: self.inner.router.pending_count(),
            handlers: self.inner.handlers.len(),
            validation: self.inner.validator.stats(),
            queue: self.inner.queue.stats(),
        }
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.inner.queue
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.inner.queue.stats()
    }

    pub fn queue_breakdown(&self) -> QueueBreakdown {
        self.inner.queue.breakdown()
    }

    /// OS process id of the current worker, if it runs as a child process.
    pub fn worker_pid(&self) -> Option<u32> {
        self.inner
            .link
            .lock()
            .recover_poison("worker link")
            .as_ref()
            .and_then(|link| link.process.as_ref())
            .and_then(WorkerProcess::id)
    }
}

impl BridgeInner {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().recover_poison("bridge lifecycle")
    }

    fn is_healthy(&self) -> bool {
        let lifecycle = self.lifecycle();
        lifecycle.phase.is_ready()
            && !lifecycle.state.crashed
            && !lifecycle.state.restarting
            && lifecycle.state.consecutive_health_failures < self.settings.health_failure_threshold
    }

    fn needs_recovery(&self) -> bool {
        let lifecycle = self.lifecycle();
        lifecycle.phase == BridgePhase::Crashed && !lifecycle.state.restarting
    }

    fn start_background(self: &Arc<Self>) {
        if self.background_started.swap(true, Ordering::SeqCst) {
            return;
        }
        health::spawn_health_loop(
            Arc::downgrade(self),
            self.settings.health_check_interval(),
            self.shutdown.clone(),
        );
        health::spawn_recovery_loop(
            Arc::downgrade(self),
            self.settings.recovery_poll_interval(),
            self.shutdown.clone(),
        );
    }

    async fn initialize(self: &Arc<Self>) -> BridgeResult<()> {
        let _guard = self.init_lock.lock().await;
        let phase = self.lifecycle().phase;
        match phase {
            phase if phase.is_ready() => return Ok(()),
            // The restart routine brings the worker back.
            BridgePhase::Restarting => return Ok(()),
            BridgePhase::ShutDown => return Err(BridgeError::Shutdown),
            _ => {}
        }
        self.start_worker().await?;
        self.start_background();
        Ok(())
    }

    /// Launch a worker generation and wait for its `ready` frame.
    ///
    /// Callers hold `init_lock`.
    async fn start_worker(self: &Arc<Self>) -> BridgeResult<()> {
        {
            let mut lifecycle = self.lifecycle();
            if lifecycle.phase != BridgePhase::Restarting {
                lifecycle.phase = BridgePhase::Initializing;
            }
        }
        let (ready_tx, ready_rx) = oneshot::channel();
        *self.ready_tx.lock().recover_poison("ready signal") = Some(ready_tx);

        let link = match self.launcher.launch().await {
            Ok(link) => link,
            Err(BridgeError::Initialization(reason)) => return Err(self.fail_startup(reason).await),
            Err(e) => return Err(self.fail_startup(e.to_string()).await),
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let WorkerLink {
            outbound,
            inbound,
            process,
        } = link;
        let pid = process.as_ref().and_then(WorkerProcess::id);
        {
            // The reader may see EOF at once; it must find this generation
            // installed, so the slot stays locked until the link is stored.
            let mut slot = self.link.lock().recover_poison("worker link");
            let reader = reader::spawn_reader_task(inbound, Arc::downgrade(self), generation);
            *slot = Some(ActiveLink {
                generation,
                outbound,
                process,
                _reader: reader,
            });
        }

        let startup_timeout = self.settings.startup_timeout();
        let ready = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(BridgeError::Shutdown),
            ready = tokio::time::timeout(startup_timeout, ready_rx) => ready,
        };
        match ready {
            Ok(Ok(ready)) => {
                {
                    let mut lifecycle = self.lifecycle();
                    if lifecycle.phase == BridgePhase::ShutDown {
                        return Err(BridgeError::Shutdown);
                    }
                    lifecycle.phase = BridgePhase::Ready;
                    lifecycle.state.initialized = true;
                    lifecycle.state.crashed = false;
                    lifecycle.state.restarting = false;
                    lifecycle.state.consecutive_health_failures = 0;
                }
                info!(
                    target: "workbridge::bridge",
                    "Worker generation {} ready (pid {:?}, version {})",
                    generation,
                    ready.pid.or(pid),
                    ready.version.as_deref().unwrap_or("unknown")
                );
                Ok(())
            }
            Ok(Err(_)) => Err(self
                .fail_startup("worker exited before signalling ready".to_string())
                .await),
            Err(_) => Err(self
                .fail_startup(format!("no ready frame within {:?}", startup_timeout))
                .await),
        }
    }

    async fn fail_startup(&self, reason: String) -> BridgeError {
        self.ready_tx.lock().recover_poison("ready signal").take();
        self.teardown_link().await;
        {
            let mut lifecycle = self.lifecycle();
            if lifecycle.phase != BridgePhase::ShutDown {
                lifecycle.phase = BridgePhase::Crashed;
                lifecycle.state.crashed = true;
            }
            lifecycle.state.initialized = false;
            lifecycle.state.restarting = false;
        }
        error!(target: "workbridge::bridge", "Worker startup failed: {}", reason);
        BridgeError::Initialization(reason)
    }

    /// Drop the current link and terminate its process.
    async fn teardown_link(&self) {
        let link = self.link.lock().recover_poison("worker link").take();
        let Some(ActiveLink {
            generation,
            outbound,
            process,
            _reader: reader,
        }) = link
        else {
            return;
        };
        drop(reader);
        drop(outbound);
        if let Some(process) = process {
            process.terminate().await;
        }
        debug!(target: "workbridge::bridge", "Worker generation {} torn down", generation);
    }

    /// The queue's executor: validate, correlate, transmit, and await the
    /// response or the request timer.
    async fn direct_send(self: &Arc<Self>, message: Message, timeout: Duration) -> BridgeResult<Frame> {
        if self.shutdown.is_cancelled() {
            return Err(BridgeError::Shutdown);
        }
        if let Err(e) = message.validate() {
            self.validator.record_failure(&e);
            return Err(e);
        }

        let outbound = self
            .link
            .lock()
            .recover_poison("worker link")
            .as_ref()
            .map(|link| link.outbound.clone())
            .ok_or_else(|| BridgeError::transport("connection reset: worker link unavailable"))?;

        let kind = message.kind();
        let id = CorrelationId::generate();
        let encoded = message.to_frame(Some(id.clone())).encode()?;
        if let Err(e) = self.validator.check_size(encoded.len()) {
            self.validator.record_failure(&e);
            return Err(e);
        }

        let Some(response) = self.router.register(id.clone(), kind) else {
            return Err(BridgeError::config(format!("correlation id {} already pending", id)));
        };
        let bridge = Arc::downgrade(self);
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = bridge.upgrade()
                && inner.router.expire(&timer_id, timeout)
            {
                debug!(
                    target: "workbridge::bridge",
                    "{} request {} expired after {:?}",
                    kind, timer_id, timeout
                );
            }
        });
        self.router.attach_timer(&id, timer);

        if outbound.send(encoded).await.is_err() {
            self.router.remove(&id);
            return Err(BridgeError::transport("connection reset: worker link closed"));
        }
        debug!(target: "workbridge::bridge", "Sent {} request {}", kind, id);

        response.await.unwrap_or(Err(BridgeError::Shutdown))
    }

    /// Handle one raw inbound frame from the reader task.
    fn handle_raw_frame(&self, raw: &str) {
        // Failures are counted and logged by the validator; the frame is dropped.
        let Ok(frame) = self.validator.parse_inbound(raw) else {
            return;
        };
        let Some(frame) = self.router.route(frame) else {
            return;
        };

        if frame.correlation_id.is_none()
            && let Payload::Ready(ready) = &frame.body
            && let Some(ready_tx) = self.ready_tx.lock().recover_poison("ready signal").take()
        {
            let _ = ready_tx.send(ready.clone());
            return;
        }

        if let Some(id) = &frame.correlation_id {
            debug!(
                target: "workbridge::bridge",
                "No pending request for {} frame {}, broadcasting",
                frame.kind(),
                id
            );
        }
        self.handlers.broadcast(&frame);
    }

    /// Reader task saw end-of-stream for `generation`.
    fn on_link_closed(self: &Arc<Self>, generation: u64) {
        let current = self
            .link
            .lock()
            .recover_poison("worker link")
            .as_ref()
            .map(|link| link.generation);
        if current != Some(generation) || self.shutdown.is_cancelled() {
            return;
        }

        // Startup in progress: fail it instead of restarting.
        if self.ready_tx.lock().recover_poison("ready signal").take().is_some() {
            return;
        }

        {
            let mut lifecycle = self.lifecycle();
            if !lifecycle.phase.is_ready() {
                return;
            }
            lifecycle.phase = BridgePhase::Crashed;
            lifecycle.state.crashed = true;
        }
        warn!(
            target: "workbridge::bridge",
            "Worker generation {} exited unexpectedly, restarting",
            generation
        );
        self.spawn_restart();
    }

    fn spawn_restart(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = inner.attempt_restart().await {
                warn!(target: "workbridge::bridge", "Restart failed: {}", e);
            }
        });
    }

    async fn attempt_restart(self: &Arc<Self>) -> BridgeResult<()> {
        let (attempt, delay) = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.state.restarting {
                debug!(target: "workbridge::bridge", "Restart already in progress");
                return Ok(());
            }
            if lifecycle.phase == BridgePhase::ShutDown {
                return Err(BridgeError::Shutdown);
            }
            match lifecycle.budget.try_acquire(Instant::now()) {
                Ok(attempt) => {
                    lifecycle.phase = BridgePhase::Restarting;
                    lifecycle.state.restarting = true;
                    lifecycle.state.restart_attempts = lifecycle.budget.total_attempts();
                    lifecycle.state.last_restart_time = Some(now_timestamp_ms());
                    (attempt, lifecycle.budget.delay_for(attempt))
                }
                Err(exhausted) => {
                    lifecycle.phase = BridgePhase::Crashed;
                    lifecycle.state.crashed = true;
                    drop(lifecycle);
                    self.router
                        .fail_all(BridgeError::Crashed(exhausted.to_string()));
                    error!(
                        target: "workbridge::bridge",
                        "Giving up on worker restarts: {}",
                        exhausted
                    );
                    return Err(exhausted);
                }
            }
        };

        let handler_ids = self.handlers.ids();
        let rejected = self.router.fail_all(BridgeError::Restarting);
        self.teardown_link().await;
        info!(
            target: "workbridge::bridge",
            "Restarting worker in {:?} (attempt {} in window, {} pending requests rejected)",
            delay, attempt, rejected
        );

        let cancelled = tokio::select! {
            _ = self.shutdown.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        };
        if cancelled {
            self.lifecycle().state.restarting = false;
            return Err(BridgeError::Shutdown);
        }

        let result = {
            let _guard = self.init_lock.lock().await;
            self.start_worker().await
        };
        result?;

        let current = self.handlers.ids();
        let lost = handler_ids.iter().filter(|id| !current.contains(id)).count();
        if lost > 0 {
            warn!(
                target: "workbridge::bridge",
                "{} handlers were removed during restart",
                lost
            );
        }
        info!(target: "workbridge::bridge", "Worker restarted ({} handlers kept)", current.len());
        Ok(())
    }

    async fn run_health_check(self: &Arc<Self>) -> HealthCheckOutcome {
        {
            let lifecycle = self.lifecycle();
            if lifecycle.state.restarting || lifecycle.state.crashed || !lifecycle.phase.is_ready() {
                return HealthCheckOutcome::Skipped;
            }
        }

        let probe = Message::new(Payload::Health(HealthPayload::default()));
        let result = self
            .direct_send(probe, self.settings.health_check_timeout())
            .await;

        let threshold = self.settings.health_failure_threshold;
        let mut lifecycle = self.lifecycle();
        // A crash or restart may have raced the probe.
        if lifecycle.state.restarting || lifecycle.state.crashed || !lifecycle.phase.is_ready() {
            return HealthCheckOutcome::Skipped;
        }
        match result {
            Ok(_) => {
                lifecycle.state.consecutive_health_failures = 0;
                lifecycle.state.last_health_check = Some(now_timestamp_ms());
                lifecycle.phase = BridgePhase::Healthy;
                HealthCheckOutcome::Passed
            }
            Err(e) => {
                lifecycle.state.consecutive_health_failures += 1;
                let consecutive = lifecycle.state.consecutive_health_failures;
                let phase = phase_after_probe(consecutive, threshold);
                lifecycle.phase = phase;
                if phase != BridgePhase::Crashed {
                    warn!(
                        target: "workbridge::bridge::health",
                        "Health check failed ({}/{}): {}",
                        consecutive, threshold, e
                    );
                    return HealthCheckOutcome::Failed { consecutive };
                }
                lifecycle.state.crashed = true;
                drop(lifecycle);
                error!(
                    target: "workbridge::bridge::health",
                    "{} consecutive health checks failed, restarting worker: {}",
                    consecutive, e
                );
                self.spawn_restart();
                HealthCheckOutcome::Crashed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueSettings;
    use crate::protocol::{MessageKind, StatusPayload};

    /// Launcher whose worker never starts.
    struct FailingLauncher;

    impl WorkerLauncher for FailingLauncher {
        fn launch(&self) -> LaunchFuture<'_> {
            Box::pin(async {
                Err::<WorkerLink, _>(BridgeError::Initialization("no worker binary".to_string()))
            })
        }
    }

    /// Launcher whose worker signals ready and echoes every request back.
    struct EchoLauncher;

    impl WorkerLauncher for EchoLauncher {
        fn launch(&self) -> LaunchFuture<'_> {
            Box::pin(async {
                let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(16);
                let (inbound_tx, inbound_rx) = mpsc::channel::<String>(16);
                tokio::spawn(async move {
                    let ready = Frame::broadcast(None, Payload::Ready(ReadyPayload::default()));
                    let Ok(ready) = ready.encode() else { return };
                    if inbound_tx.send(ready).await.is_err() {
                        return;
                    }
                    while let Some(raw) = outbound_rx.recv().await {
                        let Ok(request) = Frame::parse(&raw) else { continue };
                        let Ok(reply) = request.reply(request.body.clone()).encode() else {
                            continue;
                        };
                        if inbound_tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                });
                Ok::<_, BridgeError>(WorkerLink::detached(outbound_tx, inbound_rx))
            })
        }
    }

    fn bridge(launcher: Arc<dyn WorkerLauncher>) -> Bridge {
        let settings = BridgeSettings {
            startup_timeout_ms: 1_000,
            ..BridgeSettings::default()
        };
        Bridge::new(settings, launcher, MessageQueue::new(&QueueSettings::default()))
    }

    #[tokio::test]
    async fn new_bridge_registers_queue_executor() {
        let bridge = bridge(Arc::new(EchoLauncher));
        assert!(bridge.queue().has_executor());
        assert_eq!(bridge.phase(), BridgePhase::Uninitialized);
        assert!(!bridge.is_healthy());
    }

    #[tokio::test]
    async fn failed_launch_leaves_bridge_crashed() {
        let bridge = bridge(Arc::new(FailingLauncher));
        let err = bridge.initialize().await.unwrap_err();
        assert!(matches!(err, BridgeError::Initialization(_)));
        assert_eq!(bridge.phase(), BridgePhase::Crashed);
        assert!(bridge.state().crashed);

        let rejected = bridge
            .send_message(
                Message::for_entity("app", Payload::Status(StatusPayload::default())),
                Priority::Normal,
            )
            .await;
        assert!(matches!(rejected, Err(BridgeError::Crashed(_))));
    }

    #[tokio::test]
    async fn send_message_initializes_lazily_and_correlates() {
        let bridge = bridge(Arc::new(EchoLauncher));
        let reply = bridge
            .send_message(
                Message::for_entity("app", Payload::Status(StatusPayload::default())),
                Priority::High,
            )
            .await
            .expect("echo worker answers");
        assert_eq!(reply.kind(), MessageKind::Status);
        assert_eq!(reply.entity_id.as_deref(), Some("app"));
        assert_eq!(bridge.phase(), BridgePhase::Ready);
        assert!(bridge.is_healthy());
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_outbound_message_is_rejected_before_transmission() {
        let bridge = bridge(Arc::new(EchoLauncher));
        bridge.initialize().await.expect("echo worker starts");
        let err = bridge
            .send_direct(
                Message::new(Payload::Status(StatusPayload::default())),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
        assert_eq!(bridge.health_status().validation.total_errors, 1);
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn health_check_passes_against_echo_worker() {
        let bridge = bridge(Arc::new(EchoLauncher));
        assert_eq!(bridge.check_health().await, HealthCheckOutcome::Skipped);
        bridge.initialize().await.expect("echo worker starts");
        assert_eq!(bridge.check_health().await, HealthCheckOutcome::Passed);
        assert_eq!(bridge.phase(), BridgePhase::Healthy);
        assert!(bridge.state().last_health_check.is_some());
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_terminal() {
        let bridge = bridge(Arc::new(EchoLauncher));
        bridge.start().await.expect("echo worker starts");
        bridge.shutdown().await;
        bridge.shutdown().await;
        assert_eq!(bridge.phase(), BridgePhase::ShutDown);
        let err = bridge
            .send_message(Message::new(Payload::Health(HealthPayload::default())), Priority::High)
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::Shutdown);
    }
}
