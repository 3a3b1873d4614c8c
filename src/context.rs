//! Application context: explicit construction and lifecycle of the
//! queue, bridge, job client, and reconciliation loop.

use std::sync::Arc;

use log::{info, warn};

use crate::bridge::{Bridge, ProcessLauncher, WorkerLauncher};
use crate::config::WorkbridgeSettings;
use crate::error::BridgeResult;
use crate::jobs::JobClient;
use crate::metrics::{LogMetrics, LogNotifier};
use crate::queue::MessageQueue;
use crate::reconcile::{MetricsSink, Notifier, ReconciliationLoop};
use crate::store::MemoryStore;

pub struct AppContext {
    settings: WorkbridgeSettings,
    queue: MessageQueue,
    bridge: Bridge,
    store: Arc<MemoryStore>,
    jobs: JobClient,
    reconciler: ReconciliationLoop,
}

impl AppContext {
    /// Context that runs the configured worker command as a child process.
    pub fn new(settings: WorkbridgeSettings) -> Self {
        let launcher = Arc::new(ProcessLauncher::new(settings.worker.clone()));
        Self::with_launcher(settings, launcher)
    }

    /// Context with log-backed notifications and metrics.
    pub fn with_launcher(settings: WorkbridgeSettings, launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self::with_collaborators(
            settings,
            launcher,
            Arc::new(LogNotifier),
            Arc::new(LogMetrics),
        )
    }

    pub fn with_collaborators(
        settings: WorkbridgeSettings,
        launcher: Arc<dyn WorkerLauncher>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let queue = MessageQueue::new(&settings.queue);
        let bridge = Bridge::new(settings.bridge.clone(), launcher, queue.clone());
        let store = Arc::new(MemoryStore::with_entities(settings.entities.clone()));
        let jobs = JobClient::new(bridge.clone(), store.clone());
        let reconciler = ReconciliationLoop::new(
            settings.reconcile.clone(),
            Arc::new(jobs.clone()),
            store.clone(),
            notifier,
            metrics,
        );
        Self {
            settings,
            queue,
            bridge,
            store,
            jobs,
            reconciler,
        }
    }

    /// Start the worker, then the reconciliation loop.
    ///
    /// The loop starts even if the worker does not; its cycles are
    /// skipped until the bridge recovers.
    pub async fn start(&self) -> BridgeResult<()> {
        let started = self.bridge.start().await;
        self.reconciler.start();
        started
    }

    /// Stop reconciliation, drain the queue, and stop the worker.
    pub async fn shutdown(&self) {
        self.reconciler.stop();
        let (drained, ()) = tokio::join!(
            self.queue.shutdown(self.settings.queue.shutdown_timeout()),
            self.bridge.shutdown()
        );
        if drained {
            info!(target: "workbridge::context", "Shutdown complete");
        } else {
            warn!(
                target: "workbridge::context",
                "Shutdown timed out with operations still in flight"
            );
        }
    }

    pub fn settings(&self) -> &WorkbridgeSettings {
        &self.settings
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn jobs(&self) -> &JobClient {
        &self.jobs
    }

    pub fn reconciler(&self) -> &ReconciliationLoop {
        &self.reconciler
    }
}
