//! State reconciliation loop.
//!
//! Periodically asks the worker for the real status of every tracked
//! entity, compares it to the status the supervisor expects, and corrects
//! the cached view. Cycles never overlap. Failed cycles back off
//! exponentially so an unhealthy worker is not hammered.
//!
//! # Module Structure
//!
//! - `collaborators` - `WorkerProbe`, `EntityStore`, `Notifier`, `MetricsSink` seams
//! - `drift` - `DriftRecord` and the notification decision table
//! - `report` - `ReconciliationState` counters and `CycleReport`

mod collaborators;
mod drift;
mod report;

pub use collaborators::{
    EntityStore, MetricsSink, Notifier, StatusFuture, StatusReport, TrackedEntity, WorkerProbe,
};
pub use drift::{DriftNotification, DriftRecord, notification_for};
pub use report::{CycleOutcome, CycleReport, ReconciliationState};

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::ReconcileSettings;
use crate::error::{BridgeError, BridgeResult, LockResultExt};
use crate::protocol::{EntityStatus, now_timestamp_ms};

/// Delay before the next cycle.
///
/// The base interval while healthy, otherwise
/// `min(interval * 2^failures, max_backoff)`.
pub fn next_delay(interval: Duration, consecutive_failures: u32, max_backoff: Duration) -> Duration {
    if consecutive_failures == 0 {
        return interval;
    }
    let factor = 1u32.checked_shl(consecutive_failures).unwrap_or(u32::MAX);
    interval.saturating_mul(factor).min(max_backoff.max(interval))
}

/// Cheaply cloneable handle to one reconciliation loop.
#[derive(Clone)]
pub struct ReconciliationLoop {
    inner: Arc<LoopInner>,
}

struct LoopInner {
    settings: ReconcileSettings,
    probe: Arc<dyn WorkerProbe>,
    store: Arc<dyn EntityStore>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<dyn MetricsSink>,
    state: Mutex<ReconciliationState>,
    /// Cancels the pending timer of the current run
    timer: Mutex<Option<CancellationToken>>,
    cycle_lock: tokio::sync::Mutex<()>,
}

impl ReconciliationLoop {
    pub fn new(
        settings: ReconcileSettings,
        probe: Arc<dyn WorkerProbe>,
        store: Arc<dyn EntityStore>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            inner: Arc::new(LoopInner {
                settings,
                probe,
                store,
                notifier,
                metrics,
                state: Mutex::new(ReconciliationState::default()),
                timer: Mutex::new(None),
                cycle_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Start cycling: one cycle right away, then on the configured cadence.
    ///
    /// Does nothing when disabled or already running.
    pub fn start(&self) {
        if !self.inner.settings.enabled {
            info!(target: "workbridge::reconcile", "Reconciliation disabled");
            return;
        }
        {
            let mut state = self.inner.state();
            if state.running {
                return;
            }
            state.running = true;
            state.paused = false;
        }
        info!(
            target: "workbridge::reconcile",
            "Reconciliation started (every {:?})",
            self.inner.settings.interval()
        );
        self.inner.arm();
    }

    /// Stop cycling. A cycle already in progress finishes.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state();
            if !state.running {
                return;
            }
            state.running = false;
            state.paused = false;
        }
        self.inner.disarm();
        info!(target: "workbridge::reconcile", "Reconciliation stopped");
    }

    /// Cancel the pending timer, keeping all counters.
    pub fn pause(&self) {
        {
            let mut state = self.inner.state();
            if !state.running || state.paused {
                return;
            }
            state.paused = true;
        }
        self.inner.disarm();
        debug!(target: "workbridge::reconcile", "Reconciliation paused");
    }

    /// Run one cycle immediately, then resume the normal cadence.
    pub fn resume(&self) {
        {
            let mut state = self.inner.state();
            if !state.running || !state.paused {
                return;
            }
            state.paused = false;
        }
        debug!(target: "workbridge::reconcile", "Reconciliation resumed");
        self.inner.arm();
    }

    /// Run one cycle now, waiting for any cycle in progress first.
    pub async fn run_cycle(&self) -> CycleReport {
        self.inner.run_cycle().await
    }

    pub fn state(&self) -> ReconciliationState {
        self.inner.state().clone()
    }

    /// Delay the loop would wait before its next cycle.
    pub fn current_delay(&self) -> Duration {
        self.inner.current_delay()
    }
}

impl LoopInner {
    fn state(&self) -> MutexGuard<'_, ReconciliationState> {
        self.state.lock().recover_poison("reconciliation state")
    }

    fn current_delay(&self) -> Duration {
        next_delay(
            self.settings.interval(),
            self.state().consecutive_failures,
            self.settings.max_backoff(),
        )
    }

    /// Spawn the timer task for a fresh run, replacing any previous one.
    fn arm(self: &Arc<Self>) {
        let token = CancellationToken::new();
        if let Some(previous) = self
            .timer
            .lock()
            .recover_poison("reconciliation timer")
            .replace(token.clone())
        {
            previous.cancel();
        }
        tokio::spawn(drive(Arc::downgrade(self), token));
    }

    fn disarm(&self) {
        if let Some(token) = self.timer.lock().recover_poison("reconciliation timer").take() {
            token.cancel();
        }
    }

    async fn run_cycle(&self) -> CycleReport {
        let _cycle = self.cycle_lock.lock().await;
        let started = Instant::now();
        let mut report = CycleReport::default();

        if !self.probe.is_healthy() {
            debug!(target: "workbridge::reconcile", "Worker unhealthy, skipping cycle");
            report.outcome = CycleOutcome::Skipped;
            report.duration = started.elapsed();
            self.metrics.track_cycle(&report);
            return report;
        }

        let result = self.check_entities(&mut report).await;
        report.duration = started.elapsed();

        {
            let mut state = self.state();
            state.total_cycles += 1;
            state.total_drifts_detected += report.drifts_detected() as u64;
            state.total_drifts_fixed += report.drifts_fixed as u64;
            match &result {
                Ok(()) => {
                    state.consecutive_failures = 0;
                    state.last_run_timestamp = Some(now_timestamp_ms());
                }
                Err(_) => state.consecutive_failures += 1,
            }
        }

        match result {
            Ok(()) => {
                if !report.drifts.is_empty() {
                    info!(
                        target: "workbridge::reconcile",
                        "Cycle found {} drifts, fixed {}",
                        report.drifts_detected(),
                        report.drifts_fixed
                    );
                }
            }
            Err(e) => {
                warn!(target: "workbridge::reconcile", "Reconciliation cycle failed: {}", e);
                report.outcome = CycleOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        }
        self.metrics.track_cycle(&report);
        report
    }

    async fn check_entities(&self, report: &mut CycleReport) -> BridgeResult<()> {
        let entities = self.store.entities()?;
        if entities.is_empty() {
            return Ok(());
        }

        let batch_size = self.settings.max_concurrent_checks.max(1);
        for batch in entities.chunks(batch_size) {
            let mut checks = JoinSet::new();
            for (index, entity) in batch.iter().enumerate() {
                let probe = Arc::clone(&self.probe);
                let entity_id = entity.id.clone();
                checks.spawn(async move { (index, probe.query_status(&entity_id).await) });
            }

            let mut results: Vec<Option<StatusReport>> = vec![None; batch.len()];
            let mut failed = 0;
            while let Some(joined) = checks.join_next().await {
                match joined {
                    Ok((index, Ok(status))) => results[index] = Some(status),
                    Ok((index, Err(e))) => {
                        failed += 1;
                        debug!(
                            target: "workbridge::reconcile",
                            "Status check for {} failed: {}",
                            batch[index].id, e
                        );
                    }
                    Err(e) => {
                        failed += 1;
                        warn!(target: "workbridge::reconcile", "Status check task failed: {}", e);
                    }
                }
            }
            report.entities_checked += batch.len();
            report.errors += failed;

            if failed == batch.len() && !self.probe.is_healthy() {
                return Err(BridgeError::Crashed(
                    "worker became unhealthy mid-cycle".to_string(),
                ));
            }

            for (entity, status) in batch.iter().zip(results) {
                let Some(status) = status else {
                    continue;
                };
                // The worker does not know the entity's state; nothing to compare.
                if status.status == EntityStatus::Unknown || status.status == entity.expected_status
                {
                    continue;
                }
                let drift = DriftRecord {
                    entity_id: entity.id.clone(),
                    expected_status: entity.expected_status,
                    actual_status: status.status,
                    error_message: status.error_message,
                    timestamp: now_timestamp_ms(),
                };
                self.correct(&drift, report);
                report.drifts.push(drift);
            }
        }
        Ok(())
    }

    fn correct(&self, drift: &DriftRecord, report: &mut CycleReport) {
        info!(
            target: "workbridge::reconcile",
            "Drift on {}: expected {}, worker reports {}",
            drift.entity_id, drift.expected_status, drift.actual_status
        );
        if !self.settings.auto_correct {
            return;
        }
        match self.store.update_status(
            &drift.entity_id,
            drift.actual_status,
            drift.error_message.as_deref(),
        ) {
            Ok(()) => {
                report.drifts_fixed += 1;
                if self.settings.notify_on_correction {
                    self.notifier.notify(&notification_for(drift));
                }
            }
            Err(e) => {
                report.errors += 1;
                warn!(
                    target: "workbridge::reconcile",
                    "Failed to correct {}: {}",
                    drift.entity_id, e
                );
            }
        }
    }
}

/// Timer task: run a cycle, wait the current delay, repeat until cancelled.
async fn drive(inner: Weak<LoopInner>, token: CancellationToken) {
    loop {
        if token.is_cancelled() {
            break;
        }
        let Some(strong) = inner.upgrade() else {
            break;
        };
        strong.run_cycle().await;
        let delay = strong.current_delay();
        drop(strong);

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::healthy(0, 30)]
    #[case::one_failure(1, 60)]
    #[case::two_failures(2, 120)]
    #[case::capped(4, 300)]
    #[case::huge_streak(40, 300)]
    fn delay_backs_off_and_caps(#[case] failures: u32, #[case] expected_secs: u64) {
        assert_eq!(
            next_delay(Duration::from_secs(30), failures, Duration::from_secs(300)),
            Duration::from_secs(expected_secs)
        );
    }

    #[test]
    fn cap_below_interval_never_shortens_the_interval() {
        assert_eq!(
            next_delay(Duration::from_secs(30), 2, Duration::from_secs(10)),
            Duration::from_secs(30)
        );
    }
}
