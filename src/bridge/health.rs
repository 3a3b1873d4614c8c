//! Health probing and restart recovery.
//!
//! Two background loops run once the bridge has started:
//! - the health loop probes the worker every `healthCheckIntervalMs`
//!   through the direct send path, bypassing the queue;
//! - the recovery loop retries `attempt_restart()` every
//!   `recoveryPollIntervalMs` while the bridge sits in `Crashed`.
//!
//! Both hold a weak reference to the bridge and stop on shutdown.

use std::sync::Weak;
use std::time::Duration;

use log::debug;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use super::BridgeInner;
use super::state::{BridgePhase, BridgeState};
use super::validation::ValidationStats;
use crate::queue::QueueStats;

/// Snapshot returned by `Bridge::health_status()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeHealthStatus {
    pub phase: BridgePhase,
    pub healthy: bool,
    pub state: BridgeState,
    pub pending_requests: usize,
    pub handlers: usize,
    pub validation: ValidationStats,
    pub queue: QueueStats,
}

/// Result of one health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthCheckOutcome {
    /// Not ready, crashed, or restarting
    Skipped,
    Passed,
    Failed { consecutive: u32 },
    /// The failure streak reached the threshold; a restart was scheduled
    Crashed,
}

pub(super) fn spawn_health_loop(
    bridge: Weak<BridgeInner>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(inner) = bridge.upgrade() else {
                        break;
                    };
                    let outcome = inner.run_health_check().await;
                    debug!(target: "workbridge::bridge::health", "Health check: {:?}", outcome);
                }
            }
        }
    })
}

pub(super) fn spawn_recovery_loop(
    bridge: Weak<BridgeInner>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(inner) = bridge.upgrade() else {
                        break;
                    };
                    if inner.needs_recovery()
                        && let Err(e) = inner.attempt_restart().await
                    {
                        debug!(target: "workbridge::bridge::health", "Recovery attempt skipped: {}", e);
                    }
                }
            }
        }
    })
}
