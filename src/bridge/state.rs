//! Bridge lifecycle state machine.
//!
//! `Uninitialized -> Initializing -> Ready -> (Healthy <-> Degraded)
//! -> Crashed -> Restarting -> Ready`, with `ShutDown` terminal.

use std::fmt;

use serde::Serialize;

use crate::error::BridgeError;

/// Lifecycle phase of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgePhase {
    Uninitialized,
    /// Worker launched, waiting for its `ready` frame
    Initializing,
    /// Worker ready, no health check completed yet
    Ready,
    Healthy,
    /// Some health checks failed, below the crash threshold
    Degraded,
    Crashed,
    Restarting,
    ShutDown,
}

impl BridgePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            BridgePhase::Uninitialized => "uninitialized",
            BridgePhase::Initializing => "initializing",
            BridgePhase::Ready => "ready",
            BridgePhase::Healthy => "healthy",
            BridgePhase::Degraded => "degraded",
            BridgePhase::Crashed => "crashed",
            BridgePhase::Restarting => "restarting",
            BridgePhase::ShutDown => "shut_down",
        }
    }

    /// Whether the worker completed its handshake and is serving requests.
    pub fn is_ready(self) -> bool {
        matches!(
            self,
            BridgePhase::Ready | BridgePhase::Healthy | BridgePhase::Degraded
        )
    }
}

impl fmt::Display for BridgePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic record of the bridge's lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeState {
    pub initialized: bool,
    pub crashed: bool,
    pub restarting: bool,
    pub consecutive_health_failures: u32,
    /// Restart attempts since the bridge was created
    pub restart_attempts: u32,
    /// Unix milliseconds
    pub last_restart_time: Option<i64>,
    /// Unix milliseconds of the last successful probe
    pub last_health_check: Option<i64>,
}

/// What `send_message` does given the current phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SendAction {
    /// Hand the message to the queue
    Proceed,
    /// Start the worker first
    Initialize,
    Reject(BridgeError),
}

/// Decide how to handle an outbound message in `phase`.
///
/// A restart in flight still accepts work; the queue retries it once the
/// worker is back.
pub(crate) fn decide_send_action(phase: BridgePhase) -> SendAction {
    match phase {
        BridgePhase::Uninitialized | BridgePhase::Initializing => SendAction::Initialize,
        BridgePhase::Ready
        | BridgePhase::Healthy
        | BridgePhase::Degraded
        | BridgePhase::Restarting => SendAction::Proceed,
        BridgePhase::Crashed => SendAction::Reject(BridgeError::Crashed(
            "worker is down and no restart is in progress".to_string(),
        )),
        BridgePhase::ShutDown => SendAction::Reject(BridgeError::Shutdown),
    }
}

/// Phase after a health probe, given the failure streak.
pub(crate) fn phase_after_probe(consecutive_failures: u32, threshold: u32) -> BridgePhase {
    if consecutive_failures == 0 {
        BridgePhase::Healthy
    } else if consecutive_failures < threshold {
        BridgePhase::Degraded
    } else {
        BridgePhase::Crashed
    }
}
