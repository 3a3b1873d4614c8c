use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::defaults;
use crate::reconcile::TrackedEntity;

/// Top-level settings, one TOML table per component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkbridgeSettings {
    pub worker: WorkerSettings,
    pub queue: QueueSettings,
    pub bridge: BridgeSettings,
    pub reconcile: ReconcileSettings,
    /// Entities seeded into the in-memory store by the binary
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<TrackedEntity>,
}

/// How to launch the worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkerSettings {
    pub command: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            command: defaults::DEFAULT_WORKER_COMMAND.to_string(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueSettings {
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub dead_letter_capacity: usize,
    pub shutdown_timeout_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_concurrency: defaults::DEFAULT_MAX_CONCURRENCY,
            max_retries: defaults::DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: defaults::DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: defaults::DEFAULT_RETRY_MAX_DELAY_MS,
            dead_letter_capacity: defaults::DEFAULT_DEAD_LETTER_CAPACITY,
            shutdown_timeout_ms: defaults::DEFAULT_QUEUE_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl QueueSettings {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeSettings {
    pub max_frame_bytes: usize,
    pub startup_timeout_ms: u64,
    pub health_check_interval_ms: u64,
    pub health_check_timeout_ms: u64,
    pub health_failure_threshold: u32,
    pub max_restart_attempts: u32,
    pub restart_window_ms: u64,
    pub restart_base_delay_ms: u64,
    pub restart_max_delay_ms: u64,
    pub recovery_poll_interval_ms: u64,
    pub max_handlers: usize,
    pub validation_error_threshold: u32,
    pub validation_error_window_ms: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            max_frame_bytes: defaults::DEFAULT_MAX_FRAME_BYTES,
            startup_timeout_ms: defaults::DEFAULT_STARTUP_TIMEOUT_MS,
            health_check_interval_ms: defaults::DEFAULT_HEALTH_CHECK_INTERVAL_MS,
            health_check_timeout_ms: defaults::DEFAULT_HEALTH_CHECK_TIMEOUT_MS,
            health_failure_threshold: defaults::DEFAULT_HEALTH_FAILURE_THRESHOLD,
            max_restart_attempts: defaults::DEFAULT_MAX_RESTART_ATTEMPTS,
            restart_window_ms: defaults::DEFAULT_RESTART_WINDOW_MS,
            restart_base_delay_ms: defaults::DEFAULT_RESTART_BASE_DELAY_MS,
            restart_max_delay_ms: defaults::DEFAULT_RESTART_MAX_DELAY_MS,
            recovery_poll_interval_ms: defaults::DEFAULT_RECOVERY_POLL_INTERVAL_MS,
            max_handlers: defaults::DEFAULT_MAX_HANDLERS,
            validation_error_threshold: defaults::DEFAULT_VALIDATION_ERROR_THRESHOLD,
            validation_error_window_ms: defaults::DEFAULT_VALIDATION_ERROR_WINDOW_MS,
        }
    }
}

impl BridgeSettings {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn restart_window(&self) -> Duration {
        Duration::from_millis(self.restart_window_ms)
    }

    pub fn restart_base_delay(&self) -> Duration {
        Duration::from_millis(self.restart_base_delay_ms)
    }

    pub fn restart_max_delay(&self) -> Duration {
        Duration::from_millis(self.restart_max_delay_ms)
    }

    pub fn recovery_poll_interval(&self) -> Duration {
        Duration::from_millis(self.recovery_poll_interval_ms)
    }

    pub fn validation_error_window(&self) -> Duration {
        Duration::from_millis(self.validation_error_window_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconcileSettings {
    pub enabled: bool,
    pub interval_ms: u64,
    pub max_concurrent_checks: usize,
    pub auto_correct: bool,
    pub notify_on_correction: bool,
    pub max_backoff_ms: u64,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: defaults::DEFAULT_RECONCILE_INTERVAL_MS,
            max_concurrent_checks: defaults::DEFAULT_MAX_CONCURRENT_CHECKS,
            auto_correct: true,
            notify_on_correction: true,
            max_backoff_ms: defaults::DEFAULT_RECONCILE_MAX_BACKOFF_MS,
        }
    }
}

impl ReconcileSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}
