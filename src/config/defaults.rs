//! Default configuration values for workbridge.
//!
//! These back the `Default` impls of the settings structs, so a missing
//! key in any TOML layer falls through to the value here.

use std::time::Duration;

use super::settings::WorkbridgeSettings;
use crate::protocol::MessageKind;

pub const DEFAULT_WORKER_COMMAND: &str = "workbridge-worker";

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 10;
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 100;
pub const DEFAULT_QUEUE_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_HEALTH_CHECK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_HEALTH_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_MAX_RESTART_ATTEMPTS: u32 = 5;
pub const DEFAULT_RESTART_WINDOW_MS: u64 = 5 * 60 * 1_000;
pub const DEFAULT_RESTART_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_RESTART_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_RECOVERY_POLL_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_MAX_HANDLERS: usize = 50;
pub const DEFAULT_VALIDATION_ERROR_THRESHOLD: u32 = 10;
pub const DEFAULT_VALIDATION_ERROR_WINDOW_MS: u64 = 60_000;

pub const DEFAULT_RECONCILE_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_MAX_CONCURRENT_CHECKS: usize = 5;
pub const DEFAULT_RECONCILE_MAX_BACKOFF_MS: u64 = 5 * 60 * 1_000;

/// Timeout for kinds missing from the table below.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Returns the default settings, used by `workbridge config` and as the
/// base layer of the settings merge.
pub fn default_settings() -> WorkbridgeSettings {
    WorkbridgeSettings::default()
}

/// Per-kind operation timeout.
///
/// Provisioning is slow (network + disk), status and log queries are
/// expected to answer within seconds.
pub fn operation_timeout(kind: MessageKind) -> Duration {
    match kind {
        MessageKind::Clone => Duration::from_secs(5 * 60),
        MessageKind::Start => Duration::from_secs(60),
        MessageKind::Stop => Duration::from_secs(30),
        MessageKind::Delete => Duration::from_secs(60),
        MessageKind::Restart => Duration::from_secs(60),
        MessageKind::Config => Duration::from_secs(15),
        MessageKind::Status => Duration::from_secs(10),
        MessageKind::Logs => Duration::from_secs(10),
        MessageKind::Health => Duration::from_secs(5),
        MessageKind::Ready | MessageKind::Error => DEFAULT_OPERATION_TIMEOUT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::clone(MessageKind::Clone, 300)]
    #[case::status(MessageKind::Status, 10)]
    #[case::logs(MessageKind::Logs, 10)]
    #[case::health(MessageKind::Health, 5)]
    #[case::unlisted(MessageKind::Ready, 30)]
    fn operation_timeout_follows_kind(#[case] kind: MessageKind, #[case] secs: u64) {
        assert_eq!(operation_timeout(kind), Duration::from_secs(secs));
    }

    #[test]
    fn default_settings_match_documented_values() {
        let settings = default_settings();
        assert_eq!(settings.queue.max_concurrency, 3);
        assert_eq!(settings.queue.max_retries, 3);
        assert_eq!(settings.bridge.health_failure_threshold, 3);
        assert_eq!(settings.bridge.max_frame_bytes, 1024 * 1024);
        assert_eq!(settings.reconcile.max_concurrent_checks, 5);
        assert!(settings.entities.is_empty());
    }

    #[test]
    fn default_settings_serializes_to_valid_toml() {
        let settings = default_settings();
        let toml_str = toml::to_string_pretty(&settings).expect("defaults should serialize");
        assert!(toml_str.contains("[queue]"));
        assert!(toml_str.contains("maxConcurrency = 3"));

        let parsed: WorkbridgeSettings = toml::from_str(&toml_str).expect("should parse back");
        assert_eq!(parsed, settings);
    }
}
