//! Frame validation and the validation circuit breaker.
//!
//! Every inbound frame is size-checked and parsed into a typed `Frame`.
//! Failures are counted in a rolling window; crossing the threshold opens
//! the circuit, which is logged and exposed in diagnostics but does not
//! crash the bridge by itself.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use serde::Serialize;

use crate::config::BridgeSettings;
use crate::error::{BridgeError, BridgeResult, LockResultExt};
use crate::protocol::Frame;

/// Validation counters exposed through `BridgeHealthStatus`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationStats {
    /// Failures inside the current window
    pub recent_errors: usize,
    pub total_errors: u64,
    pub circuit_open: bool,
}

struct ErrorWindow {
    failures: VecDeque<Instant>,
    total: u64,
    circuit_open: bool,
}

pub(crate) struct FrameValidator {
    max_frame_bytes: usize,
    threshold: usize,
    window: Duration,
    errors: Mutex<ErrorWindow>,
}

impl FrameValidator {
    pub(crate) fn new(settings: &BridgeSettings) -> Self {
        Self {
            max_frame_bytes: settings.max_frame_bytes,
            threshold: settings.validation_error_threshold.max(1) as usize,
            window: settings.validation_error_window(),
            errors: Mutex::new(ErrorWindow {
                failures: VecDeque::new(),
                total: 0,
                circuit_open: false,
            }),
        }
    }

    /// Size-check and parse one inbound frame, counting failures.
    pub(crate) fn parse_inbound(&self, raw: &str) -> BridgeResult<Frame> {
        let parsed = self
            .check_size(raw.len())
            .and_then(|()| Frame::parse(raw));
        if let Err(e) = &parsed {
            self.record_failure(e);
        }
        parsed
    }

    /// Reject frames larger than the configured maximum.
    pub(crate) fn check_size(&self, size: usize) -> BridgeResult<()> {
        if size > self.max_frame_bytes {
            return Err(BridgeError::FrameTooLarge {
                size,
                limit: self.max_frame_bytes,
            });
        }
        Ok(())
    }

    pub(crate) fn record_failure(&self, failure: &BridgeError) {
        let now = Instant::now();
        let mut errors = self.errors.lock().recover_poison("validation window");
        errors.total += 1;
        errors.failures.push_back(now);
        self.prune(&mut errors, now);

        let recent = errors.failures.len();
        warn!(
            target: "workbridge::bridge",
            "Frame validation failed ({} in window): {}",
            recent, failure
        );
        if recent >= self.threshold && !errors.circuit_open {
            errors.circuit_open = true;
            error!(
                target: "workbridge::bridge",
                "Validation circuit open: {} invalid frames within {:?}; worker malfunction or hostile input likely",
                recent, self.window
            );
        }
    }

    pub(crate) fn stats(&self) -> ValidationStats {
        let now = Instant::now();
        let mut errors = self.errors.lock().recover_poison("validation window");
        self.prune(&mut errors, now);
        ValidationStats {
            recent_errors: errors.failures.len(),
            total_errors: errors.total,
            circuit_open: errors.circuit_open,
        }
    }

    fn prune(&self, errors: &mut ErrorWindow, now: Instant) {
        while let Some(oldest) = errors.failures.front() {
            if now.duration_since(*oldest) <= self.window {
                break;
            }
            errors.failures.pop_front();
        }
        if errors.circuit_open && errors.failures.len() < self.threshold {
            errors.circuit_open = false;
            info!(target: "workbridge::bridge", "Validation circuit closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageKind;

    fn validator(threshold: u32, max_frame_bytes: usize) -> FrameValidator {
        FrameValidator::new(&BridgeSettings {
            validation_error_threshold: threshold,
            max_frame_bytes,
            ..BridgeSettings::default()
        })
    }

    #[test]
    fn valid_frame_parses_without_counting() {
        let validator = validator(3, 1024);
        let frame = validator
            .parse_inbound(r#"{"kind":"ready","timestamp":1}"#)
            .expect("ready frame is valid");
        assert_eq!(frame.kind(), MessageKind::Ready);
        assert_eq!(validator.stats().total_errors, 0);
    }

    #[test]
    fn oversized_frame_is_rejected_before_parsing() {
        let validator = validator(3, 16);
        let err = validator
            .parse_inbound(r#"{"kind":"ready","timestamp":1}"#)
            .unwrap_err();
        assert!(matches!(err, BridgeError::FrameTooLarge { limit: 16, .. }));
        assert_eq!(validator.stats().recent_errors, 1);
    }

    #[test]
    fn circuit_opens_at_threshold() {
        let validator = validator(3, 1024);
        for _ in 0..2 {
            assert!(validator.parse_inbound("garbage").is_err());
        }
        assert!(!validator.stats().circuit_open);

        assert!(validator.parse_inbound("{}").is_err());
        let stats = validator.stats();
        assert!(stats.circuit_open);
        assert_eq!(stats.recent_errors, 3);
        assert_eq!(stats.total_errors, 3);
    }
}
