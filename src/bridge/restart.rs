//! Restart rate limiting.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::BridgeSettings;
use crate::error::BridgeError;

/// Rolling-window restart budget with exponential delay.
///
/// At most `max_attempts` restarts are allowed inside `window`; once
/// exhausted the bridge stays crashed until the oldest attempt ages out.
#[derive(Debug)]
pub(crate) struct RestartBudget {
    max_attempts: u32,
    window: Duration,
    base_delay: Duration,
    max_delay: Duration,
    attempts: VecDeque<Instant>,
    total_attempts: u32,
}

impl RestartBudget {
    pub(crate) fn new(settings: &BridgeSettings) -> Self {
        Self {
            max_attempts: settings.max_restart_attempts,
            window: settings.restart_window(),
            base_delay: settings.restart_base_delay(),
            max_delay: settings.restart_max_delay(),
            attempts: VecDeque::new(),
            total_attempts: 0,
        }
    }

    /// Claim one attempt. Returns the attempt number within the window
    /// (starting at 1).
    pub(crate) fn try_acquire(&mut self, now: Instant) -> Result<u32, BridgeError> {
        while let Some(oldest) = self.attempts.front() {
            if now.duration_since(*oldest) < self.window {
                break;
            }
            self.attempts.pop_front();
        }
        if self.attempts.len() >= self.max_attempts as usize {
            return Err(BridgeError::RestartBudgetExhausted {
                attempts: self.max_attempts,
                window_ms: self.window.as_millis() as u64,
            });
        }
        self.attempts.push_back(now);
        self.total_attempts += 1;
        Ok(self.attempts.len() as u32)
    }

    /// Delay before attempt `attempt`: `min(base * 2^(attempt - 1), cap)`.
    pub(crate) fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub(crate) fn total_attempts(&self) -> u32 {
        self.total_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(max_attempts: u32) -> RestartBudget {
        RestartBudget::new(&BridgeSettings {
            max_restart_attempts: max_attempts,
            restart_window_ms: 60_000,
            restart_base_delay_ms: 100,
            restart_max_delay_ms: 1_000,
            ..BridgeSettings::default()
        })
    }

    #[test]
    fn budget_exhausts_within_window_and_recovers_after() {
        let mut budget = budget(2);
        let start = Instant::now();
        assert_eq!(budget.try_acquire(start), Ok(1));
        assert_eq!(budget.try_acquire(start + Duration::from_secs(1)), Ok(2));
        assert!(matches!(
            budget.try_acquire(start + Duration::from_secs(2)),
            Err(BridgeError::RestartBudgetExhausted { attempts: 2, .. })
        ));

        // First attempt ages out of the window.
        assert_eq!(budget.try_acquire(start + Duration::from_secs(61)), Ok(2));
        assert_eq!(budget.total_attempts(), 3);
    }

    #[test]
    fn delay_doubles_and_caps() {
        let budget = budget(5);
        assert_eq!(budget.delay_for(1), Duration::from_millis(100));
        assert_eq!(budget.delay_for(2), Duration::from_millis(200));
        assert_eq!(budget.delay_for(4), Duration::from_millis(800));
        assert_eq!(budget.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(budget.delay_for(64), Duration::from_millis(1_000));
    }
}
