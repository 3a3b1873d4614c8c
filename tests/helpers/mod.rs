//! Shared test helpers for integration tests.
//!
//! Note: We use `helpers/mod.rs` instead of `helpers.rs` because Cargo
//! auto-discovers top-level `.rs` files in `tests/` as integration tests.

#![allow(dead_code)]

pub mod fake_worker;

use std::time::Duration;

/// Poll `condition` every 5ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
