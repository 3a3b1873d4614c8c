//! Queue statistics.
//!
//! Counters and rolling timing windows live under the queue lock; per-kind
//! counters live in a `DashMap` so they can be bumped from executor tasks
//! without taking it.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use super::OperationSnapshot;
use crate::protocol::MessageKind;

/// Number of wait/run samples kept for averages.
const STATS_WINDOW: usize = 100;

/// Snapshot returned by `MessageQueue::stats()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total_enqueued: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_retried: u64,
    pub total_cleared: u64,
    pub queued_high: usize,
    pub queued_normal: usize,
    pub queued_low: usize,
    pub running: usize,
    pub scheduled_retries: usize,
    pub peak_running: usize,
    pub max_concurrency: usize,
    pub dead_letters: usize,
    pub avg_wait_ms: f64,
    pub max_wait_ms: u64,
    pub avg_run_ms: f64,
    pub max_run_ms: u64,
    pub by_kind: BTreeMap<String, KindStats>,
}

impl QueueStats {
    pub fn queued(&self) -> usize {
        self.queued_high + self.queued_normal + self.queued_low
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindStats {
    pub enqueued: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
}

/// Per-tier view of what is waiting and what is running.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueBreakdown {
    pub high: Vec<OperationSnapshot>,
    pub normal: Vec<OperationSnapshot>,
    pub low: Vec<OperationSnapshot>,
    pub running: Vec<OperationSnapshot>,
    pub scheduled_retries: usize,
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    total_enqueued: u64,
    total_completed: u64,
    total_failed: u64,
    total_retried: u64,
    total_cleared: u64,
    peak_running: usize,
    wait_ms: VecDeque<u64>,
    run_ms: VecDeque<u64>,
}

impl StatsRecorder {
    pub(crate) fn record_enqueued(&mut self) {
        self.total_enqueued += 1;
    }

    pub(crate) fn record_completed(&mut self) {
        self.total_completed += 1;
    }

    pub(crate) fn record_failed(&mut self) {
        self.total_failed += 1;
    }

    pub(crate) fn record_retried(&mut self) {
        self.total_retried += 1;
    }

    pub(crate) fn record_cleared(&mut self, count: usize) {
        self.total_cleared += count as u64;
    }

    pub(crate) fn observe_running(&mut self, running: usize) {
        self.peak_running = self.peak_running.max(running);
    }

    pub(crate) fn record_wait(&mut self, wait: Duration) {
        push_sample(&mut self.wait_ms, wait);
    }

    pub(crate) fn record_run(&mut self, run: Duration) {
        push_sample(&mut self.run_ms, run);
    }

    /// Fill the counter and timing fields of `stats`.
    pub(crate) fn fill(&self, stats: &mut QueueStats) {
        stats.total_enqueued = self.total_enqueued;
        stats.total_completed = self.total_completed;
        stats.total_failed = self.total_failed;
        stats.total_retried = self.total_retried;
        stats.total_cleared = self.total_cleared;
        stats.peak_running = self.peak_running;
        (stats.avg_wait_ms, stats.max_wait_ms) = summarize(&self.wait_ms);
        (stats.avg_run_ms, stats.max_run_ms) = summarize(&self.run_ms);
    }
}

fn push_sample(window: &mut VecDeque<u64>, sample: Duration) {
    if window.len() == STATS_WINDOW {
        window.pop_front();
    }
    window.push_back(sample.as_millis() as u64);
}

fn summarize(window: &VecDeque<u64>) -> (f64, u64) {
    if window.is_empty() {
        return (0.0, 0);
    }
    let total: u64 = window.iter().sum();
    let max = window.iter().copied().max().unwrap_or_default();
    (total as f64 / window.len() as f64, max)
}

/// Lock-free per-kind counters.
#[derive(Debug, Default)]
pub(crate) struct KindCounters {
    counters: DashMap<MessageKind, KindStats>,
}

impl KindCounters {
    pub(crate) fn update(&self, kind: MessageKind, f: impl FnOnce(&mut KindStats)) {
        let mut entry = self.counters.entry(kind).or_default();
        f(entry.value_mut());
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<String, KindStats> {
        self.counters
            .iter()
            .map(|entry| (entry.key().as_str().to_string(), *entry.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_window_is_bounded() {
        let mut recorder = StatsRecorder::default();
        recorder.record_wait(Duration::from_millis(1_000));
        for _ in 0..STATS_WINDOW {
            recorder.record_wait(Duration::from_millis(10));
        }
        let mut stats = QueueStats::default();
        recorder.fill(&mut stats);
        assert_eq!(stats.max_wait_ms, 10, "oldest sample should be evicted");
        assert_eq!(stats.avg_wait_ms, 10.0);
    }

    #[test]
    fn kind_counters_accumulate() {
        let counters = KindCounters::default();
        counters.update(MessageKind::Status, |s| s.enqueued += 1);
        counters.update(MessageKind::Status, |s| s.completed += 1);
        counters.update(MessageKind::Clone, |s| s.failed += 1);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot["status"].enqueued, 1);
        assert_eq!(snapshot["status"].completed, 1);
        assert_eq!(snapshot["clone"].failed, 1);
    }
}
