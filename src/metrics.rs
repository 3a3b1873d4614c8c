//! Log-backed notification and metrics sinks.

use log::{info, warn};

use crate::reconcile::{CycleOutcome, CycleReport, DriftNotification, MetricsSink, Notifier};

/// Writes drift notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &DriftNotification) {
        info!(
            target: "workbridge::metrics",
            "{}: {}",
            notification.title, notification.message
        );
    }
}

/// Writes one line per reconciliation cycle to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMetrics;

impl MetricsSink for LogMetrics {
    fn track_cycle(&self, report: &CycleReport) {
        let summary = format!(
            "duration={}ms checked={} drifts={} fixed={} errors={}",
            report.duration.as_millis(),
            report.entities_checked,
            report.drifts_detected(),
            report.drifts_fixed,
            report.errors
        );
        match &report.outcome {
            CycleOutcome::Completed => {
                info!(target: "workbridge::metrics", "reconcile.cycle ok {}", summary)
            }
            CycleOutcome::Skipped => {
                info!(target: "workbridge::metrics", "reconcile.cycle skipped {}", summary)
            }
            CycleOutcome::Failed { reason } => warn!(
                target: "workbridge::metrics",
                "reconcile.cycle failed {} reason={:?}",
                summary, reason
            ),
        }
    }
}
