//! Loop state and per-cycle reports.

use std::time::Duration;

use serde::Serialize;

use super::drift::DriftRecord;

/// Counters kept across cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationState {
    pub running: bool,
    pub paused: bool,
    /// Unix milliseconds of the last completed cycle
    pub last_run_timestamp: Option<i64>,
    pub consecutive_failures: u32,
    pub total_cycles: u64,
    pub total_drifts_detected: u64,
    pub total_drifts_fixed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum CycleOutcome {
    #[default]
    Completed,
    /// The worker was unhealthy when the cycle began
    Skipped,
    Failed { reason: String },
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    #[serde(flatten)]
    pub outcome: CycleOutcome,
    #[serde(serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub entities_checked: usize,
    pub drifts: Vec<DriftRecord>,
    pub drifts_fixed: usize,
    /// Failed status checks and failed store updates
    pub errors: usize,
}

impl CycleReport {
    pub fn drifts_detected(&self) -> usize {
        self.drifts.len()
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Failed { .. })
    }
}

fn serialize_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_serializes_outcome_inline() {
        let report = CycleReport {
            outcome: CycleOutcome::Failed {
                reason: "worker became unhealthy".to_string(),
            },
            duration: Duration::from_millis(42),
            entities_checked: 2,
            ..CycleReport::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["reason"], "worker became unhealthy");
        assert_eq!(json["duration"], 42);
        assert_eq!(json["entitiesChecked"], 2);
        assert!(report.is_failure());
    }
}
