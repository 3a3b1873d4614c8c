//! Drift records and the correction notification table.

use serde::Serialize;

use crate::protocol::EntityStatus;

/// Mismatch between the expected and the reported status of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftRecord {
    pub entity_id: String,
    pub expected_status: EntityStatus,
    pub actual_status: EntityStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Unix milliseconds
    pub timestamp: i64,
}

/// User-facing message for a corrected drift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftNotification {
    pub entity_id: String,
    pub title: String,
    pub message: String,
}

/// Pick the notification for a drift by its (expected, actual) pair.
pub fn notification_for(drift: &DriftRecord) -> DriftNotification {
    let id = &drift.entity_id;
    let (title, message) = match (drift.expected_status, drift.actual_status) {
        (EntityStatus::Running, EntityStatus::Stopped) => (
            "Process stopped".to_string(),
            format!("{id} stopped unexpectedly"),
        ),
        (EntityStatus::Running, EntityStatus::Error) => (
            "Process crashed".to_string(),
            match &drift.error_message {
                Some(reason) => format!("{id} crashed: {reason}"),
                None => format!("{id} crashed"),
            },
        ),
        (EntityStatus::Stopped, EntityStatus::Running) => (
            "Process started".to_string(),
            format!("{id} was started externally"),
        ),
        (expected, actual) => (
            "Status changed".to_string(),
            format!("{id} changed from {expected} to {actual}"),
        ),
    };
    DriftNotification {
        entity_id: id.clone(),
        title,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn drift(expected: EntityStatus, actual: EntityStatus) -> DriftRecord {
        DriftRecord {
            entity_id: "api".to_string(),
            expected_status: expected,
            actual_status: actual,
            error_message: None,
            timestamp: 0,
        }
    }

    #[rstest]
    #[case::stopped_unexpectedly(EntityStatus::Running, EntityStatus::Stopped, "Process stopped", "api stopped unexpectedly")]
    #[case::crashed(EntityStatus::Running, EntityStatus::Error, "Process crashed", "api crashed")]
    #[case::started_externally(EntityStatus::Stopped, EntityStatus::Running, "Process started", "api was started externally")]
    #[case::generic(EntityStatus::Cloning, EntityStatus::Stopped, "Status changed", "api changed from cloning to stopped")]
    fn notification_follows_status_pair(
        #[case] expected: EntityStatus,
        #[case] actual: EntityStatus,
        #[case] title: &str,
        #[case] message: &str,
    ) {
        let notification = notification_for(&drift(expected, actual));
        assert_eq!(notification.title, title);
        assert_eq!(notification.message, message);
        assert_eq!(notification.entity_id, "api");
    }

    #[test]
    fn crash_notification_carries_reason() {
        let mut record = drift(EntityStatus::Running, EntityStatus::Error);
        record.error_message = Some("exit code 137".to_string());
        assert_eq!(notification_for(&record).message, "api crashed: exit code 137");
    }
}
