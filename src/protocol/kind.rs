//! Message kinds understood by the worker.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of a frame exchanged with the worker.
///
/// The kind selects the payload schema and, for outbound work, the
/// operation timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Start,
    Stop,
    Status,
    /// Clone/provision a repository for an entity
    Clone,
    Logs,
    Delete,
    Config,
    /// Lightweight liveness probe
    Health,
    Restart,
    /// Worker finished startup (only meaningful without a correlation id)
    Ready,
    Error,
}

impl MessageKind {
    pub const ALL: [MessageKind; 11] = [
        MessageKind::Start,
        MessageKind::Stop,
        MessageKind::Status,
        MessageKind::Clone,
        MessageKind::Logs,
        MessageKind::Delete,
        MessageKind::Config,
        MessageKind::Health,
        MessageKind::Restart,
        MessageKind::Ready,
        MessageKind::Error,
    ];

    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Start => "start",
            MessageKind::Stop => "stop",
            MessageKind::Status => "status",
            MessageKind::Clone => "clone",
            MessageKind::Logs => "logs",
            MessageKind::Delete => "delete",
            MessageKind::Config => "config",
            MessageKind::Health => "health",
            MessageKind::Restart => "restart",
            MessageKind::Ready => "ready",
            MessageKind::Error => "error",
        }
    }

    /// Kinds that act on a single entity and therefore need an entity id.
    pub fn requires_entity(self) -> bool {
        matches!(
            self,
            MessageKind::Start
                | MessageKind::Stop
                | MessageKind::Status
                | MessageKind::Clone
                | MessageKind::Logs
                | MessageKind::Delete
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_serde_representation() {
        for kind in MessageKind::ALL {
            let serialized = serde_json::to_value(kind).unwrap();
            assert_eq!(serialized, kind.as_str());
            let parsed: MessageKind = serde_json::from_value(serialized).unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let parsed = serde_json::from_str::<MessageKind>("\"reboot\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn entity_scoped_kinds() {
        assert!(MessageKind::Clone.requires_entity());
        assert!(MessageKind::Logs.requires_entity());
        assert!(!MessageKind::Health.requires_entity());
        assert!(!MessageKind::Ready.requires_entity());
        assert!(!MessageKind::Config.requires_entity());
    }
}
