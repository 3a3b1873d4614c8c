//! Strongly-typed payloads, one per message kind.
//!
//! Each payload struct is permissive about missing fields (everything has a
//! default) so that the same schema accepts both requests and responses of
//! a kind. Constraints that must hold whenever a field is present are
//! checked by `validate()`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::MessageKind;

/// Upper bound for log lines requested or returned in one frame.
pub(crate) const MAX_LOG_LINES: usize = 10_000;

/// Status of an entity as reported by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Cloning,
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
    #[serde(other)]
    Unknown,
}

impl EntityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityStatus::Cloning => "cloning",
            EntityStatus::Stopped => "stopped",
            EntityStatus::Starting => "starting",
            EntityStatus::Running => "running",
            EntityStatus::Stopping => "stopping",
            EntityStatus::Error => "error",
            EntityStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StartPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StopPayload {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub force: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StatusPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<EntityStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClonePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_dir: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogsPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeletePayload {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub remove_files: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigPayload {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HealthPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_jobs: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RestartPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReadyPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Payload of a frame, tagged by message kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Start(StartPayload),
    Stop(StopPayload),
    Status(StatusPayload),
    Clone(ClonePayload),
    Logs(LogsPayload),
    Delete(DeletePayload),
    Config(ConfigPayload),
    Health(HealthPayload),
    Restart(RestartPayload),
    Ready(ReadyPayload),
    Error(ErrorPayload),
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::Start(_) => MessageKind::Start,
            Payload::Stop(_) => MessageKind::Stop,
            Payload::Status(_) => MessageKind::Status,
            Payload::Clone(_) => MessageKind::Clone,
            Payload::Logs(_) => MessageKind::Logs,
            Payload::Delete(_) => MessageKind::Delete,
            Payload::Config(_) => MessageKind::Config,
            Payload::Health(_) => MessageKind::Health,
            Payload::Restart(_) => MessageKind::Restart,
            Payload::Ready(_) => MessageKind::Ready,
            Payload::Error(_) => MessageKind::Error,
        }
    }

    /// Empty payload of the given kind.
    pub fn empty(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Start => Payload::Start(StartPayload::default()),
            MessageKind::Stop => Payload::Stop(StopPayload::default()),
            MessageKind::Status => Payload::Status(StatusPayload::default()),
            MessageKind::Clone => Payload::Clone(ClonePayload::default()),
            MessageKind::Logs => Payload::Logs(LogsPayload::default()),
            MessageKind::Delete => Payload::Delete(DeletePayload::default()),
            MessageKind::Config => Payload::Config(ConfigPayload::default()),
            MessageKind::Health => Payload::Health(HealthPayload::default()),
            MessageKind::Restart => Payload::Restart(RestartPayload::default()),
            MessageKind::Ready => Payload::Ready(ReadyPayload::default()),
            MessageKind::Error => Payload::Error(ErrorPayload::default()),
        }
    }

    /// Decode the payload schema selected by `kind`.
    ///
    /// A missing payload decodes as the empty payload of that kind.
    pub(crate) fn decode(kind: MessageKind, value: Option<Value>) -> Result<Self, String> {
        let value = match value {
            None | Some(Value::Null) => return Ok(Self::empty(kind)),
            Some(value) => value,
        };
        let decoded = match kind {
            MessageKind::Start => serde_json::from_value(value).map(Payload::Start),
            MessageKind::Stop => serde_json::from_value(value).map(Payload::Stop),
            MessageKind::Status => serde_json::from_value(value).map(Payload::Status),
            MessageKind::Clone => serde_json::from_value(value).map(Payload::Clone),
            MessageKind::Logs => serde_json::from_value(value).map(Payload::Logs),
            MessageKind::Delete => serde_json::from_value(value).map(Payload::Delete),
            MessageKind::Config => serde_json::from_value(value).map(Payload::Config),
            MessageKind::Health => serde_json::from_value(value).map(Payload::Health),
            MessageKind::Restart => serde_json::from_value(value).map(Payload::Restart),
            MessageKind::Ready => serde_json::from_value(value).map(Payload::Ready),
            MessageKind::Error => serde_json::from_value(value).map(Payload::Error),
        };
        decoded.map_err(|e| format!("invalid {} payload: {}", kind, e))
    }

    pub(crate) fn encode(&self) -> Result<Value, serde_json::Error> {
        match self {
            Payload::Start(p) => serde_json::to_value(p),
            Payload::Stop(p) => serde_json::to_value(p),
            Payload::Status(p) => serde_json::to_value(p),
            Payload::Clone(p) => serde_json::to_value(p),
            Payload::Logs(p) => serde_json::to_value(p),
            Payload::Delete(p) => serde_json::to_value(p),
            Payload::Config(p) => serde_json::to_value(p),
            Payload::Health(p) => serde_json::to_value(p),
            Payload::Restart(p) => serde_json::to_value(p),
            Payload::Ready(p) => serde_json::to_value(p),
            Payload::Error(p) => serde_json::to_value(p),
        }
    }

    /// Check field constraints that the serde shape cannot express.
    pub(crate) fn validate(&self) -> Result<(), String> {
        match self {
            Payload::Start(p) => {
                check_optional_text("command", p.command.as_deref())?;
                check_optional_text("cwd", p.cwd.as_deref())?;
                for arg in &p.args {
                    check_no_nul("args", arg)?;
                }
                for (key, value) in &p.env {
                    if key.is_empty() || key.contains('=') {
                        return Err(format!("start: invalid env key {:?}", key));
                    }
                    check_no_nul("env", value)?;
                }
                Ok(())
            }
            Payload::Clone(p) => {
                check_optional_text("repoUrl", p.repo_url.as_deref())?;
                check_optional_text("branch", p.branch.as_deref())?;
                check_optional_text("targetDir", p.target_dir.as_deref())
            }
            Payload::Logs(p) => {
                if p.lines.is_some_and(|lines| lines == 0 || lines > MAX_LOG_LINES) {
                    return Err(format!("logs: lines must be within 1..={}", MAX_LOG_LINES));
                }
                if p.entries.len() > MAX_LOG_LINES {
                    return Err(format!(
                        "logs: {} entries exceed limit of {}",
                        p.entries.len(),
                        MAX_LOG_LINES
                    ));
                }
                Ok(())
            }
            Payload::Status(p) => p
                .error_message
                .as_deref()
                .map_or(Ok(()), |message| check_no_nul("errorMessage", message)),
            Payload::Config(p) => {
                if p.values.keys().any(|key| key.trim().is_empty()) {
                    return Err("config: keys must be non-empty".to_string());
                }
                Ok(())
            }
            Payload::Error(p) => {
                if p.message.trim().is_empty() {
                    return Err("error: message must be non-empty".to_string());
                }
                Ok(())
            }
            Payload::Restart(p) => check_optional_text("reason", p.reason.as_deref()),
            Payload::Stop(_)
            | Payload::Delete(_)
            | Payload::Health(_)
            | Payload::Ready(_) => Ok(()),
        }
    }
}

fn check_optional_text(field: &str, value: Option<&str>) -> Result<(), String> {
    match value {
        Some(text) if text.trim().is_empty() => Err(format!("{} must be non-empty", field)),
        Some(text) => check_no_nul(field, text),
        None => Ok(()),
    }
}

fn check_no_nul(field: &str, value: &str) -> Result<(), String> {
    if value.contains('\0') {
        Err(format!("{} must not contain NUL bytes", field))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_payload_decodes_as_empty() {
        for kind in MessageKind::ALL {
            let payload = Payload::decode(kind, None).unwrap();
            assert_eq!(payload.kind(), kind);
            assert_eq!(payload, Payload::empty(kind));
        }
    }

    #[test]
    fn payload_schema_follows_kind() {
        let value = json!({ "status": "running", "pid": 42 });
        let payload = Payload::decode(MessageKind::Status, Some(value)).unwrap();
        assert_eq!(
            payload,
            Payload::Status(StatusPayload {
                status: Some(EntityStatus::Running),
                pid: Some(42),
                error_message: None,
            })
        );

        // Same value is not a valid logs payload: "status" is ignored but
        // wrong field types are rejected
        let bad = Payload::decode(MessageKind::Logs, Some(json!({ "lines": "ten" })));
        assert!(bad.unwrap_err().contains("invalid logs payload"));
    }

    #[test]
    fn unknown_status_values_decode_as_unknown() {
        let payload =
            Payload::decode(MessageKind::Status, Some(json!({ "status": "hibernating" }))).unwrap();
        let Payload::Status(status) = payload else {
            panic!("expected status payload");
        };
        assert_eq!(status.status, Some(EntityStatus::Unknown));
    }

    #[test]
    fn validate_rejects_blank_fields() {
        let start = Payload::Start(StartPayload {
            command: Some("  ".to_string()),
            ..Default::default()
        });
        assert!(start.validate().is_err());

        let error = Payload::Error(ErrorPayload::default());
        assert!(error.validate().is_err());

        let logs = Payload::Logs(LogsPayload {
            lines: Some(0),
            entries: Vec::new(),
        });
        assert!(logs.validate().is_err());

        let clone = Payload::Clone(ClonePayload {
            repo_url: Some("https://example.com/a.git".to_string()),
            branch: None,
            target_dir: Some("repos/a\0".to_string()),
        });
        assert!(clone.validate().is_err());
    }

    #[test]
    fn validate_accepts_complete_payloads() {
        let start = Payload::Start(StartPayload {
            command: Some("npm".to_string()),
            args: vec!["run".to_string(), "dev".to_string()],
            cwd: Some("repos/app".to_string()),
            env: BTreeMap::from([("PORT".to_string(), "3000".to_string())]),
            pid: None,
        });
        assert!(start.validate().is_ok());
        assert!(Payload::empty(MessageKind::Health).validate().is_ok());
    }
}
