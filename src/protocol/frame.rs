//! Frames and outbound messages.
//!
//! `Frame` is the validated, strongly-typed form of one wire object.
//! Parsing is the validation step: a raw string either becomes a `Frame`
//! or a `BridgeError::Validation` explaining what was wrong.

use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CorrelationId, MessageKind, Payload};
use crate::error::{BridgeError, BridgeResult};

static ENTITY_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").expect("entity id pattern is valid")
});

/// Milliseconds since the Unix epoch.
pub fn now_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or_default()
}

pub(crate) fn is_valid_entity_id(entity_id: &str) -> bool {
    ENTITY_ID_PATTERN.is_match(entity_id)
}

/// Raw wire shape, before the payload is typed.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFrame {
    kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
    timestamp: i64,
}

/// One validated frame exchanged with the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub correlation_id: Option<CorrelationId>,
    pub entity_id: Option<String>,
    pub body: Payload,
    pub timestamp: i64,
}

impl Frame {
    pub fn new(
        correlation_id: Option<CorrelationId>,
        entity_id: Option<String>,
        body: Payload,
    ) -> Self {
        Self {
            correlation_id,
            entity_id,
            body,
            timestamp: now_timestamp_ms(),
        }
    }

    /// Unsolicited frame (no correlation id), e.g. `ready` or a log line.
    pub fn broadcast(entity_id: Option<String>, body: Payload) -> Self {
        Self::new(None, entity_id, body)
    }

    /// Build a reply carrying this frame's correlation and entity ids.
    pub fn reply(&self, body: Payload) -> Self {
        Self::new(self.correlation_id.clone(), self.entity_id.clone(), body)
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    /// Decode and validate one raw frame.
    pub fn parse(raw: &str) -> BridgeResult<Self> {
        let wire: WireFrame = serde_json::from_str(raw)
            .map_err(|e| BridgeError::validation(format!("malformed frame: {}", e)))?;
        let body = Payload::decode(wire.kind, wire.payload).map_err(BridgeError::Validation)?;
        let frame = Self {
            correlation_id: wire.correlation_id.map(CorrelationId::from),
            entity_id: wire.entity_id,
            body,
            timestamp: wire.timestamp,
        };
        frame.validate()?;
        Ok(frame)
    }

    /// Serialize to the single-line wire form.
    pub fn encode(&self) -> BridgeResult<String> {
        let payload = self.body.encode().map_err(|e| {
            BridgeError::validation(format!("unserializable {} payload: {}", self.kind(), e))
        })?;
        let wire = WireFrame {
            kind: self.kind(),
            correlation_id: self.correlation_id.as_ref().map(|id| id.as_str().to_string()),
            entity_id: self.entity_id.clone(),
            payload: Some(payload),
            timestamp: self.timestamp,
        };
        serde_json::to_string(&wire)
            .map_err(|e| BridgeError::validation(format!("unserializable frame: {}", e)))
    }

    /// Structural checks shared by inbound and outbound frames.
    pub fn validate(&self) -> BridgeResult<()> {
        let kind = self.kind();
        if let Some(id) = &self.correlation_id
            && !id.is_well_formed()
        {
            return Err(BridgeError::validation(format!(
                "{}: malformed correlationId",
                kind
            )));
        }
        match self.entity_id.as_deref() {
            Some(entity_id) if !is_valid_entity_id(entity_id) => {
                return Err(BridgeError::validation(format!(
                    "{}: malformed entityId {:?}",
                    kind, entity_id
                )));
            }
            None if kind.requires_entity() => {
                return Err(BridgeError::validation(format!(
                    "{}: entityId is required",
                    kind
                )));
            }
            _ => {}
        }
        if self.timestamp < 0 {
            return Err(BridgeError::validation(format!(
                "{}: timestamp must be non-negative",
                kind
            )));
        }
        self.body
            .validate()
            .map_err(|e| BridgeError::validation(format!("{}: {}", kind, e)))
    }
}

/// Outbound unit of work, before a correlation id is assigned.
///
/// Immutable once enqueued; the queue only tracks retry bookkeeping
/// alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub entity_id: Option<String>,
    pub body: Payload,
    pub submitted_at: i64,
}

impl Message {
    pub fn new(body: Payload) -> Self {
        Self {
            entity_id: None,
            body,
            submitted_at: now_timestamp_ms(),
        }
    }

    pub fn for_entity(entity_id: impl Into<String>, body: Payload) -> Self {
        Self {
            entity_id: Some(entity_id.into()),
            body,
            submitted_at: now_timestamp_ms(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    /// Build the wire frame for this message.
    pub fn to_frame(&self, correlation_id: Option<CorrelationId>) -> Frame {
        Frame::new(correlation_id, self.entity_id.clone(), self.body.clone())
    }

    /// Validate against the same schema used for inbound frames.
    pub fn validate(&self) -> BridgeResult<()> {
        self.to_frame(None).validate()
    }
}
