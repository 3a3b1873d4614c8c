//! Job submission facade.
//!
//! `JobClient` turns job requests into sanitized, kind-specific messages
//! and sends them through `Bridge::send_message`. It also serves as the
//! reconciliation loop's view of the worker.
//!
//! # Module Structure
//!
//! - `sanitize` - entity id, URL, branch, path, and env checks

mod sanitize;

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;
use serde_json::Value;

use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{
    ClonePayload, ConfigPayload, DeletePayload, EntityStatus, Frame, LogsPayload, Message,
    MessageKind, Payload, RestartPayload, StartPayload, StopPayload,
};
use crate::queue::Priority;
use crate::reconcile::{EntityStore, StatusFuture, StatusReport, WorkerProbe};

/// Source to provision an entity from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub repo_url: String,
    pub branch: Option<String>,
    /// Relative to the worker's workspace root
    pub target_dir: Option<String>,
}

/// How to start an entity's process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartRequest {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: BTreeMap<String, String>,
}

#[derive(Clone)]
pub struct JobClient {
    bridge: Bridge,
    store: Arc<dyn EntityStore>,
}

impl JobClient {
    pub fn new(bridge: Bridge, store: Arc<dyn EntityStore>) -> Self {
        Self { bridge, store }
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Clone a repository for `entity_id`.
    pub async fn provision(
        &self,
        entity_id: &str,
        request: &ProvisionRequest,
        priority: Priority,
    ) -> BridgeResult<()> {
        let entity_id = sanitize::entity_id(entity_id)?;
        let payload = ClonePayload {
            repo_url: Some(sanitize::repo_url(&request.repo_url)?),
            branch: request
                .branch
                .as_deref()
                .map(sanitize::branch)
                .transpose()?
                .map(str::to_string),
            target_dir: request
                .target_dir
                .as_deref()
                .map(sanitize::relative_dir)
                .transpose()?,
        };
        let reply = self
            .send(entity_id, Payload::Clone(payload), priority)
            .await?;
        expect_kind(&reply, MessageKind::Clone)?;
        self.store.update_status(entity_id, EntityStatus::Stopped, None)
    }

    /// Start the entity's process. Returns the pid the worker reported.
    pub async fn start(
        &self,
        entity_id: &str,
        request: &StartRequest,
        priority: Priority,
    ) -> BridgeResult<Option<u32>> {
        let entity_id = sanitize::entity_id(entity_id)?;
        if let Some(command) = &request.command {
            sanitize::command(command)?;
        }
        sanitize::env(&request.env)?;
        let payload = StartPayload {
            command: request.command.clone(),
            args: request.args.clone(),
            cwd: request
                .cwd
                .as_deref()
                .map(sanitize::relative_dir)
                .transpose()?,
            env: request.env.clone(),
            pid: None,
        };
        let reply = self
            .send(entity_id, Payload::Start(payload), priority)
            .await?;
        let Payload::Start(started) = reply.body else {
            return Err(unexpected_reply(MessageKind::Start, reply.kind()));
        };
        self.store.update_status(entity_id, EntityStatus::Running, None)?;
        Ok(started.pid)
    }

    /// Stop the entity's process.
    ///
    /// An entity already known to be stopped is left alone: the call
    /// succeeds without contacting the worker.
    pub async fn stop(&self, entity_id: &str, force: bool, priority: Priority) -> BridgeResult<()> {
        let entity_id = sanitize::entity_id(entity_id)?;
        if self.store.expected_status(entity_id)? == Some(EntityStatus::Stopped) {
            debug!(target: "workbridge::jobs", "{} already stopped", entity_id);
            return Ok(());
        }
        let payload = StopPayload {
            force,
            exit_code: None,
        };
        let reply = self
            .send(entity_id, Payload::Stop(payload), priority)
            .await?;
        expect_kind(&reply, MessageKind::Stop)?;
        self.store.update_status(entity_id, EntityStatus::Stopped, None)
    }

    pub async fn status(&self, entity_id: &str, priority: Priority) -> BridgeResult<StatusReport> {
        let entity_id = sanitize::entity_id(entity_id)?;
        let reply = self
            .send(entity_id, Payload::empty(MessageKind::Status), priority)
            .await?;
        let Payload::Status(status) = reply.body else {
            return Err(unexpected_reply(MessageKind::Status, reply.kind()));
        };
        let Some(current) = status.status else {
            return Err(BridgeError::validation(format!(
                "status reply for {entity_id} carries no status"
            )));
        };
        Ok(StatusReport {
            status: current,
            error_message: status.error_message,
        })
    }

    pub async fn delete(
        &self,
        entity_id: &str,
        remove_files: bool,
        priority: Priority,
    ) -> BridgeResult<()> {
        let entity_id = sanitize::entity_id(entity_id)?;
        let reply = self
            .send(
                entity_id,
                Payload::Delete(DeletePayload { remove_files }),
                priority,
            )
            .await?;
        expect_kind(&reply, MessageKind::Delete)?;
        self.store.remove_entity(entity_id)
    }

    /// Fetch the most recent log lines of an entity.
    pub async fn logs(
        &self,
        entity_id: &str,
        lines: Option<usize>,
        priority: Priority,
    ) -> BridgeResult<Vec<String>> {
        let entity_id = sanitize::entity_id(entity_id)?;
        let payload = LogsPayload {
            lines,
            entries: Vec::new(),
        };
        let reply = self
            .send(entity_id, Payload::Logs(payload), priority)
            .await?;
        match reply.body {
            Payload::Logs(logs) => Ok(logs.entries),
            other => Err(unexpected_reply(MessageKind::Logs, other.kind())),
        }
    }

    /// Push configuration values to the worker.
    pub async fn push_config(
        &self,
        values: BTreeMap<String, Value>,
        priority: Priority,
    ) -> BridgeResult<()> {
        let message = Message::new(Payload::Config(ConfigPayload { values }));
        let reply = self.bridge.send_message(message, priority).await?;
        expect_kind(&reply, MessageKind::Config)
    }

    /// Ask the worker to restart itself.
    pub async fn restart_worker(&self, reason: Option<String>) -> BridgeResult<()> {
        let message = Message::new(Payload::Restart(RestartPayload { reason }));
        let reply = self.bridge.send_message(message, Priority::High).await?;
        expect_kind(&reply, MessageKind::Restart)
    }

    async fn send(&self, entity_id: &str, body: Payload, priority: Priority) -> BridgeResult<Frame> {
        self.bridge
            .send_message(Message::for_entity(entity_id, body), priority)
            .await
    }
}

impl WorkerProbe for JobClient {
    fn is_healthy(&self) -> bool {
        self.bridge.is_healthy()
    }

    fn query_status<'a>(&'a self, entity_id: &'a str) -> StatusFuture<'a> {
        Box::pin(self.status(entity_id, Priority::Low))
    }
}

fn expect_kind(reply: &Frame, expected: MessageKind) -> BridgeResult<()> {
    if reply.kind() == expected {
        Ok(())
    } else {
        Err(unexpected_reply(expected, reply.kind()))
    }
}

fn unexpected_reply(expected: MessageKind, actual: MessageKind) -> BridgeError {
    BridgeError::validation(format!("expected {expected} reply, worker sent {actual}"))
}
