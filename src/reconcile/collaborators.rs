//! Seams between the reconciliation loop and the rest of the system.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use super::drift::DriftNotification;
use super::report::CycleReport;
use crate::error::BridgeResult;
use crate::protocol::EntityStatus;

/// An entity whose status the supervisor tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEntity {
    pub id: String,
    /// Last status the supervisor believes the entity has
    pub expected_status: EntityStatus,
}

impl TrackedEntity {
    pub fn new(id: impl Into<String>, expected_status: EntityStatus) -> Self {
        Self {
            id: id.into(),
            expected_status,
        }
    }
}

/// Status of one entity as reported by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: EntityStatus,
    pub error_message: Option<String>,
}

impl From<EntityStatus> for StatusReport {
    fn from(status: EntityStatus) -> Self {
        Self {
            status,
            error_message: None,
        }
    }
}

pub type StatusFuture<'a> = Pin<Box<dyn Future<Output = BridgeResult<StatusReport>> + Send + 'a>>;

/// Ground truth about the worker side.
pub trait WorkerProbe: Send + Sync {
    /// Whether the worker is currently able to answer queries.
    fn is_healthy(&self) -> bool;

    /// Ask the worker for the status of one entity, at low priority.
    fn query_status<'a>(&'a self, entity_id: &'a str) -> StatusFuture<'a>;
}

/// The supervisor's cached view of entities.
pub trait EntityStore: Send + Sync {
    fn entities(&self) -> BridgeResult<Vec<TrackedEntity>>;

    fn update_status(
        &self,
        entity_id: &str,
        status: EntityStatus,
        error_message: Option<&str>,
    ) -> BridgeResult<()>;

    /// Stop tracking an entity. Unknown ids are not an error.
    fn remove_entity(&self, entity_id: &str) -> BridgeResult<()>;

    /// Cached status of one entity, if tracked.
    fn expected_status(&self, entity_id: &str) -> BridgeResult<Option<EntityStatus>> {
        Ok(self
            .entities()?
            .into_iter()
            .find(|entity| entity.id == entity_id)
            .map(|entity| entity.expected_status))
    }
}

/// Surfaces corrections to the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &DriftNotification);
}

/// Receives one report per cycle, whatever its outcome.
pub trait MetricsSink: Send + Sync {
    fn track_cycle(&self, report: &CycleReport);
}
