//! In-memory entity store.

use dashmap::DashMap;

use crate::error::BridgeResult;
use crate::protocol::EntityStatus;
use crate::reconcile::{EntityStore, TrackedEntity};

#[derive(Debug, Clone)]
struct StoredEntity {
    status: EntityStatus,
    error_message: Option<String>,
}

/// Cached entity statuses, shared between the job client and the
/// reconciliation loop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entities: DashMap<String, StoredEntity>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `entities`, e.g. from settings.
    pub fn with_entities(entities: impl IntoIterator<Item = TrackedEntity>) -> Self {
        let store = Self::new();
        for entity in entities {
            store.insert(entity);
        }
        store
    }

    pub fn insert(&self, entity: TrackedEntity) {
        self.entities.insert(
            entity.id,
            StoredEntity {
                status: entity.expected_status,
                error_message: None,
            },
        );
    }

    pub fn remove(&self, entity_id: &str) -> bool {
        self.entities.remove(entity_id).is_some()
    }

    pub fn status(&self, entity_id: &str) -> Option<EntityStatus> {
        self.entities.get(entity_id).map(|entry| entry.status)
    }

    pub fn error_message(&self, entity_id: &str) -> Option<String> {
        self.entities
            .get(entity_id)
            .and_then(|entry| entry.error_message.clone())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl EntityStore for MemoryStore {
    /// Entities ordered by id.
    fn entities(&self) -> BridgeResult<Vec<TrackedEntity>> {
        let mut entities: Vec<TrackedEntity> = self
            .entities
            .iter()
            .map(|entry| TrackedEntity::new(entry.key().clone(), entry.value().status))
            .collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entities)
    }

    fn update_status(
        &self,
        entity_id: &str,
        status: EntityStatus,
        error_message: Option<&str>,
    ) -> BridgeResult<()> {
        self.entities.insert(
            entity_id.to_string(),
            StoredEntity {
                status,
                error_message: error_message.map(str::to_string),
            },
        );
        Ok(())
    }

    fn remove_entity(&self, entity_id: &str) -> BridgeResult<()> {
        self.remove(entity_id);
        Ok(())
    }

    fn expected_status(&self, entity_id: &str) -> BridgeResult<Option<EntityStatus>> {
        Ok(self.status(entity_id))
    }
}
