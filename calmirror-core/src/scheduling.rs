//! The community scheduling service the mirror writes into.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SyncResult;
use crate::event::{EntityDraft, ScheduledEntity};

/// Operations the engine needs from the scheduling service.
#[async_trait]
pub trait SchedulingService: Send + Sync {
    async fn create_entity(&self, draft: &EntityDraft) -> SyncResult<ScheduledEntity>;

    async fn update_entity(&self, entity_id: &str, draft: &EntityDraft)
    -> SyncResult<ScheduledEntity>;

    async fn delete_entity(&self, entity_id: &str) -> SyncResult<()>;

    /// `Ok(None)` when the entity does not exist (any more).
    async fn lookup_entity(&self, entity_id: &str) -> SyncResult<Option<ScheduledEntity>>;

    /// The platform identity the engine writes as.
    fn self_id(&self) -> &str;
}

/// What the scheduling platform tells us about changes on its side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Created {
        entity: ScheduledEntity,
    },
    Updated {
        old: Option<ScheduledEntity>,
        new: ScheduledEntity,
    },
    Deleted {
        entity: ScheduledEntity,
    },
    /// Connection established
    Ready,
    Error {
        message: String,
    },
    Throttled {
        retry_after_ms: Option<u64>,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Created { .. } => "created",
            Notification::Updated { .. } => "updated",
            Notification::Deleted { .. } => "deleted",
            Notification::Ready => "ready",
            Notification::Error { .. } => "error",
            Notification::Throttled { .. } => "throttled",
        }
    }
}
