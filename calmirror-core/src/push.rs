//! Event-driven sync from the scheduling service to the remote calendar.
//!
//! Every decision to ignore a notification is taken before the first await,
//! so a write the engine issued itself can never slip past the checks.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::event::{Origin, ScheduledEntity};
use crate::guard::{GuardKey, GuardOp};
use crate::scheduling::Notification;
use crate::translate::to_event_draft;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The engine itself is writing this entity
    GuardActive,
    /// Created by a reconciliation pass
    AlreadyMapped,
    /// Created under the engine's own platform identity
    OwnIdentity,
    /// Carries the remote calendar origin marker
    RemoteOrigin,
    NotMapped,
    /// Connection lifecycle, nothing to sync
    Lifecycle,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            IgnoreReason::GuardActive => "guard active",
            IgnoreReason::AlreadyMapped => "already mapped",
            IgnoreReason::OwnIdentity => "own identity",
            IgnoreReason::RemoteOrigin => "remote origin",
            IgnoreReason::NotMapped => "not mapped",
            IgnoreReason::Lifecycle => "lifecycle",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Applied,
    Ignored(IgnoreReason),
    /// The remote write failed; logged, mappings untouched
    Failed,
}

#[derive(Clone)]
pub struct PushHandlers {
    ctx: Arc<SyncContext>,
}

impl PushHandlers {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        PushHandlers { ctx }
    }

    /// Handle notifications until the sender side closes, each in its own task.
    pub async fn run(self, mut notifications: mpsc::Receiver<Notification>) {
        while let Some(notification) = notifications.recv().await {
            let handlers = self.clone();
            tokio::spawn(async move {
                handlers.handle(notification).await;
            });
        }
        debug!("Notification channel closed");
    }

    pub async fn handle(&self, notification: Notification) -> PushOutcome {
        let kind = notification.kind();
        let outcome = match notification {
            Notification::Created { entity } => self.on_created(&entity).await,
            Notification::Updated { new, .. } => self.on_updated(&new).await,
            Notification::Deleted { entity } => self.on_deleted(&entity).await,
            Notification::Ready => {
                info!("Scheduling service connection ready");
                PushOutcome::Ignored(IgnoreReason::Lifecycle)
            }
            Notification::Error { message } => {
                warn!(%message, "Scheduling service connection error");
                PushOutcome::Ignored(IgnoreReason::Lifecycle)
            }
            Notification::Throttled { retry_after_ms } => {
                warn!(?retry_after_ms, "Scheduling service throttled the connection");
                PushOutcome::Ignored(IgnoreReason::Lifecycle)
            }
        };

        if let PushOutcome::Ignored(reason) = outcome {
            debug!(kind, %reason, "Notification ignored");
        }
        outcome
    }

    pub async fn on_created(&self, entity: &ScheduledEntity) -> PushOutcome {
        if let Some(reason) = self.skip_create(entity) {
            return PushOutcome::Ignored(reason);
        }

        let key = GuardKey::new(GuardOp::Create, &entity.id);
        self.ctx.guard().register(key.clone());
        let result = self.insert_and_map(entity).await;
        self.ctx.guard().release(&key);

        match result {
            Ok(event_id) => {
                info!(local_id = %entity.id, %event_id, name = %entity.name, "Mirrored new scheduled entity");
                PushOutcome::Applied
            }
            Err(e) => {
                warn!(local_id = %entity.id, error = %e, "Could not mirror new scheduled entity");
                PushOutcome::Failed
            }
        }
    }

    fn skip_create(&self, entity: &ScheduledEntity) -> Option<IgnoreReason> {
        if self.ctx.guard().is_guarded(&entity.id) {
            return Some(IgnoreReason::GuardActive);
        }
        if self.ctx.with_mappings(|m| m.contains_local(&entity.id)) {
            return Some(IgnoreReason::AlreadyMapped);
        }
        if entity.creator_id.as_deref() == Some(self.ctx.self_id()) {
            return Some(IgnoreReason::OwnIdentity);
        }
        if entity.origin == Some(Origin::RemoteCalendar) {
            return Some(IgnoreReason::RemoteOrigin);
        }
        None
    }

    pub async fn on_updated(&self, entity: &ScheduledEntity) -> PushOutcome {
        if self.ctx.guard().is_guarded(&entity.id) {
            return PushOutcome::Ignored(IgnoreReason::GuardActive);
        }
        let Some(event_id) = self
            .ctx
            .with_mappings(|m| m.get_remote(&entity.id).map(str::to_string))
        else {
            return PushOutcome::Ignored(IgnoreReason::NotMapped);
        };

        let key = GuardKey::new(GuardOp::Update, &entity.id);
        self.ctx.guard().register(key.clone());
        let result = self.update_or_recreate(&event_id, entity).await;
        self.ctx.guard().release(&key);

        match result {
            Ok(()) => PushOutcome::Applied,
            Err(e) => {
                warn!(local_id = %entity.id, %event_id, error = %e, "Could not mirror scheduled entity update");
                PushOutcome::Failed
            }
        }
    }

    pub async fn on_deleted(&self, entity: &ScheduledEntity) -> PushOutcome {
        if self.ctx.guard().is_guarded(&entity.id) {
            return PushOutcome::Ignored(IgnoreReason::GuardActive);
        }
        let Some(event_id) = self
            .ctx
            .with_mappings(|m| m.get_remote(&entity.id).map(str::to_string))
        else {
            return PushOutcome::Ignored(IgnoreReason::NotMapped);
        };

        let key = GuardKey::new(GuardOp::Delete, &entity.id);
        self.ctx.guard().register(key.clone());
        let result = match self.ctx.delete_remote(&event_id).await {
            Err(e) if e.is_stale_reference() => Ok(()),
            other => other,
        };

        let outcome = match result {
            Ok(()) => {
                self.ctx.with_mappings(|m| m.remove_by_local(&entity.id));
                self.ctx.persist().await;
                info!(local_id = %entity.id, %event_id, "Deleted mirrored remote event");
                PushOutcome::Applied
            }
            Err(e) => {
                warn!(local_id = %entity.id, %event_id, error = %e, "Could not delete mirrored remote event");
                PushOutcome::Failed
            }
        };
        self.ctx.guard().release(&key);
        outcome
    }

    async fn update_or_recreate(&self, event_id: &str, entity: &ScheduledEntity) -> SyncResult<()> {
        let draft = to_event_draft(entity);
        match self.ctx.update_remote(event_id, &draft).await {
            Ok(_) => {
                debug!(local_id = %entity.id, %event_id, "Updated mirrored remote event");
                Ok(())
            }
            Err(e) if e.is_stale_reference() => {
                info!(local_id = %entity.id, %event_id, "Remote event vanished, recreating");
                self.ctx.with_mappings(|m| m.remove_by_local(&entity.id));
                self.insert_and_map(entity).await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    /// Insert the remote event for `entity`, store the pair and persist.
    async fn insert_and_map(&self, entity: &ScheduledEntity) -> SyncResult<String> {
        let draft = to_event_draft(entity);
        let event = self.ctx.insert_remote(&draft).await?;
        self.ctx.with_mappings(|m| m.put(&event.id, &entity.id));
        self.ctx.persist().await;
        Ok(event.id)
    }
}
