//! Periodic pull from the remote calendar into the scheduling service.
//!
//! A pass fetches the upcoming window, updates or creates a scheduled entity
//! per event, deletes entities whose event disappeared, then persists the
//! mappings once.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::context::SyncContext;
use crate::date_range::DateRange;
use crate::error::SyncResult;
use crate::event::{CalendarEvent, Origin};
use crate::guard::{GuardKey, GuardOp};
use crate::translate::to_entity_draft;

/// What one pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Mappings whose scheduled entity had vanished
    pub stale: usize,
    /// Mappings dropped because their entity already started
    pub retired: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl PassReport {
    pub fn changed_mappings(&self) -> bool {
        self.created > 0 || self.deleted > 0 || self.stale > 0 || self.retired > 0
    }
}

enum EventOutcome {
    Created,
    Updated,
    Recreated,
    Skipped,
}

enum MissingOutcome {
    Deleted,
    Stale,
    Retired,
    Upcoming,
    Skipped,
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    ctx: Arc<SyncContext>,
}

impl ReconciliationEngine {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        ReconciliationEngine { ctx }
    }

    /// One pass, retried as a whole when fetching fails.
    pub async fn run_with_retry(&self) -> SyncResult<PassReport> {
        self.ctx
            .retry()
            .run("reconciliation pass", || self.run_pass())
            .await
    }

    /// Pass immediately, then every `sync.interval`, forever.
    pub async fn run_forever(&self) {
        let mut interval = tokio::time::interval(self.ctx.settings().interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(e) = self.run_with_retry().await {
                error!(error = %e, "Reconciliation pass failed");
            }
        }
    }

    pub async fn run_pass(&self) -> SyncResult<PassReport> {
        self.run_pass_at(Utc::now()).await
    }

    pub async fn run_pass_at(&self, now: DateTime<Utc>) -> SyncResult<PassReport> {
        let range = DateRange::upcoming(now, self.ctx.settings().window_days);

        // Taken before fetching: a pair added while the fetch is in flight
        // must not be mistaken for a deletion.
        let known = self.ctx.with_mappings(|m| m.pairs());

        let events = self.ctx.list_remote_events(range).await?;
        let mut report = PassReport {
            fetched: events.len(),
            ..Default::default()
        };

        for event in &events {
            match self.sync_event(event).await {
                Ok(EventOutcome::Created) => report.created += 1,
                Ok(EventOutcome::Updated) => report.updated += 1,
                Ok(EventOutcome::Recreated) => {
                    report.stale += 1;
                    report.created += 1;
                }
                Ok(EventOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(event_id = %event.id, summary = %event.summary, error = %e, "Could not sync event");
                }
            }
        }

        let fetched: HashSet<&str> = events.iter().map(|e| e.id.as_str()).collect();
        for (remote_id, local_id) in known {
            if fetched.contains(remote_id.as_str()) {
                continue;
            }

            match self.sync_missing(&remote_id, &local_id, &range).await {
                Ok(MissingOutcome::Deleted) => report.deleted += 1,
                Ok(MissingOutcome::Stale) => report.stale += 1,
                Ok(MissingOutcome::Retired) => report.retired += 1,
                Ok(MissingOutcome::Upcoming) => {}
                Ok(MissingOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(%remote_id, %local_id, error = %e, "Could not propagate deletion");
                }
            }
        }

        self.ctx.persist().await;

        info!(
            fetched = report.fetched,
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            stale = report.stale,
            retired = report.retired,
            skipped = report.skipped,
            failed = report.failed,
            "Reconciliation pass complete"
        );

        Ok(report)
    }

    async fn sync_event(&self, event: &CalendarEvent) -> SyncResult<EventOutcome> {
        let local_id = self
            .ctx
            .with_mappings(|m| m.get_local(&event.id).map(str::to_string));

        let Some(local_id) = local_id else {
            if event.origin == Some(Origin::Scheduling) {
                // Pushed from the scheduling side, its mapping is still being stored
                debug!(event_id = %event.id, "Skipping unmapped event pushed from scheduling side");
                return Ok(EventOutcome::Skipped);
            }
            return self.create(event).await.map(|_| EventOutcome::Created);
        };

        if self.ctx.guard().is_guarded(&local_id) {
            debug!(event_id = %event.id, %local_id, "Write in flight, skipping");
            return Ok(EventOutcome::Skipped);
        }

        let draft = to_entity_draft(event);
        let key = GuardKey::new(GuardOp::Update, &local_id);
        self.ctx.guard().register(key.clone());
        let result = self.ctx.update_entity(&local_id, &draft).await;
        self.ctx
            .guard()
            .release_after(key, self.ctx.settings().guard_ttl);

        match result {
            Ok(_) => {
                debug!(event_id = %event.id, %local_id, "Updated scheduled entity");
                Ok(EventOutcome::Updated)
            }
            Err(e) if e.is_stale_reference() => {
                info!(event_id = %event.id, %local_id, "Scheduled entity vanished, recreating");
                self.ctx.with_mappings(|m| m.remove_by_remote(&event.id));
                self.create(event).await.map(|_| EventOutcome::Recreated)
            }
            Err(e) => Err(e),
        }
    }

    /// Create the scheduled entity for `event` and store the new pair.
    async fn create(&self, event: &CalendarEvent) -> SyncResult<String> {
        let draft = to_entity_draft(event);
        let guard = self.ctx.guard();

        let placeholder = GuardKey::placeholder(GuardOp::Create);
        guard.register(placeholder.clone());

        let entity = match self.ctx.create_entity(&draft).await {
            Ok(entity) => entity,
            Err(e) => {
                guard.release(&placeholder);
                return Err(e);
            }
        };

        // Same segment as the return of the create: no notification can run in between
        let real = GuardKey::new(GuardOp::Create, &entity.id);
        guard.promote(&placeholder, real.clone());
        self.ctx.with_mappings(|m| m.put(&event.id, &entity.id));
        guard.release_after(real, self.ctx.settings().guard_ttl);

        debug!(event_id = %event.id, local_id = %entity.id, "Created scheduled entity");
        Ok(entity.id)
    }

    async fn sync_missing(
        &self,
        remote_id: &str,
        local_id: &str,
        range: &DateRange,
    ) -> SyncResult<MissingOutcome> {
        let still_paired = || {
            self.ctx
                .with_mappings(|m| m.get_local(remote_id) == Some(local_id))
        };

        if !still_paired() || self.ctx.guard().is_guarded(local_id) {
            return Ok(MissingOutcome::Skipped);
        }

        let entity = match self.ctx.lookup_entity(local_id).await? {
            Some(entity) => entity,
            None => {
                self.ctx.with_mappings(|m| m.remove_by_remote(remote_id));
                debug!(%remote_id, %local_id, "Both sides gone, dropped stale mapping");
                return Ok(MissingOutcome::Stale);
            }
        };

        // Past the window's start the event can no longer be fetched; its
        // entity is left to finish on its own and the pair is forgotten.
        if entity.start < range.from {
            self.ctx.with_mappings(|m| m.remove_by_remote(remote_id));
            debug!(%remote_id, %local_id, "Entity already started, retired mapping");
            return Ok(MissingOutcome::Retired);
        }

        // Absence from the fetch proves nothing beyond the window
        if entity.start >= range.to {
            return Ok(MissingOutcome::Upcoming);
        }

        if !still_paired() || self.ctx.guard().is_guarded(local_id) {
            return Ok(MissingOutcome::Skipped);
        }

        let key = GuardKey::new(GuardOp::Delete, local_id);
        self.ctx.guard().register(key.clone());
        let result = self.ctx.delete_entity(local_id).await;
        self.ctx
            .guard()
            .release_after(key, self.ctx.settings().guard_ttl);

        match result {
            Ok(()) => {}
            Err(e) if e.is_stale_reference() => {}
            Err(e) => return Err(e),
        }

        self.ctx.with_mappings(|m| m.remove_by_remote(remote_id));
        debug!(%remote_id, %local_id, "Deleted scheduled entity");
        Ok(MissingOutcome::Deleted)
    }
}
