//! The engine context: every piece of shared sync state in one place.
//!
//! One context is built per engine and handed to the reconciliation engine
//! and the push handlers. Nothing in the crate is process-global, so tests
//! build as many independent contexts as they like.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::config::{QueuesConfig, SyncConfig, SyncSettings};
use crate::date_range::DateRange;
use crate::error::SyncResult;
use crate::event::{CalendarEvent, EntityDraft, EventDraft, ScheduledEntity};
use crate::guard::SyncLoopGuard;
use crate::mapping::{MappingCounts, MappingStorage, MappingStore};
use crate::queue::RateLimitedQueue;
use crate::remote::RemoteCalendar;
use crate::retry::RetryPolicy;
use crate::scheduling::SchedulingService;

/// The external systems a context talks to.
pub struct Collaborators {
    pub remote: Arc<dyn RemoteCalendar>,
    pub scheduling: Arc<dyn SchedulingService>,
    pub storage: Arc<dyn MappingStorage>,
}

pub struct SyncContext {
    settings: SyncSettings,
    mappings: Mutex<MappingStore>,
    guard: SyncLoopGuard,
    remote_queue: RateLimitedQueue,
    scheduling_queue: RateLimitedQueue,
    retry: RetryPolicy,
    remote: Arc<dyn RemoteCalendar>,
    scheduling: Arc<dyn SchedulingService>,
    storage: Arc<dyn MappingStorage>,
}

impl SyncContext {
    /// Build a context and start both dispatch queues. Needs a tokio runtime.
    pub fn new(
        collaborators: Collaborators,
        settings: SyncSettings,
        queues: &QueuesConfig,
        retry: RetryPolicy,
    ) -> Self {
        SyncContext {
            settings,
            mappings: Mutex::new(MappingStore::new()),
            guard: SyncLoopGuard::new(),
            remote_queue: RateLimitedQueue::new("remote", &queues.remote),
            scheduling_queue: RateLimitedQueue::new("scheduling", &queues.scheduling),
            retry,
            remote: collaborators.remote,
            scheduling: collaborators.scheduling,
            storage: collaborators.storage,
        }
    }

    pub fn from_config(config: &SyncConfig, collaborators: Collaborators) -> Self {
        SyncContext::new(
            collaborators,
            config.sync.clone(),
            &config.queues,
            RetryPolicy::from(&config.retry),
        )
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn guard(&self) -> &SyncLoopGuard {
        &self.guard
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn self_id(&self) -> &str {
        self.scheduling.self_id()
    }

    fn lock_mappings(&self) -> MutexGuard<'_, MappingStore> {
        self.mappings.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` against the mapping store. Never hold the result across an await.
    pub fn with_mappings<R>(&self, f: impl FnOnce(&mut MappingStore) -> R) -> R {
        f(&mut self.lock_mappings())
    }

    pub fn mapping_counts(&self) -> MappingCounts {
        self.lock_mappings().counts()
    }

    /// Load the durable mappings. A missing or unreadable file leaves the
    /// store empty; the next passes re-derive what is missing.
    pub async fn restore_mappings(&self) {
        match self.storage.load().await {
            Ok(Some(snapshot)) => {
                let store = MappingStore::restore(snapshot);
                let counts = store.counts();
                *self.lock_mappings() = store;
                info!(mappings = counts.remote_to_local, "Restored mappings");
            }
            Ok(None) => info!("No stored mappings, starting empty"),
            Err(e) => warn!(error = %e, "Could not restore mappings, starting empty"),
        }
    }

    /// Write the current mappings to durable storage. Failures are logged and
    /// reported as `false`; in-memory state stays authoritative.
    pub async fn persist(&self) -> bool {
        let snapshot = self.lock_mappings().snapshot();

        match self.storage.save(&snapshot).await {
            Ok(()) => {
                debug!(mappings = snapshot.remote_to_local.len(), "Mappings persisted");
                true
            }
            Err(e) => {
                warn!(error = %e, "Could not persist mappings");
                false
            }
        }
    }

    /// Through the remote queue, no retry; the pass as a whole is retried.
    pub async fn list_remote_events(&self, range: DateRange) -> SyncResult<Vec<CalendarEvent>> {
        let remote = Arc::clone(&self.remote);
        self.remote_queue
            .enqueue(move || async move { remote.list_events(&range).await })
            .await
    }

    pub async fn insert_remote(&self, draft: &EventDraft) -> SyncResult<CalendarEvent> {
        let draft = draft.clone();
        self.remote_call("insert remote event", move |remote| {
            let draft = draft.clone();
            async move { remote.insert_event(&draft).await }
        })
        .await
    }

    pub async fn update_remote(&self, event_id: &str, draft: &EventDraft) -> SyncResult<CalendarEvent> {
        let (event_id, draft) = (event_id.to_string(), draft.clone());
        self.remote_call("update remote event", move |remote| {
            let (event_id, draft) = (event_id.clone(), draft.clone());
            async move { remote.update_event(&event_id, &draft).await }
        })
        .await
    }

    pub async fn delete_remote(&self, event_id: &str) -> SyncResult<()> {
        let event_id = event_id.to_string();
        self.remote_call("delete remote event", move |remote| {
            let event_id = event_id.clone();
            async move { remote.delete_event(&event_id).await }
        })
        .await
    }

    pub async fn create_entity(&self, draft: &EntityDraft) -> SyncResult<ScheduledEntity> {
        let draft = draft.clone();
        self.scheduling_call("create scheduled entity", move |scheduling| {
            let draft = draft.clone();
            async move { scheduling.create_entity(&draft).await }
        })
        .await
    }

    pub async fn update_entity(
        &self,
        entity_id: &str,
        draft: &EntityDraft,
    ) -> SyncResult<ScheduledEntity> {
        let (entity_id, draft) = (entity_id.to_string(), draft.clone());
        self.scheduling_call("update scheduled entity", move |scheduling| {
            let (entity_id, draft) = (entity_id.clone(), draft.clone());
            async move { scheduling.update_entity(&entity_id, &draft).await }
        })
        .await
    }

    pub async fn delete_entity(&self, entity_id: &str) -> SyncResult<()> {
        let entity_id = entity_id.to_string();
        self.scheduling_call("delete scheduled entity", move |scheduling| {
            let entity_id = entity_id.clone();
            async move { scheduling.delete_entity(&entity_id).await }
        })
        .await
    }

    pub async fn lookup_entity(&self, entity_id: &str) -> SyncResult<Option<ScheduledEntity>> {
        let entity_id = entity_id.to_string();
        self.scheduling_call("lookup scheduled entity", move |scheduling| {
            let entity_id = entity_id.clone();
            async move { scheduling.lookup_entity(&entity_id).await }
        })
        .await
    }

    /// Each attempt is admitted to the remote queue separately.
    async fn remote_call<F, Fut, T>(&self, operation: &str, op: F) -> SyncResult<T>
    where
        F: Fn(Arc<dyn RemoteCalendar>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let op = Arc::new(op);
        self.retry
            .run(operation, || {
                let (op, remote) = (Arc::clone(&op), Arc::clone(&self.remote));
                self.remote_queue.enqueue(move || (*op)(remote))
            })
            .await
    }

    async fn scheduling_call<F, Fut, T>(&self, operation: &str, op: F) -> SyncResult<T>
    where
        F: Fn(Arc<dyn SchedulingService>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let op = Arc::new(op);
        self.retry
            .run(operation, || {
                let (op, scheduling) = (Arc::clone(&op), Arc::clone(&self.scheduling));
                self.scheduling_queue.enqueue(move || (*op)(scheduling))
            })
            .await
    }
}
