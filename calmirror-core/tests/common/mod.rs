//! In-memory collaborators for engine tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use calmirror_core::config::{QueueConfig, QueuesConfig, SyncSettings};
use calmirror_core::{
    CalendarEvent, Collaborators, DateRange, EntityDraft, EventDraft, MappingSnapshot,
    MappingStorage, Origin, PassReport, PushHandlers, ReconciliationEngine, RemoteCalendar,
    RetryPolicy, ScheduledEntity, SchedulingService, SyncContext, SyncError, SyncResult,
};

pub const BOT_ID: &str = "bot-1";

/// Fixed "now" for reconciliation passes.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
}

pub fn calendar_event(id: &str, summary: &str, start: DateTime<Utc>) -> CalendarEvent {
    CalendarEvent {
        id: id.to_string(),
        summary: summary.to_string(),
        description: None,
        start,
        end: start + chrono::Duration::minutes(30),
        location: None,
        html_link: Some(format!("https://calendar.example/{id}")),
        origin: None,
    }
}

pub fn entity(id: &str, name: &str, start: DateTime<Utc>) -> ScheduledEntity {
    ScheduledEntity {
        id: id.to_string(),
        name: name.to_string(),
        description: Some("Bring snacks".to_string()),
        start,
        end: Some(start + chrono::Duration::hours(2)),
        location: None,
        creator_id: Some("user-7".to_string()),
        origin: None,
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RemoteCalls {
    pub list: usize,
    pub insert: usize,
    pub update: usize,
    pub delete: usize,
}

#[derive(Default)]
struct RemoteState {
    events: BTreeMap<String, CalendarEvent>,
    next_id: u64,
    calls: RemoteCalls,
    list_failures: usize,
    fail_inserts: bool,
}

#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<RemoteState>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, event: CalendarEvent) {
        self.state.lock().unwrap().events.insert(event.id.clone(), event);
    }

    pub fn remove(&self, id: &str) {
        self.state.lock().unwrap().events.remove(id);
    }

    pub fn event(&self, id: &str) -> Option<CalendarEvent> {
        self.state.lock().unwrap().events.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().events.len()
    }

    pub fn calls(&self) -> RemoteCalls {
        self.state.lock().unwrap().calls
    }

    /// The next `n` list calls fail with a transient error.
    pub fn fail_lists(&self, n: usize) {
        self.state.lock().unwrap().list_failures = n;
    }

    pub fn fail_inserts(&self) {
        self.state.lock().unwrap().fail_inserts = true;
    }

    fn materialize(id: String, draft: &EventDraft) -> CalendarEvent {
        CalendarEvent {
            html_link: Some(format!("https://calendar.example/{id}")),
            id,
            summary: draft.summary.clone(),
            description: Some(draft.description.clone()),
            start: parse(&draft.start),
            end: parse(&draft.end),
            location: draft.location.clone(),
            origin: Some(draft.origin),
        }
    }
}

fn parse(wire: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(wire).unwrap().with_timezone(&Utc)
}

#[async_trait]
impl RemoteCalendar for FakeRemote {
    async fn list_events(&self, range: &DateRange) -> SyncResult<Vec<CalendarEvent>> {
        let mut state = self.state.lock().unwrap();
        state.calls.list += 1;
        if state.list_failures > 0 {
            state.list_failures -= 1;
            return Err(SyncError::Transient("connection reset".into()));
        }

        let mut events: Vec<CalendarEvent> = state
            .events
            .values()
            .filter(|e| range.contains(e.start))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.start);
        Ok(events)
    }

    async fn insert_event(&self, draft: &EventDraft) -> SyncResult<CalendarEvent> {
        let mut state = self.state.lock().unwrap();
        state.calls.insert += 1;
        if state.fail_inserts {
            return Err(SyncError::Provider("calendar is read-only".into()));
        }

        state.next_id += 1;
        let event = Self::materialize(format!("g-new-{}", state.next_id), draft);
        state.events.insert(event.id.clone(), event.clone());
        Ok(event)
    }

    async fn update_event(&self, event_id: &str, draft: &EventDraft) -> SyncResult<CalendarEvent> {
        let mut state = self.state.lock().unwrap();
        state.calls.update += 1;
        if !state.events.contains_key(event_id) {
            return Err(SyncError::NotFound(event_id.to_string()));
        }

        let event = Self::materialize(event_id.to_string(), draft);
        state.events.insert(event.id.clone(), event.clone());
        Ok(event)
    }

    async fn delete_event(&self, event_id: &str) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.delete += 1;
        match state.events.remove(event_id) {
            Some(_) => Ok(()),
            None => Err(SyncError::NotFound(event_id.to_string())),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingCalls {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub lookup: usize,
}

#[derive(Default)]
struct SchedulingState {
    entities: BTreeMap<String, ScheduledEntity>,
    next_id: u64,
    calls: SchedulingCalls,
    rejected_names: HashSet<String>,
}

#[derive(Default)]
pub struct FakeScheduling {
    state: Mutex<SchedulingState>,
}

impl FakeScheduling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, entity: ScheduledEntity) {
        self.state.lock().unwrap().entities.insert(entity.id.clone(), entity);
    }

    /// Delete out of band, without the engine knowing.
    pub fn remove(&self, id: &str) {
        self.state.lock().unwrap().entities.remove(id);
    }

    pub fn entity(&self, id: &str) -> Option<ScheduledEntity> {
        self.state.lock().unwrap().entities.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entities.len()
    }

    pub fn calls(&self) -> SchedulingCalls {
        self.state.lock().unwrap().calls
    }

    /// Creates of entities with this name fail permanently.
    pub fn reject(&self, name: &str) {
        self.state.lock().unwrap().rejected_names.insert(name.to_string());
    }

    fn materialize(id: String, draft: &EntityDraft) -> ScheduledEntity {
        ScheduledEntity {
            id,
            name: draft.name.clone(),
            description: Some(draft.description.clone()),
            start: draft.start,
            end: Some(draft.end),
            location: Some(draft.location.clone()),
            creator_id: Some(BOT_ID.to_string()),
            origin: Some(draft.origin),
        }
    }
}

#[async_trait]
impl SchedulingService for FakeScheduling {
    async fn create_entity(&self, draft: &EntityDraft) -> SyncResult<ScheduledEntity> {
        let mut state = self.state.lock().unwrap();
        state.calls.create += 1;
        if state.rejected_names.contains(&draft.name) {
            return Err(SyncError::Provider(format!("Invalid entity: {}", draft.name)));
        }

        state.next_id += 1;
        let entity = Self::materialize(format!("d-{}", state.next_id), draft);
        state.entities.insert(entity.id.clone(), entity.clone());
        Ok(entity)
    }

    async fn update_entity(&self, entity_id: &str, draft: &EntityDraft) -> SyncResult<ScheduledEntity> {
        let mut state = self.state.lock().unwrap();
        state.calls.update += 1;
        if !state.entities.contains_key(entity_id) {
            return Err(SyncError::NotFound(entity_id.to_string()));
        }

        let entity = Self::materialize(entity_id.to_string(), draft);
        state.entities.insert(entity.id.clone(), entity.clone());
        Ok(entity)
    }

    async fn delete_entity(&self, entity_id: &str) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.delete += 1;
        match state.entities.remove(entity_id) {
            Some(_) => Ok(()),
            None => Err(SyncError::NotFound(entity_id.to_string())),
        }
    }

    async fn lookup_entity(&self, entity_id: &str) -> SyncResult<Option<ScheduledEntity>> {
        let mut state = self.state.lock().unwrap();
        state.calls.lookup += 1;
        Ok(state.entities.get(entity_id).cloned())
    }

    fn self_id(&self) -> &str {
        BOT_ID
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    stored: Mutex<Option<MappingSnapshot>>,
    saves: Mutex<usize>,
    corrupt: Mutex<bool>,
}

impl MemoryStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_snapshot(snapshot: MappingSnapshot) -> Arc<Self> {
        let storage = Self::default();
        *storage.stored.lock().unwrap() = Some(snapshot);
        Arc::new(storage)
    }

    /// Loads fail as if the file could not be parsed.
    pub fn corrupted() -> Arc<Self> {
        let storage = Self::default();
        *storage.corrupt.lock().unwrap() = true;
        Arc::new(storage)
    }

    pub fn saves(&self) -> usize {
        *self.saves.lock().unwrap()
    }

    pub fn stored(&self) -> Option<MappingSnapshot> {
        self.stored.lock().unwrap().clone()
    }
}

#[async_trait]
impl MappingStorage for MemoryStorage {
    async fn load(&self) -> SyncResult<Option<MappingSnapshot>> {
        if *self.corrupt.lock().unwrap() {
            return Err(SyncError::Persistence("Corrupt mapping file".into()));
        }
        Ok(self.stored())
    }

    async fn save(&self, snapshot: &MappingSnapshot) -> SyncResult<()> {
        *self.saves.lock().unwrap() += 1;
        *self.stored.lock().unwrap() = Some(snapshot.clone());
        Ok(())
    }
}

pub struct Harness {
    pub remote: Arc<FakeRemote>,
    pub scheduling: Arc<FakeScheduling>,
    pub storage: Arc<MemoryStorage>,
    pub ctx: Arc<SyncContext>,
}

impl Harness {
    pub fn engine(&self) -> ReconciliationEngine {
        ReconciliationEngine::new(Arc::clone(&self.ctx))
    }

    pub fn handlers(&self) -> PushHandlers {
        PushHandlers::new(Arc::clone(&self.ctx))
    }

    /// One reconciliation pass at the fixed `now()`.
    pub async fn pass(&self) -> PassReport {
        self.engine().run_pass_at(now()).await.unwrap()
    }
}

/// Queues wide enough to never throttle a test, short retry delays.
pub fn harness() -> Harness {
    harness_with_storage(MemoryStorage::new())
}

pub fn harness_with_storage(storage: Arc<MemoryStorage>) -> Harness {
    let remote = FakeRemote::new();
    let scheduling = FakeScheduling::new();

    let queue = QueueConfig {
        capacity: 1000,
        window: Duration::from_millis(10),
        tick: None,
    };
    let queues = QueuesConfig {
        remote: queue,
        scheduling: queue,
    };

    let ctx = SyncContext::new(
        Collaborators {
            remote: remote.clone(),
            scheduling: scheduling.clone(),
            storage: storage.clone(),
        },
        SyncSettings::default(),
        &queues,
        RetryPolicy::new(3, Duration::from_millis(10)),
    );

    Harness {
        remote,
        scheduling,
        storage,
        ctx: Arc::new(ctx),
    }
}

pub fn remote_origin(mut entity: ScheduledEntity) -> ScheduledEntity {
    entity.origin = Some(Origin::RemoteCalendar);
    entity
}
