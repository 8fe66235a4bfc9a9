//! The remote calendar the mirror pulls from.

use async_trait::async_trait;

use crate::date_range::DateRange;
use crate::error::SyncResult;
use crate::event::{CalendarEvent, EventDraft};

/// Operations the engine needs from the remote calendar.
///
/// Implementations report a missing event as `SyncError::NotFound`, throttling
/// as `SyncError::RateLimited` and network trouble as `SyncError::Transient`.
#[async_trait]
pub trait RemoteCalendar: Send + Sync {
    /// Every event starting inside `range`, ordered by start. Implementations
    /// that paginate must return all pages.
    async fn list_events(&self, range: &DateRange) -> SyncResult<Vec<CalendarEvent>>;

    async fn insert_event(&self, draft: &EventDraft) -> SyncResult<CalendarEvent>;

    async fn update_event(&self, event_id: &str, draft: &EventDraft) -> SyncResult<CalendarEvent>;

    async fn delete_event(&self, event_id: &str) -> SyncResult<()>;
}
