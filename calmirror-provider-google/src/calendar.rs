//! `RemoteCalendar` backed by the Google Calendar API.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use calmirror_core::{CalendarEvent, DateRange, EventDraft, RemoteCalendar, SyncError, SyncResult};
use google_calendar::{Client, ClientError};
use http::header::RETRY_AFTER;
use http::{HeaderMap, StatusCode};
use google_calendar::types::{OrderBy, SendUpdates};
use tracing::{debug, warn};

use crate::app_config;
use crate::convert::{FromGoogle, ToGoogle};
use crate::session::Session;

pub struct GoogleCalendar {
    calendar_id: String,
    account: String,
    base_dir: PathBuf,
}

impl GoogleCalendar {
    /// Calendar `calendar_id` as seen by `account`, with credentials and
    /// sessions under `~/.config/calmirror/google`.
    pub fn new(calendar_id: &str, account: &str) -> Result<Self> {
        Ok(Self::with_base_dir(calendar_id, account, app_config::base_dir()?))
    }

    pub fn with_base_dir(calendar_id: &str, account: &str, base_dir: PathBuf) -> Self {
        GoogleCalendar {
            calendar_id: calendar_id.to_string(),
            account: account.to_string(),
            base_dir,
        }
    }

    /// Load the session fresh for every call; a long running daemon outlives
    /// any single access token.
    async fn client(&self) -> SyncResult<Client> {
        let credentials =
            app_config::load(&self.base_dir).map_err(|e| SyncError::Config(format!("{e:#}")))?;
        let session = Session::load_valid(&self.base_dir, &self.account, &credentials)
            .await
            .map_err(|e| SyncError::Provider(format!("{e:#}")))?;
        Ok(session.client(&credentials))
    }
}

#[async_trait]
impl RemoteCalendar for GoogleCalendar {
    async fn list_events(&self, range: &DateRange) -> SyncResult<Vec<CalendarEvent>> {
        let client = self.client().await?;

        let response = client
            .events()
            .list_all(
                &self.calendar_id,
                "",                  // i_cal_uid
                0,                   // max_attendees
                OrderBy::StartTime,  // order_by
                &[],                 // private_extended_property
                "",                  // q (search query)
                &[],                 // shared_extended_property
                false,               // show_deleted
                false,               // show_hidden_invitations
                true,                // single_events: instances, not recurring masters
                &range.to_rfc3339(),   // time_max
                &range.from_rfc3339(), // time_min
                "",                    // time_zone
                "",                    // updated_min
            )
            .await
            .map_err(|e| classify("Failed to fetch events", e))?;

        let mut events = Vec::new();
        for google_event in response.body {
            if google_event.status == "cancelled" || google_event.id.is_empty() {
                continue;
            }

            let id = google_event.id.clone();
            match CalendarEvent::from_google(google_event) {
                Ok(event) => events.push(event),
                Err(e) => warn!(event_id = %id, error = %e, "Skipping unreadable Google event"),
            }
        }
        events.sort_by_key(|e| e.start);

        debug!(count = events.len(), calendar = %self.calendar_id, "Fetched Google events");
        Ok(events)
    }

    async fn insert_event(&self, draft: &EventDraft) -> SyncResult<CalendarEvent> {
        let google_event = draft.to_google().map_err(|e| SyncError::Provider(e.to_string()))?;
        let client = self.client().await?;

        let response = client
            .events()
            .insert(
                &self.calendar_id,
                0,
                0,
                false,
                SendUpdates::None,
                false,
                &google_event,
            )
            .await
            .map_err(|e| classify(&format!("Failed to create event {}", draft.summary), e))?;

        CalendarEvent::from_google(response.body).map_err(|e| SyncError::Provider(e.to_string()))
    }

    async fn update_event(&self, event_id: &str, draft: &EventDraft) -> SyncResult<CalendarEvent> {
        let mut google_event = draft.to_google().map_err(|e| SyncError::Provider(e.to_string()))?;
        google_event.id = event_id.to_string();
        let client = self.client().await?;

        let response = client
            .events()
            .update(
                &self.calendar_id,
                event_id,
                0,
                0,
                false,
                SendUpdates::None,
                false,
                &google_event,
            )
            .await
            .map_err(|e| classify(&format!("Failed to update event {event_id}"), e))?;

        CalendarEvent::from_google(response.body).map_err(|e| SyncError::Provider(e.to_string()))
    }

    async fn delete_event(&self, event_id: &str) -> SyncResult<()> {
        let client = self.client().await?;

        client
            .events()
            .delete(&self.calendar_id, event_id, false, SendUpdates::None)
            .await
            .map_err(|e| classify(&format!("Failed to delete event {event_id}"), e))?;

        Ok(())
    }
}

/// Sort a client error into the engine's taxonomy by the HTTP status it reports.
fn classify(context: &str, error: ClientError) -> SyncError {
    let message = format!("{context}: {error}");

    match &error {
        ClientError::HttpError {
            status,
            headers,
            error,
        } => classify_status(*status, headers, error, message),
        ClientError::ReqwestError(e) if e.is_timeout() || e.is_connect() => {
            SyncError::Transient(message)
        }
        ClientError::ReqwestError(e) => match e.status() {
            Some(status) => classify_status(status, &HeaderMap::new(), "", message),
            None => SyncError::Provider(message),
        },
        // Raised while sending, after the client's own retries
        ClientError::ReqwestMiddleWareError(_) => SyncError::Transient(message),
        _ => SyncError::Provider(message),
    }
}

fn classify_status(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    message: String,
) -> SyncError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => SyncError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => SyncError::RateLimited {
            retry_after: retry_after(headers),
        },
        // Google reports quota exhaustion as 403 with a rate limit reason
        StatusCode::FORBIDDEN if is_rate_limit_reason(body) => SyncError::RateLimited {
            retry_after: retry_after(headers),
        },
        s if s.is_server_error() => SyncError::Transient(message),
        _ => SyncError::Provider(message),
    }
}

fn is_rate_limit_reason(body: &str) -> bool {
    ["\"rateLimitExceeded\"", "\"userRateLimitExceeded\""]
        .iter()
        .any(|reason| body.contains(reason))
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
