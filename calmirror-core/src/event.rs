//! Event types for both sides of the mirror.
//!
//! `CalendarEvent` is what the remote calendar hands back, `ScheduledEntity`
//! is what the community scheduling service hands back. Drafts are the write
//! payloads the translator produces; they carry no id because the target side
//! assigns one on create.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side first created an entity.
///
/// Stored in a dedicated field so echo detection is an exact comparison.
/// Providers encode it in their own wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    RemoteCalendar,
    Scheduling,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::RemoteCalendar => "remote_calendar",
            Origin::Scheduling => "scheduling",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "remote_calendar" => Some(Origin::RemoteCalendar),
            "scheduling" => Some(Origin::Scheduling),
            _ => None,
        }
    }
}

const TAG_PREFIX: &str = "[calmirror:origin=";
const TAG_SUFFIX: &str = "]";

/// Append the origin tag as the last line of a free-text field.
///
/// For providers whose wire format has no better place for it.
pub fn with_origin_tag(text: &str, origin: Origin) -> String {
    let tag = format!("{TAG_PREFIX}{}{TAG_SUFFIX}", origin.as_str());
    let text = text.trim_end();
    if text.is_empty() {
        tag
    } else {
        format!("{text}\n\n{tag}")
    }
}

/// Split a trailing origin tag off a free-text field.
///
/// Only an exact tag on the last line counts; the same text anywhere else is
/// left alone.
pub fn split_origin_tag(text: &str) -> (String, Option<Origin>) {
    let trimmed = text.trim_end();
    let (body, last_line) = match trimmed.rsplit_once('\n') {
        Some((body, last)) => (body, last),
        None => ("", trimmed),
    };

    let origin = last_line
        .trim()
        .strip_prefix(TAG_PREFIX)
        .and_then(|rest| rest.strip_suffix(TAG_SUFFIX))
        .and_then(Origin::parse);

    match origin {
        Some(origin) => (body.trim_end().to_string(), Some(origin)),
        None => (text.to_string(), None),
    }
}

/// An event on the remote calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub location: Option<String>,
    /// Link to the event in the remote calendar's own UI
    pub html_link: Option<String>,
    pub origin: Option<Origin>,
}

/// Where a scheduled entity takes place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityLocation {
    pub location: String,
}

/// A scheduled entity on the community scheduling service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEntity {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub location: Option<EntityLocation>,
    /// Platform identity of whoever created the entity
    pub creator_id: Option<String>,
    pub origin: Option<Origin>,
}

/// Write payload for the remote calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    pub summary: String,
    pub description: String,
    /// RFC 3339 in UTC, the remote calendar's wire format
    pub start: String,
    pub end: String,
    pub location: Option<String>,
    pub origin: Origin,
}

/// Write payload for the scheduling service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDraft {
    pub name: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub location: EntityLocation,
    pub origin: Origin,
}
