//! Field mapping between remote calendar events and scheduled entities.
//!
//! Lossy by design: descriptions are truncated and metadata neither side
//! understands is dropped. Footers added here are stripped again on the way
//! back so repeated round trips do not stack them.

use chrono::{DateTime, Duration, SecondsFormat, Utc};

use crate::event::{CalendarEvent, EntityDraft, EntityLocation, EventDraft, Origin, ScheduledEntity};

/// Characters of remote description carried over to a scheduled entity.
pub const DESCRIPTION_BUDGET: usize = 800;

/// Scheduled entity names are capped by the platform.
pub const NAME_LIMIT: usize = 100;

pub const UNTITLED_EVENT: &str = "Untitled Event";
pub const LOCATION_PLACEHOLDER: &str = "See calendar for details";
pub const VIEW_LINK_PREFIX: &str = "View in Google Calendar: ";
pub const SCHEDULING_MARKER: &str = "Synced from Discord scheduled event";

const TRUNCATION_SUFFIX: &str = "...";

/// Remote events without an end, or scheduled entities without one, last this long.
pub fn default_duration() -> Duration {
    Duration::hours(1)
}

/// Remote calendar event -> scheduled entity payload.
pub fn to_entity_draft(event: &CalendarEvent) -> EntityDraft {
    let name = match event.summary.trim() {
        "" => UNTITLED_EVENT.to_string(),
        summary => truncate(summary, NAME_LIMIT),
    };

    let body = event
        .description
        .as_deref()
        .map(|d| strip_trailing_line(d, |line| line == SCHEDULING_MARKER))
        .unwrap_or_default();
    let mut description = truncate(body.trim(), DESCRIPTION_BUDGET);
    if let Some(link) = &event.html_link {
        append_line(&mut description, &format!("{VIEW_LINK_PREFIX}{link}"));
    }

    let location = event
        .location
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .unwrap_or(LOCATION_PLACEHOLDER)
        .to_string();

    EntityDraft {
        name,
        description,
        start: event.start,
        end: end_after(event.start, Some(event.end)),
        location: EntityLocation { location },
        origin: event.origin.unwrap_or(Origin::RemoteCalendar),
    }
}

/// Scheduled entity -> remote calendar event payload.
pub fn to_event_draft(entity: &ScheduledEntity) -> EventDraft {
    let body = entity
        .description
        .as_deref()
        .map(|d| strip_trailing_line(d, |line| line.starts_with(VIEW_LINK_PREFIX)))
        .unwrap_or_default();
    let mut description = body.trim().to_string();
    append_line(&mut description, SCHEDULING_MARKER);

    EventDraft {
        summary: entity.name.clone(),
        description,
        start: to_wire_time(entity.start),
        end: to_wire_time(end_after(entity.start, entity.end)),
        location: entity
            .location
            .as_ref()
            .map(|l| l.location.trim().to_string())
            .filter(|l| !l.is_empty()),
        origin: entity.origin.unwrap_or(Origin::Scheduling),
    }
}

/// RFC 3339 in UTC with second precision.
pub fn to_wire_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn end_after(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match end {
        Some(end) if end > start => end,
        _ => start + default_duration(),
    }
}

/// Truncate to `limit` characters (not bytes), marking the cut.
fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }

    let keep = limit.saturating_sub(TRUNCATION_SUFFIX.len());
    let mut out: String = text.chars().take(keep).collect();
    out.truncate(out.trim_end().len());
    out.push_str(TRUNCATION_SUFFIX);
    out
}

fn append_line(text: &mut String, line: &str) {
    if !text.is_empty() {
        text.push_str("\n\n");
    }
    text.push_str(line);
}

/// Drop the last non-empty line if it matches, with the blank lines before it.
fn strip_trailing_line(text: &str, matches: impl Fn(&str) -> bool) -> String {
    let trimmed = text.trim_end();
    let (head, last) = match trimmed.rsplit_once('\n') {
        Some((head, last)) => (head, last),
        None => ("", trimmed),
    };

    if matches(last.trim()) {
        head.trim_end().to_string()
    } else {
        trimmed.to_string()
    }
}
