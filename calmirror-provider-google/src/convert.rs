//! Conversion between Google Calendar events and the engine's types.
//!
//! The origin marker travels as a tag on the last line of the description.

use anyhow::{Context, Result, bail};
use calmirror_core::event::{split_origin_tag, with_origin_tag};
use calmirror_core::{CalendarEvent, EventDraft};
use chrono::{DateTime, NaiveDate, Utc};
use google_calendar::types::{Event, EventDateTime};

pub trait FromGoogle {
    fn from_google(event: Event) -> Result<Self>
    where
        Self: Sized;
}

impl FromGoogle for CalendarEvent {
    fn from_google(event: Event) -> Result<Self> {
        let start = instant(event.start.as_ref()).context("Event has no start time")?;
        let end = instant(event.end.as_ref()).unwrap_or(start);

        let (description, origin) = split_origin_tag(&event.description);

        Ok(CalendarEvent {
            id: event.id,
            summary: event.summary,
            description: non_empty(description),
            start,
            end,
            location: non_empty(event.location),
            html_link: non_empty(event.html_link),
            origin,
        })
    }
}

pub trait ToGoogle {
    fn to_google(&self) -> Result<Event>;
}

impl ToGoogle for EventDraft {
    fn to_google(&self) -> Result<Event> {
        Ok(Event {
            summary: self.summary.clone(),
            description: with_origin_tag(&self.description, self.origin),
            location: self.location.clone().unwrap_or_default(),
            start: Some(date_time(&self.start)?),
            end: Some(date_time(&self.end)?),
            ..Default::default()
        })
    }
}

/// All-day events start at midnight UTC.
fn instant(time: Option<&EventDateTime>) -> Option<DateTime<Utc>> {
    let time = time?;
    time.date_time.or_else(|| time.date.and_then(midnight))
}

fn midnight(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc())
}

fn date_time(wire: &str) -> Result<EventDateTime> {
    let Ok(parsed) = DateTime::parse_from_rfc3339(wire) else {
        bail!("Invalid event time: {wire}");
    };

    Ok(EventDateTime {
        date: None,
        date_time: Some(parsed.with_timezone(&Utc)),
        time_zone: "UTC".to_string(),
    })
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() { None } else { Some(s) }
}
