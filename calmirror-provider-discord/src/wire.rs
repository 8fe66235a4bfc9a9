//! Discord guild scheduled event payloads.

use calmirror_core::event::{split_origin_tag, with_origin_tag};
use calmirror_core::translate::to_wire_time;
use calmirror_core::{EntityDraft, EntityLocation, ScheduledEntity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Takes place outside Discord, at `entity_metadata.location`.
const ENTITY_TYPE_EXTERNAL: u8 = 3;
const PRIVACY_GUILD_ONLY: u8 = 2;
const STATUS_COMPLETED: u8 = 3;
const STATUS_CANCELED: u8 = 4;

/// Discord rejects longer descriptions.
const DESCRIPTION_LIMIT: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordScheduledEvent {
    pub id: String,
    #[serde(default)]
    pub guild_id: String,
    #[serde(default)]
    pub creator_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub scheduled_start_time: DateTime<Utc>,
    #[serde(default)]
    pub scheduled_end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entity_metadata: Option<EntityMetadata>,
    #[serde(default)]
    pub status: u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityMetadata {
    #[serde(default)]
    pub location: Option<String>,
}

impl DiscordScheduledEvent {
    /// Completed and canceled events can no longer be edited or started.
    pub fn is_finished(&self) -> bool {
        matches!(self.status, STATUS_COMPLETED | STATUS_CANCELED)
    }
}

impl From<DiscordScheduledEvent> for ScheduledEntity {
    fn from(event: DiscordScheduledEvent) -> Self {
        let (description, origin) = match event.description.as_deref() {
            Some(text) => split_origin_tag(text),
            None => (String::new(), None),
        };

        ScheduledEntity {
            id: event.id,
            name: event.name,
            description: (!description.is_empty()).then_some(description),
            start: event.scheduled_start_time,
            end: event.scheduled_end_time,
            location: event
                .entity_metadata
                .and_then(|m| m.location)
                .map(|location| EntityLocation { location }),
            creator_id: event.creator_id,
            origin,
        }
    }
}

/// Body of a create (POST) or modify (PATCH) request.
#[derive(Debug, Serialize)]
pub(crate) struct ScheduledEventRequest<'a> {
    name: &'a str,
    description: String,
    scheduled_start_time: String,
    scheduled_end_time: String,
    privacy_level: u8,
    entity_type: u8,
    entity_metadata: EntityMetadata,
}

impl<'a> From<&'a EntityDraft> for ScheduledEventRequest<'a> {
    fn from(draft: &'a EntityDraft) -> Self {
        ScheduledEventRequest {
            name: &draft.name,
            description: tagged_description(draft),
            scheduled_start_time: to_wire_time(draft.start),
            scheduled_end_time: to_wire_time(draft.end),
            privacy_level: PRIVACY_GUILD_ONLY,
            entity_type: ENTITY_TYPE_EXTERNAL,
            entity_metadata: EntityMetadata {
                location: Some(draft.location.location.clone()),
            },
        }
    }
}

/// The origin tag always survives; the body gives way when over the limit.
fn tagged_description(draft: &EntityDraft) -> String {
    let tagged = with_origin_tag(&draft.description, draft.origin);
    let overflow = tagged.chars().count().saturating_sub(DESCRIPTION_LIMIT);
    if overflow == 0 {
        return tagged;
    }

    let keep = draft
        .description
        .chars()
        .count()
        .saturating_sub(overflow + 3);
    let mut body: String = draft.description.chars().take(keep).collect();
    body.push_str("...");
    with_origin_tag(&body, draft.origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use calmirror_core::Origin;
    use chrono::TimeZone;

    fn draft(description: &str) -> EntityDraft {
        EntityDraft {
            name: "Standup".into(),
            description: description.into(),
            start: Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2025, 3, 3, 9, 30, 0).unwrap(),
            location: EntityLocation {
                location: "Room 4".into(),
            },
            origin: Origin::RemoteCalendar,
        }
    }

    #[test]
    fn test_request_is_external_event_with_tag() {
        let draft = draft("Daily check-in");
        let body = serde_json::to_value(ScheduledEventRequest::from(&draft)).unwrap();

        assert_eq!(body["entity_type"], 3);
        assert_eq!(body["privacy_level"], 2);
        assert_eq!(body["entity_metadata"]["location"], "Room 4");
        assert_eq!(body["scheduled_start_time"], "2025-03-03T09:00:00Z");
        assert_eq!(
            body["description"],
            "Daily check-in\n\n[calmirror:origin=remote_calendar]"
        );
    }

    #[test]
    fn test_long_description_keeps_tag_within_limit() {
        let draft = draft(&"x".repeat(1200));
        let description = tagged_description(&draft);

        assert_eq!(description.chars().count(), DESCRIPTION_LIMIT);
        assert!(description.ends_with("...\n\n[calmirror:origin=remote_calendar]"));
    }

    #[test]
    fn test_response_decodes_into_entity() {
        let json = r#"{
            "id": "1350000000000000001",
            "guild_id": "99",
            "creator_id": "42",
            "name": "Game night",
            "description": "Bring snacks\n\n[calmirror:origin=scheduling]",
            "scheduled_start_time": "2025-03-07T18:00:00+00:00",
            "scheduled_end_time": null,
            "entity_type": 3,
            "entity_metadata": { "location": "Lounge" },
            "status": 1
        }"#;

        let event: DiscordScheduledEvent = serde_json::from_str(json).unwrap();
        let entity = ScheduledEntity::from(event);

        assert_eq!(entity.description.as_deref(), Some("Bring snacks"));
        assert_eq!(entity.origin, Some(Origin::Scheduling));
        assert_eq!(entity.creator_id.as_deref(), Some("42"));
        assert_eq!(entity.location.unwrap().location, "Lounge");
        assert_eq!(entity.end, None);
        assert_eq!(
            entity.start,
            Utc.with_ymd_and_hms(2025, 3, 7, 18, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_untagged_description_has_no_origin() {
        let json = r#"{
            "id": "1",
            "name": "Raid",
            "description": "Made by hand",
            "scheduled_start_time": "2025-03-07T18:00:00Z"
        }"#;

        let entity = ScheduledEntity::from(serde_json::from_str::<DiscordScheduledEvent>(json).unwrap());
        assert_eq!(entity.description.as_deref(), Some("Made by hand"));
        assert_eq!(entity.origin, None);
    }
}
