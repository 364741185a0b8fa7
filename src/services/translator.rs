// src/services/translator.rs
//
// Bidirectional mapping between local calendar events and the provider
// representation. Inference rules on import: a conference link means a video
// call, a location mentioning "call" means a phone call, everything else is
// a meeting.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::calendar::models::{CalendarEvent, EventStatus, EventType};
use crate::common::generate_event_id;
use crate::services::google::{ExternalEvent, ExternalEventDraft, ExternalEventTime};

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("external event {0} has no usable start time")]
    MissingStart(String),

    #[error("external event {0} has no usable end time")]
    MissingEnd(String),
}

/// All-day events carry only a date; they are normalized to a
/// midnight-start instant. Timed events pass through unchanged.
pub fn resolve_time(time: &Option<ExternalEventTime>) -> Option<DateTime<Utc>> {
    match time {
        Some(ExternalEventTime::DateTime(dt)) => Some(*dt),
        Some(ExternalEventTime::DateOnly(date)) => {
            date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc())
        }
        None => None,
    }
}

fn infer_event_type(external: &ExternalEvent) -> EventType {
    if external.hangout_link.is_some() {
        EventType::VideoCall
    } else if external
        .location
        .as_deref()
        .map(|l| l.to_lowercase().contains("call"))
        .unwrap_or(false)
    {
        EventType::Call
    } else {
        EventType::Meeting
    }
}

fn join_attendees(emails: &[String]) -> Option<String> {
    if emails.is_empty() {
        None
    } else {
        Some(emails.join(","))
    }
}

fn split_attendees(stored: Option<&str>) -> Vec<String> {
    stored
        .map(|s| {
            s.split(',')
                .map(|email| email.trim().to_string())
                .filter(|email| !email.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Build a brand-new local event from a provider event that has no local
/// twin yet. The caller has already established the event is in-window and
/// not cancelled.
pub fn to_local_event(
    user_id: &str,
    external: &ExternalEvent,
    now: DateTime<Utc>,
) -> Result<CalendarEvent, TranslationError> {
    let start_time = resolve_time(&external.start)
        .ok_or_else(|| TranslationError::MissingStart(external.id.clone()))?;
    let end_time = resolve_time(&external.end)
        .ok_or_else(|| TranslationError::MissingEnd(external.id.clone()))?;

    Ok(CalendarEvent {
        id: generate_event_id(),
        user_id: user_id.to_string(),
        contact_id: None,
        title: external
            .summary
            .clone()
            .unwrap_or_else(|| "Untitled".to_string()),
        description: external.description.clone(),
        location: external.location.clone(),
        start_time,
        end_time,
        event_type: infer_event_type(external),
        status: EventStatus::Scheduled,
        meet_link: external.hangout_link.clone(),
        external_id: Some(external.id.clone()),
        external_calendar_id: None,
        attendees: join_attendees(&external.attendees),
        created_at: now,
        updated_at: now,
    })
}

/// Last-writer-wins overwrite of the translatable fields. Start and end are
/// only replaced when the provider sends full instants; all-day updates
/// leave the stored times alone. Type, status, and attendees are local
/// concerns and survive the overwrite.
pub fn apply_external(local: &mut CalendarEvent, external: &ExternalEvent) {
    local.title = external
        .summary
        .clone()
        .unwrap_or_else(|| "Untitled".to_string());
    local.description = external.description.clone();
    local.location = external.location.clone();

    if let Some(ExternalEventTime::DateTime(start)) = external.start {
        local.start_time = start;
    }
    if let Some(ExternalEventTime::DateTime(end)) = external.end {
        local.end_time = end;
    }

    if let Some(ref link) = external.hangout_link {
        local.meet_link = Some(link.clone());
    }
}

/// Outbound payload for a local event being exported. Timestamps go out as
/// explicit UTC instants; a video call asks the provider to create a
/// conference link.
pub fn to_draft(local: &CalendarEvent) -> ExternalEventDraft {
    ExternalEventDraft {
        summary: local.title.clone(),
        description: local.description.clone(),
        location: local.location.clone(),
        start: local.start_time,
        end: local.end_time,
        attendees: split_attendees(local.attendees.as_deref()),
        request_conference: local.event_type == EventType::VideoCall,
    }
}
