// src/calendar/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ============================================================================
// Event Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum EventType {
    #[serde(rename = "MEETING")]
    #[sqlx(rename = "MEETING")]
    Meeting,
    #[serde(rename = "CALL")]
    #[sqlx(rename = "CALL")]
    Call,
    #[serde(rename = "VIDEO_CALL")]
    #[sqlx(rename = "VIDEO_CALL")]
    VideoCall,
    #[serde(rename = "FOLLOW_UP")]
    #[sqlx(rename = "FOLLOW_UP")]
    FollowUp,
    #[serde(rename = "OTHER")]
    #[sqlx(rename = "OTHER")]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum EventStatus {
    #[serde(rename = "SCHEDULED")]
    #[sqlx(rename = "SCHEDULED")]
    Scheduled,
    #[serde(rename = "CONFIRMED")]
    #[sqlx(rename = "CONFIRMED")]
    Confirmed,
    #[serde(rename = "CANCELLED")]
    #[sqlx(rename = "CANCELLED")]
    Cancelled,
    #[serde(rename = "COMPLETED")]
    #[sqlx(rename = "COMPLETED")]
    Completed,
}

/// Locally-owned calendar event.
///
/// A non-null `external_id` marks the event as linked to the provider; a
/// null one marks it local-only, pending export. `updated_at` is the
/// conflict-comparison timestamp for last-writer-wins. Attendees are stored
/// as a comma-joined email list, ordered, duplicates preserved.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub user_id: String,
    pub contact_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub event_type: EventType,
    pub status: EventStatus,
    pub meet_link: Option<String>,
    pub external_id: Option<String>,
    pub external_calendar_id: Option<String>,
    pub attendees: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Boundary DTOs
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUrlResponse {
    pub auth_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUrlQuery {
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub code: String,
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusResponse {
    pub connected: bool,
    pub sync_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_calendar_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub pending_changes: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResultResponse {
    pub events_imported: u32,
    pub events_exported: u32,
    pub conflicts: u32,
    pub synced_at: DateTime<Utc>,
    pub message: String,
}
