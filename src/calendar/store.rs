// src/calendar/store.rs
//
// Keyed lookups and writes for calendar events - only what the sync engine
// needs. Each write commits independently, so a pass that fails partway
// keeps its earlier progress.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::models::CalendarEvent;

/// Look up the local twin of a provider event. The (user_id, external_id)
/// pair is the idempotent matching key for imports.
pub async fn find_by_external_id(
    pool: &SqlitePool,
    user_id: &str,
    external_id: &str,
) -> Result<Option<CalendarEvent>, sqlx::Error> {
    sqlx::query_as::<_, CalendarEvent>(
        "SELECT * FROM calendar_events WHERE user_id = ? AND external_id = ?",
    )
    .bind(user_id)
    .bind(external_id)
    .fetch_optional(pool)
    .await
}

/// Local events never sent to the provider. The NULL external_id check is
/// the sole idempotency key for exports.
pub async fn find_unsynced(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Vec<CalendarEvent>, sqlx::Error> {
    sqlx::query_as::<_, CalendarEvent>(
        "SELECT * FROM calendar_events WHERE user_id = ? AND external_id IS NULL",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn count_unsynced(pool: &SqlitePool, user_id: &str) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM calendar_events WHERE user_id = ? AND external_id IS NULL",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn insert_event(pool: &SqlitePool, event: &CalendarEvent) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO calendar_events (
            id, user_id, contact_id, title, description, location,
            start_time, end_time, event_type, status, meet_link,
            external_id, external_calendar_id, attendees, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&event.id)
    .bind(&event.user_id)
    .bind(&event.contact_id)
    .bind(&event.title)
    .bind(&event.description)
    .bind(&event.location)
    .bind(event.start_time)
    .bind(event.end_time)
    .bind(event.event_type)
    .bind(event.status)
    .bind(&event.meet_link)
    .bind(&event.external_id)
    .bind(&event.external_calendar_id)
    .bind(&event.attendees)
    .bind(event.created_at)
    .bind(event.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Persist the translatable fields after a last-writer-wins overwrite from
/// the provider copy. Bumps updated_at so a stale re-fetch of the same
/// provider version does not overwrite again.
pub async fn apply_remote_update(
    pool: &SqlitePool,
    event: &CalendarEvent,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE calendar_events
        SET title = ?, description = ?, location = ?, start_time = ?,
            end_time = ?, meet_link = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&event.title)
    .bind(&event.description)
    .bind(&event.location)
    .bind(event.start_time)
    .bind(event.end_time)
    .bind(&event.meet_link)
    .bind(Utc::now())
    .bind(&event.id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record the provider identifiers returned by an export. Once written, the
/// event carries a non-null external_id forever and is excluded from every
/// future export pass.
pub async fn link_external(
    pool: &SqlitePool,
    event_id: &str,
    external_id: &str,
    external_calendar_id: &str,
    meet_link: Option<&str>,
    linked_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE calendar_events
        SET external_id = ?, external_calendar_id = ?,
            meet_link = COALESCE(?, meet_link), updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(external_id)
    .bind(external_calendar_id)
    .bind(meet_link)
    .bind(linked_at)
    .bind(event_id)
    .execute(pool)
    .await?;
    Ok(())
}
