// src/common/migrations.rs
//! Database migration and schema management

use sqlx::SqlitePool;
use std::env;
use tracing::{info, warn};

/// Run all database migrations
///
/// Tables are created if they don't exist; the full schema is only dropped
/// and recreated when RESET_DB=true, so server restarts never lose data.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let should_reset_db = env::var("RESET_DB").unwrap_or_else(|_| "false".to_string()) == "true";

    if should_reset_db {
        warn!("RESET_DB=true - Dropping all tables and recreating schema...");
        drop_all_tables(pool).await?;
        info!("Dropped old tables");
    }

    create_core_tables(pool).await?;
    create_calendar_tables(pool).await?;
    create_indexes(pool).await?;

    info!("Database migration completed successfully");

    Ok(())
}

async fn drop_all_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let tables = ["calendar_events", "user_google_tokens", "users"];
    for table in tables {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
            .execute(pool)
            .await?;
    }
    Ok(())
}

async fn create_core_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT,
            timezone TEXT,
            created_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_calendar_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // One OAuth credential row per user; refresh_token stays NULL for
    // one-time grants, which excludes the row from unattended sync
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_google_tokens (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            access_token TEXT NOT NULL,
            refresh_token TEXT,
            token_expires_at TEXT NOT NULL,
            calendar_sync_enabled INTEGER NOT NULL DEFAULT 1,
            primary_calendar_id TEXT,
            last_sync_at TEXT,
            sync_status TEXT NOT NULL DEFAULT 'NEVER_SYNCED',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // external_id/external_calendar_id are NULL until the event is linked
    // to the provider; a NULL external_id marks the row pending export
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS calendar_events (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            contact_id TEXT,
            title TEXT NOT NULL,
            description TEXT,
            location TEXT,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            event_type TEXT NOT NULL DEFAULT 'MEETING',
            status TEXT NOT NULL DEFAULT 'SCHEDULED',
            meet_link TEXT,
            external_id TEXT,
            external_calendar_id TEXT,
            attendees TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_indexes(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_calendar_events_user ON calendar_events(user_id)",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_calendar_events_external ON calendar_events(user_id, external_id)",
        "CREATE INDEX IF NOT EXISTS idx_calendar_events_start ON calendar_events(user_id, start_time)",
        "CREATE INDEX IF NOT EXISTS idx_google_tokens_sync ON user_google_tokens(calendar_sync_enabled)",
    ];

    for index in indexes {
        sqlx::query(index).execute(pool).await?;
    }

    Ok(())
}
