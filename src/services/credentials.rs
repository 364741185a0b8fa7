// src/services/credentials.rs
//
// Repository for per-user Google OAuth credentials. One row per user;
// created on connect, mutated on every refresh and sync attempt, deleted
// on disconnect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

/// Outcome of the most recent sync attempt, persisted on the credential row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum SyncStatus {
    #[serde(rename = "NEVER_SYNCED")]
    #[sqlx(rename = "NEVER_SYNCED")]
    NeverSynced,
    #[serde(rename = "CONNECTED")]
    #[sqlx(rename = "CONNECTED")]
    Connected,
    #[serde(rename = "SYNCED")]
    #[sqlx(rename = "SYNCED")]
    Synced,
    #[serde(rename = "SYNC_FAILED")]
    #[sqlx(rename = "SYNC_FAILED")]
    SyncFailed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::NeverSynced => "NEVER_SYNCED",
            SyncStatus::Connected => "CONNECTED",
            SyncStatus::Synced => "SYNCED",
            SyncStatus::SyncFailed => "SYNC_FAILED",
        }
    }
}

/// Stored OAuth credential set plus sync metadata for one user.
///
/// A NULL refresh token means the grant was one-time and cannot be renewed
/// unattended; such rows never appear in `list_sync_enabled`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GoogleCredential {
    pub id: String,
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: DateTime<Utc>,
    pub calendar_sync_enabled: bool,
    pub primary_calendar_id: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub sync_status: SyncStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GoogleCredential {
    /// True when `now` is at or past the stored expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.token_expires_at
    }
}

/// Credential repository over the user_google_tokens table
#[derive(Debug, Clone)]
pub struct CredentialStore {
    db: SqlitePool,
}

impl CredentialStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn find_by_user(
        &self,
        user_id: &str,
    ) -> Result<Option<GoogleCredential>, sqlx::Error> {
        sqlx::query_as::<_, GoogleCredential>(
            "SELECT * FROM user_google_tokens WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await
    }

    /// Insert or replace the credential row for its user
    pub async fn upsert(&self, credential: &GoogleCredential) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO user_google_tokens (
                id, user_id, access_token, refresh_token, token_expires_at,
                calendar_sync_enabled, primary_calendar_id, last_sync_at,
                sync_status, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                token_expires_at = excluded.token_expires_at,
                calendar_sync_enabled = excluded.calendar_sync_enabled,
                primary_calendar_id = excluded.primary_calendar_id,
                last_sync_at = excluded.last_sync_at,
                sync_status = excluded.sync_status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&credential.id)
        .bind(&credential.user_id)
        .bind(&credential.access_token)
        .bind(&credential.refresh_token)
        .bind(credential.token_expires_at)
        .bind(credential.calendar_sync_enabled)
        .bind(&credential.primary_calendar_id)
        .bind(credential.last_sync_at)
        .bind(credential.sync_status)
        .bind(credential.created_at)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;

        debug!(user_id = %credential.user_id, "Credential upserted");
        Ok(())
    }

    /// Idempotent: deleting a missing credential is a no-op
    pub async fn delete(&self, user_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM user_google_tokens WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Credentials eligible for unattended sync: the per-user flag is on AND
    /// a refresh token is stored (access tokens alone expire too fast to
    /// survive a scheduler interval)
    pub async fn list_sync_enabled(&self) -> Result<Vec<GoogleCredential>, sqlx::Error> {
        sqlx::query_as::<_, GoogleCredential>(
            r#"
            SELECT * FROM user_google_tokens
            WHERE calendar_sync_enabled = 1 AND refresh_token IS NOT NULL
            "#,
        )
        .fetch_all(&self.db)
        .await
    }

    pub async fn mark_synced(
        &self,
        user_id: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE user_google_tokens
            SET sync_status = 'SYNCED', last_sync_at = ?, updated_at = ?
            WHERE user_id = ?
            "#,
        )
        .bind(synced_at)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Record a failed attempt. The credential row itself is kept: recovery
    /// from a dead refresh token requires a human re-connect, not deletion.
    pub async fn mark_sync_failed(&self, user_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE user_google_tokens
            SET sync_status = 'SYNC_FAILED', updated_at = ?
            WHERE user_id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}
