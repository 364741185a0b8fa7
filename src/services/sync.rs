// src/services/sync.rs
//
// Two-way reconciliation between local calendar events and the provider,
// one user at a time. Import links or creates local twins of provider
// events; export pushes never-sent local events outward. Import always runs
// first: export's NULL-external-id selection relies on import having linked
// externally-originated rows.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::calendar::store;
use crate::services::credentials::{CredentialStore, GoogleCredential};
use crate::services::google::{CalendarProvider, GoogleError};
use crate::services::translator;

/// Fixed sliding window for every reconciliation pass: 30 days back, 90
/// days ahead, inclusive at both edges. Events outside are neither imported
/// nor re-checked; full-history sync is an explicit non-goal.
#[derive(Debug, Clone, Copy)]
pub struct SyncWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SyncWindow {
    pub const LOOKBACK_DAYS: i64 = 30;
    pub const LOOKAHEAD_DAYS: i64 = 90;

    pub fn around(now: DateTime<Utc>) -> Self {
        Self {
            start: now - Duration::days(Self::LOOKBACK_DAYS),
            end: now + Duration::days(Self::LOOKAHEAD_DAYS),
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

/// Counters for one reconciliation pass. `conflicts` counts last-writer-wins
/// overwrites where the provider copy was strictly newer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub imported: u32,
    pub exported: u32,
    pub conflicts: u32,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Google Calendar not connected")]
    NotConnected,

    #[error("Calendar sync is disabled for this account")]
    SyncDisabled,

    #[error("A sync is already running for this user")]
    AlreadyRunning,

    #[error("No primary calendar recorded; re-connect the account")]
    NoPrimaryCalendar,

    #[error("Provider error: {0}")]
    Provider(#[from] GoogleError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Serializes sync attempts per user so a manual trigger and the scheduler
/// never interleave writes to the same credential row
#[derive(Debug, Clone, Default)]
pub struct SyncGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl SyncGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// None when a sync for this user is already in flight
    pub fn begin(&self, user_id: &str) -> Option<SyncPermit> {
        let mut in_flight = self.in_flight.lock().unwrap();
        if in_flight.contains(user_id) {
            return None;
        }
        in_flight.insert(user_id.to_string());
        Some(SyncPermit {
            in_flight: Arc::clone(&self.in_flight),
            user_id: user_id.to_string(),
        })
    }
}

/// Released on drop, including the error paths of a failed sync
pub struct SyncPermit {
    in_flight: Arc<Mutex<HashSet<String>>>,
    user_id: String,
}

impl Drop for SyncPermit {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&self.user_id);
        }
    }
}

/// The reconciliation engine. Holds no per-user state: credentials flow in
/// as values and updated values flow back out through the store.
pub struct SyncService {
    db: SqlitePool,
    provider: Arc<dyn CalendarProvider>,
    credentials: Arc<CredentialStore>,
    guard: SyncGuard,
}

impl SyncService {
    pub fn new(
        db: SqlitePool,
        provider: Arc<dyn CalendarProvider>,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self {
            db,
            provider,
            credentials,
            guard: SyncGuard::new(),
        }
    }

    /// One full sync attempt for one user: load credential, refresh the
    /// access token if expired, reconcile, record the terminal status.
    /// Every exit path leaves sync_status reflecting the true outcome.
    pub async fn sync_user(&self, user_id: &str) -> Result<SyncOutcome, SyncError> {
        let _permit = self
            .guard
            .begin(user_id)
            .ok_or(SyncError::AlreadyRunning)?;

        let credential = self
            .credentials
            .find_by_user(user_id)
            .await?
            .ok_or(SyncError::NotConnected)?;

        if !credential.calendar_sync_enabled {
            return Err(SyncError::SyncDisabled);
        }

        let credential = if credential.is_expired(Utc::now()) {
            match self.provider.refresh_if_needed(credential).await {
                Ok(refreshed) => {
                    // Persist the rotated token; the credential row survives
                    // even when refresh fails, since recovery needs a human
                    self.credentials.upsert(&refreshed).await?;
                    refreshed
                }
                Err(e) => {
                    self.record_failure(user_id).await;
                    return Err(e.into());
                }
            }
        } else {
            credential
        };

        match self.reconcile(user_id, &credential).await {
            Ok(outcome) => {
                self.credentials.mark_synced(user_id, Utc::now()).await?;
                info!(
                    user_id = %user_id,
                    imported = outcome.imported,
                    exported = outcome.exported,
                    conflicts = outcome.conflicts,
                    "Sync completed"
                );
                Ok(outcome)
            }
            Err(e) => {
                self.record_failure(user_id).await;
                Err(e)
            }
        }
    }

    async fn record_failure(&self, user_id: &str) {
        if let Err(mark_err) = self.credentials.mark_sync_failed(user_id).await {
            error!(
                user_id = %user_id,
                error = %mark_err,
                "Failed to record sync failure on credential"
            );
        }
    }

    /// One import-then-export cycle over the fixed window. Rows persist
    /// independently, so a failure partway keeps all prior progress; the
    /// next run retries the same window from scratch.
    pub async fn reconcile(
        &self,
        user_id: &str,
        credential: &GoogleCredential,
    ) -> Result<SyncOutcome, SyncError> {
        let calendar_id = credential
            .primary_calendar_id
            .as_deref()
            .ok_or(SyncError::NoPrimaryCalendar)?;

        let window = SyncWindow::around(Utc::now());

        let (imported, conflicts) = self
            .import_pass(user_id, credential, calendar_id, &window)
            .await?;
        let exported = self.export_pass(user_id, credential, calendar_id).await?;

        Ok(SyncOutcome {
            imported,
            exported,
            conflicts,
        })
    }

    async fn import_pass(
        &self,
        user_id: &str,
        credential: &GoogleCredential,
        calendar_id: &str,
        window: &SyncWindow,
    ) -> Result<(u32, u32), SyncError> {
        let events = self
            .provider
            .list_events(credential, calendar_id, window)
            .await?;

        let mut imported = 0u32;
        let mut conflicts = 0u32;

        for external in events {
            // The provider is asked for the window, but re-check here:
            // range queries match on overlap, not containment
            if let Some(start) = translator::resolve_time(&external.start) {
                if !window.contains(start) {
                    debug!(external_id = %external.id, "Event outside sync window, skipping");
                    continue;
                }
            }

            match store::find_by_external_id(&self.db, user_id, &external.id).await? {
                None => {
                    // Never seen locally: the event originated externally.
                    // Translation failures skip the one event, not the pass.
                    match translator::to_local_event(user_id, &external, Utc::now()) {
                        Ok(event) => {
                            store::insert_event(&self.db, &event).await?;
                            imported += 1;
                        }
                        Err(e) => {
                            warn!(
                                user_id = %user_id,
                                external_id = %external.id,
                                error = %e,
                                "Skipping untranslatable external event"
                            );
                        }
                    }
                }
                Some(mut local) => {
                    // Last-writer-wins: overwrite only when the provider
                    // copy is strictly newer than the local edit
                    if let Some(remote_updated) = external.updated {
                        if remote_updated > local.updated_at {
                            translator::apply_external(&mut local, &external);
                            store::apply_remote_update(&self.db, &local).await?;
                            conflicts += 1;
                        }
                    }
                }
            }
        }

        debug!(user_id = %user_id, imported, conflicts, "Import pass finished");
        Ok((imported, conflicts))
    }

    async fn export_pass(
        &self,
        user_id: &str,
        credential: &GoogleCredential,
        calendar_id: &str,
    ) -> Result<u32, SyncError> {
        let unsynced = store::find_unsynced(&self.db, user_id).await?;

        let mut exported = 0u32;
        for event in unsynced {
            let draft = translator::to_draft(&event);
            let inserted = self
                .provider
                .insert_event(credential, calendar_id, &draft)
                .await?;

            store::link_external(
                &self.db,
                &event.id,
                &inserted.id,
                calendar_id,
                inserted.hangout_link.as_deref(),
                Utc::now(),
            )
            .await?;
            exported += 1;
        }

        debug!(user_id = %user_id, exported, "Export pass finished");
        Ok(exported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::models::{CalendarEvent, EventStatus, EventType};
    use crate::common::migrations;
    use crate::services::credentials::SyncStatus;
    use crate::services::google::{
        ExternalEvent, ExternalEventDraft, ExternalEventTime, InsertedEvent,
    };
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct FakeProvider {
        events: Vec<ExternalEvent>,
        fail_refresh: bool,
        fail_insert_after: Option<u32>,
        insert_count: AtomicU32,
    }

    #[async_trait]
    impl CalendarProvider for FakeProvider {
        async fn refresh_if_needed(
            &self,
            credential: GoogleCredential,
        ) -> Result<GoogleCredential, GoogleError> {
            if self.fail_refresh {
                Err(GoogleError::TokenRefresh("invalid_grant".to_string()))
            } else {
                Ok(credential)
            }
        }

        async fn list_events(
            &self,
            _credential: &GoogleCredential,
            _calendar_id: &str,
            _window: &SyncWindow,
        ) -> Result<Vec<ExternalEvent>, GoogleError> {
            Ok(self.events.clone())
        }

        async fn insert_event(
            &self,
            _credential: &GoogleCredential,
            _calendar_id: &str,
            draft: &ExternalEventDraft,
        ) -> Result<InsertedEvent, GoogleError> {
            let n = self.insert_count.fetch_add(1, Ordering::SeqCst);
            if let Some(limit) = self.fail_insert_after {
                if n >= limit {
                    return Err(GoogleError::CalendarApi("quota exceeded".to_string()));
                }
            }
            Ok(InsertedEvent {
                id: format!("ext-created-{}", n + 1),
                hangout_link: if draft.request_conference {
                    Some("https://meet.google.com/test-link".to_string())
                } else {
                    None
                },
            })
        }
    }

    async fn setup_test_db() -> SqlitePool {
        // sqlite::memory: gives every pooled connection its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        pool
    }

    fn service(pool: &SqlitePool, provider: FakeProvider) -> SyncService {
        SyncService::new(
            pool.clone(),
            Arc::new(provider),
            Arc::new(CredentialStore::new(pool.clone())),
        )
    }

    async fn connect_user(pool: &SqlitePool, user_id: &str) -> GoogleCredential {
        let now = Utc::now();
        let credential = GoogleCredential {
            id: format!("K_{}", user_id),
            user_id: user_id.to_string(),
            access_token: "ya29.test".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            token_expires_at: now + Duration::hours(1),
            calendar_sync_enabled: true,
            primary_calendar_id: Some("primary".to_string()),
            last_sync_at: None,
            sync_status: SyncStatus::Connected,
            created_at: now,
            updated_at: now,
        };
        CredentialStore::new(pool.clone())
            .upsert(&credential)
            .await
            .unwrap();
        credential
    }

    async fn insert_local_event(
        pool: &SqlitePool,
        user_id: &str,
        external_id: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> CalendarEvent {
        let now = Utc::now();
        let event = CalendarEvent {
            id: crate::common::generate_event_id(),
            user_id: user_id.to_string(),
            contact_id: None,
            title: "Coffee with Dana".to_string(),
            description: None,
            location: None,
            start_time: now + Duration::days(1),
            end_time: now + Duration::days(1) + Duration::hours(1),
            event_type: EventType::Meeting,
            status: EventStatus::Scheduled,
            meet_link: None,
            external_id: external_id.map(|s| s.to_string()),
            external_calendar_id: external_id.map(|_| "primary".to_string()),
            attendees: None,
            created_at: now,
            updated_at,
        };
        store::insert_event(pool, &event).await.unwrap();
        event
    }

    fn external_event(id: &str, start: DateTime<Utc>, updated: DateTime<Utc>) -> ExternalEvent {
        ExternalEvent {
            id: id.to_string(),
            summary: Some("Planning session".to_string()),
            description: None,
            location: None,
            start: Some(ExternalEventTime::DateTime(start)),
            end: Some(ExternalEventTime::DateTime(start + Duration::hours(1))),
            updated: Some(updated),
            hangout_link: None,
            attendees: Vec::new(),
        }
    }

    #[test]
    fn test_window_boundaries_are_inclusive() {
        let now = Utc::now();
        let window = SyncWindow::around(now);

        assert!(window.contains(now + Duration::days(90)));
        assert!(!window.contains(now + Duration::days(90) + Duration::seconds(1)));
        assert!(window.contains(now - Duration::days(30)));
        assert!(!window.contains(now - Duration::days(30) - Duration::seconds(1)));
    }

    #[tokio::test]
    async fn test_export_links_event_and_is_idempotent() {
        let pool = setup_test_db().await;
        connect_user(&pool, "U_ALICE1").await;
        insert_local_event(&pool, "U_ALICE1", None, Utc::now()).await;

        let sync = service(&pool, FakeProvider::default());

        let outcome = sync.sync_user("U_ALICE1").await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome {
                imported: 0,
                exported: 1,
                conflicts: 0
            }
        );

        let unsynced = store::find_unsynced(&pool, "U_ALICE1").await.unwrap();
        assert!(unsynced.is_empty(), "exported event must carry external id");

        // Second run with no intervening changes exports nothing
        let outcome = sync.sync_user("U_ALICE1").await.unwrap();
        assert_eq!(outcome.exported, 0);

        let status = CredentialStore::new(pool.clone())
            .find_by_user("U_ALICE1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.sync_status, SyncStatus::Synced);
        assert!(status.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn test_import_creates_local_twin_exactly_once() {
        let pool = setup_test_db().await;
        let credential = connect_user(&pool, "U_ALICE1").await;

        let now = Utc::now();
        let provider = FakeProvider {
            events: vec![external_event(
                "ext-1",
                now + Duration::days(1),
                now - Duration::hours(1),
            )],
            ..Default::default()
        };
        let sync = service(&pool, provider);

        let outcome = sync.reconcile("U_ALICE1", &credential).await.unwrap();
        assert_eq!(outcome.imported, 1);

        let local = store::find_by_external_id(&pool, "U_ALICE1", "ext-1")
            .await
            .unwrap()
            .expect("imported event must be linked");
        assert_eq!(local.title, "Planning session");

        // Repeated runs never create a second local record
        let outcome = sync.reconcile("U_ALICE1", &credential).await.unwrap();
        assert_eq!(outcome.imported, 0);
        assert_eq!(outcome.exported, 0);
    }

    #[tokio::test]
    async fn test_lww_overwrites_when_external_is_strictly_newer() {
        let pool = setup_test_db().await;
        let credential = connect_user(&pool, "U_BOB001").await;

        let local_updated = "2024-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        insert_local_event(&pool, "U_BOB001", Some("ext-1"), local_updated).await;

        let now = Utc::now();
        let mut newer = external_event(
            "ext-1",
            now + Duration::days(1),
            "2024-01-02T00:00:00Z".parse::<DateTime<Utc>>().unwrap(),
        );
        newer.summary = Some("Renamed upstream".to_string());

        let provider = FakeProvider {
            events: vec![newer],
            ..Default::default()
        };
        let outcome = service(&pool, provider)
            .reconcile("U_BOB001", &credential)
            .await
            .unwrap();

        assert_eq!(outcome.imported, 0);
        assert_eq!(outcome.exported, 0);
        assert_eq!(outcome.conflicts, 1);

        let local = store::find_by_external_id(&pool, "U_BOB001", "ext-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(local.title, "Renamed upstream");
    }

    #[tokio::test]
    async fn test_lww_leaves_local_untouched_for_stale_external() {
        let pool = setup_test_db().await;
        let credential = connect_user(&pool, "U_BOB001").await;

        let now = Utc::now();
        insert_local_event(&pool, "U_BOB001", Some("ext-1"), now).await;

        // External copy is older than the local edit
        let mut stale = external_event("ext-1", now + Duration::days(1), now - Duration::hours(1));
        stale.summary = Some("Should not win".to_string());

        let provider = FakeProvider {
            events: vec![stale],
            ..Default::default()
        };
        let outcome = service(&pool, provider)
            .reconcile("U_BOB001", &credential)
            .await
            .unwrap();

        assert_eq!(outcome.conflicts, 0);
        let local = store::find_by_external_id(&pool, "U_BOB001", "ext-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(local.title, "Coffee with Dana");
    }

    #[tokio::test]
    async fn test_untranslatable_event_is_skipped_not_fatal() {
        let pool = setup_test_db().await;
        let credential = connect_user(&pool, "U_ALICE1").await;

        let now = Utc::now();
        let mut broken = external_event("ext-broken", now, now);
        broken.start = None;
        broken.end = None;

        let provider = FakeProvider {
            events: vec![
                broken,
                external_event("ext-ok", now + Duration::days(2), now),
            ],
            ..Default::default()
        };
        let outcome = service(&pool, provider)
            .reconcile("U_ALICE1", &credential)
            .await
            .unwrap();

        assert_eq!(outcome.imported, 1);
        assert!(store::find_by_external_id(&pool, "U_ALICE1", "ext-broken")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_event_outside_window_is_not_imported() {
        let pool = setup_test_db().await;
        let credential = connect_user(&pool, "U_ALICE1").await;

        let now = Utc::now();
        let provider = FakeProvider {
            events: vec![external_event("ext-far", now + Duration::days(91), now)],
            ..Default::default()
        };
        let outcome = service(&pool, provider)
            .reconcile("U_ALICE1", &credential)
            .await
            .unwrap();

        assert_eq!(outcome.imported, 0);
    }

    #[tokio::test]
    async fn test_sync_user_without_credential_is_not_connected() {
        let pool = setup_test_db().await;
        let sync = service(&pool, FakeProvider::default());

        let result = sync.sync_user("U_NOBODY").await;
        assert!(matches!(result, Err(SyncError::NotConnected)));
    }

    #[tokio::test]
    async fn test_sync_user_respects_disabled_flag() {
        let pool = setup_test_db().await;
        let mut credential = connect_user(&pool, "U_ALICE1").await;
        credential.calendar_sync_enabled = false;
        CredentialStore::new(pool.clone())
            .upsert(&credential)
            .await
            .unwrap();

        let result = service(&pool, FakeProvider::default())
            .sync_user("U_ALICE1")
            .await;
        assert!(matches!(result, Err(SyncError::SyncDisabled)));
    }

    #[tokio::test]
    async fn test_refresh_failure_marks_credential_sync_failed() {
        let pool = setup_test_db().await;
        let mut credential = connect_user(&pool, "U_ALICE1").await;
        credential.token_expires_at = Utc::now() - Duration::minutes(5);
        CredentialStore::new(pool.clone())
            .upsert(&credential)
            .await
            .unwrap();

        let provider = FakeProvider {
            fail_refresh: true,
            ..Default::default()
        };
        let result = service(&pool, provider).sync_user("U_ALICE1").await;
        assert!(matches!(
            result,
            Err(SyncError::Provider(GoogleError::TokenRefresh(_)))
        ));

        let stored = CredentialStore::new(pool.clone())
            .find_by_user("U_ALICE1")
            .await
            .unwrap()
            .expect("credential must never be auto-deleted");
        assert_eq!(stored.sync_status, SyncStatus::SyncFailed);
    }

    #[tokio::test]
    async fn test_partial_export_progress_survives_a_failure() {
        let pool = setup_test_db().await;
        connect_user(&pool, "U_ALICE1").await;
        insert_local_event(&pool, "U_ALICE1", None, Utc::now()).await;
        insert_local_event(&pool, "U_ALICE1", None, Utc::now()).await;

        let provider = FakeProvider {
            fail_insert_after: Some(1),
            ..Default::default()
        };
        let sync = service(&pool, provider);

        let result = sync.sync_user("U_ALICE1").await;
        assert!(matches!(
            result,
            Err(SyncError::Provider(GoogleError::CalendarApi(_)))
        ));

        // The first insert landed before the failure and stays committed
        let remaining = store::count_unsynced(&pool, "U_ALICE1").await.unwrap();
        assert_eq!(remaining, 1);

        let stored = CredentialStore::new(pool.clone())
            .find_by_user("U_ALICE1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.sync_status, SyncStatus::SyncFailed);
    }

    #[tokio::test]
    async fn test_guard_refuses_overlapping_sync_for_same_user() {
        let pool = setup_test_db().await;
        connect_user(&pool, "U_ALICE1").await;

        let sync = service(&pool, FakeProvider::default());
        let guard = sync.guard.clone();

        let permit = guard.begin("U_ALICE1").expect("first begin succeeds");
        assert!(guard.begin("U_ALICE1").is_none());

        let result = sync.sync_user("U_ALICE1").await;
        assert!(matches!(result, Err(SyncError::AlreadyRunning)));

        // Other users are unaffected
        assert!(guard.begin("U_BOB001").is_some());

        drop(permit);
        assert!(guard.begin("U_ALICE1").is_some());
    }
}
