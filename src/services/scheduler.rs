// src/services/scheduler.rs
//
// Interval-driven sweep over every sync-enabled account. Each user is an
// independent unit of work: failures are caught, logged, and recorded on
// that user's credential, and the sweep moves on.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::services::credentials::CredentialStore;
use crate::services::sync::{SyncError, SyncService};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Global feature flag; the timer idles while this is off
    pub enabled: bool,
    pub interval_minutes: u64,
    /// Upper bound on users reconciling at the same time
    pub max_concurrent_users: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: 15,
            max_concurrent_users: 4,
        }
    }
}

/// Spawn the background scheduler task
pub fn start_sync_scheduler(
    sync: Arc<SyncService>,
    credentials: Arc<CredentialStore>,
    settings: SchedulerSettings,
) {
    info!(
        enabled = settings.enabled,
        interval_minutes = settings.interval_minutes,
        max_concurrent_users = settings.max_concurrent_users,
        "Starting calendar sync scheduler"
    );

    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(settings.interval_minutes * 60));
        loop {
            interval.tick().await;
            if !settings.enabled {
                continue;
            }
            run_sweep(&sync, &credentials, settings.max_concurrent_users).await;
        }
    });
}

/// One pass over all eligible users. Never returns an error: every per-user
/// failure is contained so the remaining users still get processed.
pub async fn run_sweep(
    sync: &SyncService,
    credentials: &CredentialStore,
    max_concurrent_users: usize,
) {
    let eligible = match credentials.list_sync_enabled().await {
        Ok(list) => list,
        Err(e) => {
            error!(error = %e, "Failed to load sync-enabled credentials, skipping sweep");
            return;
        }
    };

    if eligible.is_empty() {
        debug!("No sync-enabled users, sweep is idle");
        return;
    }

    info!(users = eligible.len(), "Starting sync sweep");

    stream::iter(eligible)
        .for_each_concurrent(max_concurrent_users, |credential| async move {
            let user_id = credential.user_id;
            match sync.sync_user(&user_id).await {
                Ok(outcome) => {
                    info!(
                        user_id = %user_id,
                        imported = outcome.imported,
                        exported = outcome.exported,
                        conflicts = outcome.conflicts,
                        "Scheduled sync finished"
                    );
                }
                Err(SyncError::AlreadyRunning) => {
                    warn!(user_id = %user_id, "Sync already in flight, skipping this tick");
                }
                Err(e) => {
                    error!(user_id = %user_id, error = %e, "Scheduled sync failed");
                }
            }
        })
        .await;

    info!("Sync sweep completed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::migrations;
    use crate::services::credentials::{GoogleCredential, SyncStatus};
    use crate::services::google::{
        CalendarProvider, ExternalEvent, ExternalEventDraft, GoogleError, InsertedEvent,
    };
    use crate::services::sync::SyncWindow;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;
    use std::collections::HashSet;

    /// Provider whose refresh grant fails for a chosen set of users
    #[derive(Default)]
    struct PartialFailureProvider {
        fail_refresh_for: HashSet<String>,
    }

    #[async_trait]
    impl CalendarProvider for PartialFailureProvider {
        async fn refresh_if_needed(
            &self,
            credential: GoogleCredential,
        ) -> Result<GoogleCredential, GoogleError> {
            if self.fail_refresh_for.contains(&credential.user_id) {
                Err(GoogleError::TokenRefresh("invalid_grant".to_string()))
            } else {
                Ok(GoogleCredential {
                    token_expires_at: Utc::now() + ChronoDuration::hours(1),
                    ..credential
                })
            }
        }

        async fn list_events(
            &self,
            _credential: &GoogleCredential,
            _calendar_id: &str,
            _window: &SyncWindow,
        ) -> Result<Vec<ExternalEvent>, GoogleError> {
            Ok(Vec::new())
        }

        async fn insert_event(
            &self,
            _credential: &GoogleCredential,
            _calendar_id: &str,
            _draft: &ExternalEventDraft,
        ) -> Result<InsertedEvent, GoogleError> {
            Ok(InsertedEvent {
                id: "ext-created".to_string(),
                hangout_link: None,
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

    async fn connect_user(store: &CredentialStore, user_id: &str) {
        let now = Utc::now();
        store
            .upsert(&GoogleCredential {
                id: format!("K_{}", user_id),
                user_id: user_id.to_string(),
                access_token: "ya29.test".to_string(),
                refresh_token: Some("1//refresh".to_string()),
                // Expired so every user goes through the refresh path
                token_expires_at: now - ChronoDuration::minutes(5),
                calendar_sync_enabled: true,
                primary_calendar_id: Some("primary".to_string()),
                last_sync_at: None,
                sync_status: SyncStatus::Connected,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_one_users_failure_does_not_stop_the_sweep() {
        let pool = setup_test_db().await;
        let credentials = Arc::new(CredentialStore::new(pool.clone()));

        connect_user(&credentials, "U_ALICE1").await;
        connect_user(&credentials, "U_BOB001").await;
        connect_user(&credentials, "U_CAROL1").await;

        let provider = PartialFailureProvider {
            fail_refresh_for: HashSet::from(["U_BOB001".to_string()]),
        };
        let sync = SyncService::new(pool.clone(), Arc::new(provider), credentials.clone());

        run_sweep(&sync, &credentials, 2).await;

        let status_of = |user_id: &str| {
            let credentials = credentials.clone();
            let user_id = user_id.to_string();
            async move {
                credentials
                    .find_by_user(&user_id)
                    .await
                    .unwrap()
                    .unwrap()
                    .sync_status
            }
        };

        assert_eq!(status_of("U_ALICE1").await, SyncStatus::Synced);
        assert_eq!(status_of("U_BOB001").await, SyncStatus::SyncFailed);
        assert_eq!(status_of("U_CAROL1").await, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_sweep_is_idle_with_no_eligible_users() {
        let pool = setup_test_db().await;
        let credentials = Arc::new(CredentialStore::new(pool.clone()));
        let sync = SyncService::new(
            pool.clone(),
            Arc::new(PartialFailureProvider::default()),
            credentials.clone(),
        );

        // No credentials at all: the sweep returns without touching anything
        run_sweep(&sync, &credentials, 2).await;
    }
}
