// src/calendar/handlers.rs

use axum::extract::{Extension, Query};
use axum::Json;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::auth::AuthedUser;
use crate::calendar::models::{
    AuthUrlQuery, AuthUrlResponse, ConnectRequest, SyncResultResponse, SyncStatusResponse,
};
use crate::calendar::store;
use crate::common::{generate_credential_id, safe_email_log, ApiError, AppState};
use crate::services::credentials::{GoogleCredential, SyncStatus};
use crate::services::sync::SyncError;

fn default_redirect(frontend_url: &str) -> String {
    format!(
        "{}/settings?tab=integrations",
        frontend_url.trim_end_matches('/')
    )
}

/// Credential row for a fresh or repeated connect. Google omits the refresh
/// token on re-consent, so a stored one is carried over; losing it would
/// silently drop the account from unattended sync.
pub(crate) fn build_connected_credential(
    existing: Option<&GoogleCredential>,
    user_id: &str,
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
    calendar_id: &str,
    now: chrono::DateTime<Utc>,
) -> GoogleCredential {
    GoogleCredential {
        id: existing
            .map(|c| c.id.clone())
            .unwrap_or_else(generate_credential_id),
        user_id: user_id.to_string(),
        access_token,
        refresh_token: refresh_token
            .or_else(|| existing.and_then(|c| c.refresh_token.clone())),
        token_expires_at: now + Duration::seconds(expires_in),
        calendar_sync_enabled: true,
        primary_calendar_id: Some(calendar_id.to_string()),
        last_sync_at: existing.and_then(|c| c.last_sync_at),
        sync_status: SyncStatus::Connected,
        created_at: existing.map(|c| c.created_at).unwrap_or(now),
        updated_at: now,
    }
}

fn sync_error_to_api(e: SyncError) -> ApiError {
    match e {
        SyncError::NotConnected => {
            ApiError::BadRequest("Google Calendar not connected".to_string())
        }
        SyncError::SyncDisabled => ApiError::BadRequest("Calendar sync is disabled".to_string()),
        SyncError::AlreadyRunning => {
            ApiError::Conflict("A sync is already running for this account".to_string())
        }
        SyncError::NoPrimaryCalendar => ApiError::BadRequest(
            "No primary calendar recorded; re-connect Google Calendar".to_string(),
        ),
        SyncError::Provider(err) => ApiError::ServiceUnavailable(format!("Sync failed: {}", err)),
        SyncError::Database(err) => ApiError::DatabaseError(err),
    }
}

/// GET /api/calendar/google/auth-url - Build the OAuth consent URL
pub async fn get_auth_url(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Query(query): Query<AuthUrlQuery>,
) -> Result<Json<AuthUrlResponse>, ApiError> {
    let state = state_lock.read().await.clone();

    let redirect_uri = query
        .redirect_uri
        .filter(|uri| !uri.is_empty())
        .unwrap_or_else(|| default_redirect(&state.frontend_url));

    let auth_url = state.google_client.authorization_url(&redirect_uri);
    Ok(Json(AuthUrlResponse { auth_url }))
}

/// POST /api/calendar/google/connect - Exchange the authorization code and
/// store the credential
pub async fn connect(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
    Json(request): Json<ConnectRequest>,
) -> Result<Json<SyncStatusResponse>, ApiError> {
    let state = state_lock.read().await.clone();

    let redirect_uri = request
        .redirect_uri
        .filter(|uri| !uri.is_empty())
        .unwrap_or_else(|| default_redirect(&state.frontend_url));

    let exchange = state
        .google_client
        .exchange_code(&request.code, &redirect_uri)
        .await
        .map_err(|e| {
            error!(user_id = %authed.id, error = %e, "Google Calendar connect failed");
            ApiError::BadRequest(format!("Failed to connect Google Calendar: {}", e))
        })?;

    let calendar = state
        .google_client
        .primary_calendar(&exchange.access_token)
        .await
        .map_err(|e| {
            error!(user_id = %authed.id, error = %e, "Primary calendar lookup failed");
            ApiError::ServiceUnavailable(format!("Failed to resolve primary calendar: {}", e))
        })?;

    let existing = state.credential_store.find_by_user(&authed.id).await?;

    let credential = build_connected_credential(
        existing.as_ref(),
        &authed.id,
        exchange.access_token,
        exchange.refresh_token,
        exchange.expires_in,
        &calendar.id,
        Utc::now(),
    );
    state.credential_store.upsert(&credential).await?;

    info!(
        user_id = %authed.id,
        email = %safe_email_log(&authed.email),
        "Google Calendar connected"
    );

    let pending_changes = store::count_unsynced(&state.db, &authed.id).await?;

    Ok(Json(SyncStatusResponse {
        connected: true,
        sync_enabled: true,
        last_sync_at: credential.last_sync_at,
        status: SyncStatus::Connected.as_str().to_string(),
        primary_calendar_id: Some(calendar.id),
        email: calendar.summary,
        pending_changes,
    }))
}

/// POST /api/calendar/google/disconnect - Delete the stored credential.
/// Idempotent: disconnecting while not connected is a no-op.
pub async fn disconnect(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
) -> Result<(), ApiError> {
    let state = state_lock.read().await.clone();

    state.credential_store.delete(&authed.id).await?;
    info!(user_id = %authed.id, "Google Calendar disconnected");
    Ok(())
}

/// GET /api/calendar/google/status - Connection and last-sync state
pub async fn get_status(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
) -> Result<Json<SyncStatusResponse>, ApiError> {
    let state = state_lock.read().await.clone();

    let pending_changes = store::count_unsynced(&state.db, &authed.id).await?;

    let response = match state.credential_store.find_by_user(&authed.id).await? {
        Some(credential) => SyncStatusResponse {
            connected: true,
            sync_enabled: credential.calendar_sync_enabled,
            last_sync_at: credential.last_sync_at,
            status: credential.sync_status.as_str().to_string(),
            primary_calendar_id: credential.primary_calendar_id,
            email: None,
            pending_changes,
        },
        None => SyncStatusResponse {
            connected: false,
            sync_enabled: false,
            last_sync_at: None,
            status: "NOT_CONNECTED".to_string(),
            primary_calendar_id: None,
            email: None,
            pending_changes,
        },
    };

    Ok(Json(response))
}

/// POST /api/calendar/google/sync - Synchronous manual sync; the caller
/// blocks for the duration of one reconcile pass
pub async fn trigger_sync(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
) -> Result<Json<SyncResultResponse>, ApiError> {
    let state = state_lock.read().await.clone();

    info!(user_id = %authed.id, "Manual calendar sync triggered");

    let outcome = state.sync_service.sync_user(&authed.id).await.map_err(|e| {
        warn!(user_id = %authed.id, error = %e, "Manual sync failed");
        sync_error_to_api(e)
    })?;

    Ok(Json(SyncResultResponse {
        events_imported: outcome.imported,
        events_exported: outcome.exported,
        conflicts: outcome.conflicts,
        synced_at: Utc::now(),
        message: "Sync completed successfully".to_string(),
    }))
}
