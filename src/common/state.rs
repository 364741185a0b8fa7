// Application state shared across all modules

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::services::{CredentialStore, GoogleCalendarClient, SyncService};

/// Application state containing database pool, services, and configuration
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub jwt_secret: String,
    pub frontend_url: String,
    pub google_client: Arc<GoogleCalendarClient>,
    pub credential_store: Arc<CredentialStore>,
    pub sync_service: Arc<SyncService>,
}
