//! Calendar integration routes

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;

/// Creates and returns the Google Calendar integration router
///
/// # Routes
/// - `GET /api/calendar/google/auth-url` - OAuth consent URL
/// - `POST /api/calendar/google/connect` - Exchange authorization code
/// - `POST /api/calendar/google/disconnect` - Remove stored credential
/// - `GET /api/calendar/google/status` - Connection and sync state
/// - `POST /api/calendar/google/sync` - Manual sync trigger
pub fn calendar_routes() -> Router {
    Router::new()
        .route("/api/calendar/google/auth-url", get(handlers::get_auth_url))
        .route("/api/calendar/google/connect", post(handlers::connect))
        .route(
            "/api/calendar/google/disconnect",
            post(handlers::disconnect),
        )
        .route("/api/calendar/google/status", get(handlers::get_status))
        .route("/api/calendar/google/sync", post(handlers::trigger_sync))
}
