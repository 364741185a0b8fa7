// src/services/google.rs
//
// Google Calendar boundary: OAuth URL construction, code exchange, token
// refresh, event listing and insertion. The sync engine only depends on the
// CalendarProvider trait; the reqwest client below is its one production
// implementation.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::services::credentials::GoogleCredential;
use crate::services::sync::SyncWindow;

const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const OAUTH_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

#[derive(Debug, Error)]
pub enum GoogleError {
    #[error("OAuth code exchange failed: {0}")]
    OAuthExchange(String),

    #[error("Token refresh rejected: {0}")]
    TokenRefresh(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Calendar API error: {0}")]
    CalendarApi(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
}

/// Result of a one-shot authorization-code exchange.
///
/// Google omits the refresh token on re-consent; callers keep any previously
/// stored one in that case.
#[derive(Debug, Deserialize)]
pub struct TokenExchange {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

/// The user's default calendar, resolved right after connect. The summary
/// of the primary calendar is the account email.
#[derive(Debug, Clone)]
pub struct CalendarInfo {
    pub id: String,
    pub summary: Option<String>,
}

/// Start/end of a provider event: timed events carry a full instant,
/// all-day events only a date
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalEventTime {
    DateTime(DateTime<Utc>),
    DateOnly(NaiveDate),
}

/// Provider-shaped event as consumed by the sync engine. Ephemeral: fetched,
/// translated, never persisted. Cancelled events are filtered out before
/// this type is built.
#[derive(Debug, Clone)]
pub struct ExternalEvent {
    pub id: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<ExternalEventTime>,
    pub end: Option<ExternalEventTime>,
    pub updated: Option<DateTime<Utc>>,
    pub hangout_link: Option<String>,
    pub attendees: Vec<String>,
}

/// Outbound event payload built by the translator from a local event
#[derive(Debug, Clone)]
pub struct ExternalEventDraft {
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub attendees: Vec<String>,
    pub request_conference: bool,
}

/// Provider identifiers handed back after insertion
#[derive(Debug, Clone)]
pub struct InsertedEvent {
    pub id: String,
    pub hangout_link: Option<String>,
}

/// The capability the reconciliation engine depends on. Everything takes a
/// credential value and hands any updated credential back; no per-call state
/// hides inside the implementation.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Returns the credential unchanged while the access token is still
    /// valid; otherwise performs a refresh-token grant and returns the
    /// credential with the new access token and expiry
    async fn refresh_if_needed(
        &self,
        credential: GoogleCredential,
    ) -> Result<GoogleCredential, GoogleError>;

    /// In-window events, recurring series expanded to single instances,
    /// ordered by start time, cancelled events excluded
    async fn list_events(
        &self,
        credential: &GoogleCredential,
        calendar_id: &str,
        window: &SyncWindow,
    ) -> Result<Vec<ExternalEvent>, GoogleError>;

    async fn insert_event(
        &self,
        credential: &GoogleCredential,
        calendar_id: &str,
        draft: &ExternalEventDraft,
    ) -> Result<InsertedEvent, GoogleError>;
}

// ============================================================================
// Google Calendar API wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct CalendarEventRequest {
    summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    start: EventDateTime,
    end: EventDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    attendees: Option<Vec<Attendee>>,
    #[serde(rename = "conferenceData", skip_serializing_if = "Option::is_none")]
    conference_data: Option<ConferenceData>,
}

#[derive(Debug, Serialize)]
struct EventDateTime {
    #[serde(rename = "dateTime")]
    date_time: String,
    #[serde(rename = "timeZone")]
    time_zone: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Attendee {
    email: String,
}

#[derive(Debug, Serialize)]
struct ConferenceData {
    #[serde(rename = "createRequest")]
    create_request: ConferenceCreateRequest,
}

#[derive(Debug, Serialize)]
struct ConferenceCreateRequest {
    #[serde(rename = "requestId")]
    request_id: String,
    #[serde(rename = "conferenceSolutionKey")]
    conference_solution_key: ConferenceSolutionKey,
}

#[derive(Debug, Serialize)]
struct ConferenceSolutionKey {
    #[serde(rename = "type")]
    solution_type: String,
}

#[derive(Debug, Deserialize)]
struct EventListResponse {
    #[serde(default)]
    items: Vec<GoogleEvent>,
}

#[derive(Debug, Deserialize)]
struct GoogleEvent {
    id: String,
    status: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    start: Option<GoogleEventTime>,
    end: Option<GoogleEventTime>,
    updated: Option<String>,
    #[serde(rename = "hangoutLink")]
    hangout_link: Option<String>,
    #[serde(default)]
    attendees: Vec<Attendee>,
}

#[derive(Debug, Deserialize)]
struct GoogleEventTime {
    #[serde(rename = "dateTime")]
    date_time: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InsertResponse {
    id: String,
    #[serde(rename = "hangoutLink")]
    hangout_link: Option<String>,
    #[serde(rename = "conferenceData")]
    conference_data: Option<ConferenceDataResponse>,
}

#[derive(Debug, Deserialize)]
struct ConferenceDataResponse {
    #[serde(rename = "entryPoints")]
    entry_points: Option<Vec<EntryPoint>>,
}

#[derive(Debug, Deserialize)]
struct EntryPoint {
    #[serde(rename = "entryPointType")]
    entry_point_type: String,
    uri: Option<String>,
}

impl GoogleEventTime {
    fn resolve(&self) -> Option<ExternalEventTime> {
        if let Some(ref dt) = self.date_time {
            return DateTime::parse_from_rfc3339(dt)
                .ok()
                .map(|d| ExternalEventTime::DateTime(d.with_timezone(&Utc)));
        }
        if let Some(ref d) = self.date {
            return NaiveDate::parse_from_str(d, "%Y-%m-%d")
                .ok()
                .map(ExternalEventTime::DateOnly);
        }
        None
    }
}

impl GoogleEvent {
    /// None for cancelled events; they never reach the engine
    fn into_external(self) -> Option<ExternalEvent> {
        if self.status.as_deref() == Some("cancelled") {
            return None;
        }

        let start = self.start.as_ref().and_then(GoogleEventTime::resolve);
        let end = self.end.as_ref().and_then(GoogleEventTime::resolve);
        let updated = self
            .updated
            .as_deref()
            .and_then(|u| DateTime::parse_from_rfc3339(u).ok())
            .map(|d| d.with_timezone(&Utc));

        Some(ExternalEvent {
            id: self.id,
            summary: self.summary,
            description: self.description,
            location: self.location,
            start,
            end,
            updated,
            hangout_link: self.hangout_link,
            attendees: self.attendees.into_iter().map(|a| a.email).collect(),
        })
    }
}

// ============================================================================
// Client
// ============================================================================

/// Thin reqwest wrapper around the Google OAuth and Calendar v3 endpoints.
/// Every call runs against a client with a bounded timeout so a stuck
/// provider request fails the caller instead of hanging it.
#[derive(Debug, Clone)]
pub struct GoogleCalendarClient {
    config: GoogleOAuthConfig,
    client: Client,
}

impl GoogleCalendarClient {
    pub fn new(config: GoogleOAuthConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { config, client }
    }

    /// Consent-screen URL requesting offline access and calendar scopes.
    /// Pure string construction, no network.
    pub fn authorization_url(&self, redirect_uri: &str) -> String {
        let scopes = [
            "email",
            "profile",
            "https://www.googleapis.com/auth/calendar.readonly",
            "https://www.googleapis.com/auth/calendar.events",
        ];
        let scope_param = scopes.join(" ");

        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            OAUTH_AUTH_URL,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scope_param)
        )
    }

    /// One-shot exchange of the authorization code for tokens
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenExchange, GoogleError> {
        let params = [
            ("code", code),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ];

        debug!("Exchanging authorization code for tokens");

        let response = self
            .client
            .post(OAUTH_TOKEN_URL)
            .form(&params)
            .send()
            .await
            .map_err(|e| GoogleError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %error_text, "Token exchange failed");
            return Err(GoogleError::OAuthExchange(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        let exchange = response
            .json::<TokenExchange>()
            .await
            .map_err(|e| GoogleError::Serialization(e.to_string()))?;

        info!("Successfully exchanged authorization code for tokens");
        Ok(exchange)
    }

    /// Resolve the user's default calendar after connect; its summary is the
    /// connected account email
    pub async fn primary_calendar(&self, access_token: &str) -> Result<CalendarInfo, GoogleError> {
        let url = format!("{}/users/me/calendarList/primary", CALENDAR_API_BASE);

        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| GoogleError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GoogleError::CalendarApi(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        #[derive(Deserialize)]
        struct CalendarListEntry {
            id: String,
            summary: Option<String>,
        }

        let entry = response
            .json::<CalendarListEntry>()
            .await
            .map_err(|e| GoogleError::Serialization(e.to_string()))?;

        Ok(CalendarInfo {
            id: entry.id,
            summary: entry.summary,
        })
    }
}

#[async_trait]
impl CalendarProvider for GoogleCalendarClient {
    async fn refresh_if_needed(
        &self,
        credential: GoogleCredential,
    ) -> Result<GoogleCredential, GoogleError> {
        if !credential.is_expired(Utc::now()) {
            debug!(user_id = %credential.user_id, "Access token still valid");
            return Ok(credential);
        }

        let refresh_token = credential
            .refresh_token
            .clone()
            .ok_or_else(|| GoogleError::TokenRefresh("no refresh token stored".to_string()))?;

        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];

        debug!(user_id = %credential.user_id, "Refreshing expired access token");

        let response = self
            .client
            .post(OAUTH_TOKEN_URL)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to send token refresh request");
                GoogleError::RequestFailed(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!(
                user_id = %credential.user_id,
                status = %status,
                error = %error_text,
                "Token refresh rejected - user must re-connect"
            );
            return Err(GoogleError::TokenRefresh(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        let exchange = response
            .json::<TokenExchange>()
            .await
            .map_err(|e| GoogleError::Serialization(e.to_string()))?;

        info!(user_id = %credential.user_id, "Access token refreshed");

        Ok(GoogleCredential {
            access_token: exchange.access_token,
            token_expires_at: Utc::now() + Duration::seconds(exchange.expires_in),
            ..credential
        })
    }

    async fn list_events(
        &self,
        credential: &GoogleCredential,
        calendar_id: &str,
        window: &SyncWindow,
    ) -> Result<Vec<ExternalEvent>, GoogleError> {
        let url = format!(
            "{}/calendars/{}/events",
            CALENDAR_API_BASE,
            urlencoding::encode(calendar_id)
        );

        let time_min = window.start.to_rfc3339();
        let time_max = window.end.to_rfc3339();
        let query = [
            ("timeMin", time_min.as_str()),
            ("timeMax", time_max.as_str()),
            ("singleEvents", "true"),
            ("orderBy", "startTime"),
            ("maxResults", "500"),
        ];

        let response = self
            .client
            .get(&url)
            .bearer_auth(&credential.access_token)
            .query(&query)
            .send()
            .await
            .map_err(|e| GoogleError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                status = %status,
                error = %error_text,
                calendar_id = %calendar_id,
                "Event listing failed"
            );
            return Err(GoogleError::CalendarApi(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        let list = response
            .json::<EventListResponse>()
            .await
            .map_err(|e| GoogleError::Serialization(e.to_string()))?;

        let events: Vec<ExternalEvent> = list
            .items
            .into_iter()
            .filter_map(GoogleEvent::into_external)
            .collect();

        debug!(
            user_id = %credential.user_id,
            count = events.len(),
            "Fetched events in sync window"
        );

        Ok(events)
    }

    async fn insert_event(
        &self,
        credential: &GoogleCredential,
        calendar_id: &str,
        draft: &ExternalEventDraft,
    ) -> Result<InsertedEvent, GoogleError> {
        let request = CalendarEventRequest {
            summary: draft.summary.clone(),
            description: draft.description.clone(),
            location: draft.location.clone(),
            start: EventDateTime {
                date_time: draft.start.to_rfc3339(),
                time_zone: "UTC".to_string(),
            },
            end: EventDateTime {
                date_time: draft.end.to_rfc3339(),
                time_zone: "UTC".to_string(),
            },
            attendees: if draft.attendees.is_empty() {
                None
            } else {
                Some(
                    draft
                        .attendees
                        .iter()
                        .map(|email| Attendee {
                            email: email.clone(),
                        })
                        .collect(),
                )
            },
            conference_data: if draft.request_conference {
                Some(ConferenceData {
                    create_request: ConferenceCreateRequest {
                        request_id: uuid::Uuid::new_v4().to_string(),
                        conference_solution_key: ConferenceSolutionKey {
                            solution_type: "hangoutsMeet".to_string(),
                        },
                    },
                })
            } else {
                None
            },
        };

        let url = format!(
            "{}/calendars/{}/events",
            CALENDAR_API_BASE,
            urlencoding::encode(calendar_id)
        );

        let mut query_params: Vec<(&str, &str)> = Vec::new();
        if draft.request_conference {
            query_params.push(("conferenceDataVersion", "1"));
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(&credential.access_token)
            .query(&query_params)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to send event insertion request");
                GoogleError::RequestFailed(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                status = %status,
                error = %error_text,
                "Event insertion failed - check OAuth scopes and permissions"
            );
            return Err(GoogleError::CalendarApi(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        let api_response = response
            .json::<InsertResponse>()
            .await
            .map_err(|e| GoogleError::Serialization(e.to_string()))?;

        // Prefer the deprecated-but-simple hangoutLink, fall back to the
        // video entry point in conferenceData
        let hangout_link = api_response.hangout_link.clone().or_else(|| {
            api_response.conference_data.as_ref().and_then(|conf| {
                conf.entry_points.as_ref().and_then(|eps| {
                    eps.iter()
                        .find(|ep| ep.entry_point_type == "video")
                        .and_then(|ep| ep.uri.clone())
                })
            })
        });

        info!(
            event_id = %api_response.id,
            has_meet_link = hangout_link.is_some(),
            "Calendar event created"
        );

        Ok(InsertedEvent {
            id: api_response.id,
            hangout_link,
        })
    }
}
