//! HTTP route handlers for the Versecut server.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `POST /oauth-exchange` - Redeem an authorization code and open a session
//! - `POST /oauth-refresh` - Mint a new access token for the cookie's session
//! - `POST /oauth-revoke` - End the cookie's session
//! - `GET /health` - Health check endpoint
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - The [`TokenService`] holding providers, the session store and the
//!   upstream OAuth client
//! - Server start time for uptime reporting
//!
//! # Example
//!
//! ```rust,no_run
//! use versecut_server::routes::{create_router, AppState};
//! use versecut_server::config::Config;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("failed to load config");
//!     let state = AppState::from_config(&config).expect("failed to build state");
//!     let app = create_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::ApiError;
use crate::oauth::{OAuthClient, OAuthError};
use crate::tokens::{ExchangeRequest, TokenService};

/// Maximum request body size (64 KiB).
const MAX_BODY_SIZE: usize = 64 * 1024;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Session-backed token operations.
    pub tokens: TokenService,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Creates application state around an existing token service.
    #[must_use]
    pub fn new(tokens: TokenService) -> Self {
        Self {
            tokens,
            start_time: Instant::now(),
        }
    }

    /// Builds the providers, session store and OAuth client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`OAuthError::Configuration`] if the HTTP client cannot be created.
    pub fn from_config(config: &Config) -> Result<Self, OAuthError> {
        let tokens = TokenService::new(
            config.providers(),
            config.open_store(),
            OAuthClient::new()?,
            config.cookie_secure,
        );
        Ok(Self::new(tokens))
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/oauth-exchange", post(post_exchange))
        .route("/oauth-refresh", post(post_refresh))
        .route("/oauth-revoke", post(post_revoke))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .route("/health", get(get_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// POST /oauth-exchange
// ============================================================================

/// POST /oauth-exchange - Redeem an authorization code.
///
/// # Request Body
///
/// ```json
/// {
///   "code": "...",
///   "codeVerifier": "...",
///   "redirectUri": "https://app.example/callback",
///   "provider": "google",
///   "rememberMe": true
/// }
/// ```
///
/// # Responses
///
/// - `200 OK` - `{accessToken, expiresInSec}` with a `session_id` cookie
/// - `400 Bad Request` - Missing field, invalid JSON or unknown provider
/// - `401 Unauthorized` - Code rejected or no refresh token issued
/// - `500 Internal Server Error` - Upstream or store failure
async fn post_exchange(State(state): State<AppState>, jar: CookieJar, body: Bytes) -> Response {
    let request = match parse_exchange_body(&body) {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };

    let (jar, result) = state.tokens.exchange(jar, request).await;
    log_failure("exchange", &result);
    (jar, result.map(Json)).into_response()
}

fn parse_exchange_body(body: &[u8]) -> Result<ExchangeRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ExchangeRequest::default());
    }
    serde_json::from_slice(body).map_err(|err| {
        debug!(error = %err, "Invalid exchange request body");
        ApiError::bad_request("invalid JSON body")
    })
}

// ============================================================================
// POST /oauth-refresh
// ============================================================================

/// POST /oauth-refresh - Refresh the access token of the cookie's session.
///
/// # Responses
///
/// - `200 OK` - `{accessToken, expiresInSec}` with a re-issued cookie
/// - `400 Bad Request` - The session's provider is not configured
/// - `401 Unauthorized` - No usable session; the cookie is cleared
/// - `500 Internal Server Error` - Upstream or store failure; session kept
async fn post_refresh(State(state): State<AppState>, jar: CookieJar) -> Response {
    let (jar, result) = state.tokens.refresh(jar).await;
    log_failure("refresh", &result);
    (jar, result.map(Json)).into_response()
}

// ============================================================================
// POST /oauth-revoke
// ============================================================================

/// POST /oauth-revoke - End the cookie's session.
///
/// # Responses
///
/// - `200 OK` - `{"revoked": true}`; the cookie is cleared
/// - `401 Unauthorized` - No session cookie
async fn post_revoke(State(state): State<AppState>, jar: CookieJar) -> Response {
    let (jar, result) = state.tokens.revoke(jar).await;
    log_failure("revoke", &result);
    (jar, result.map(Json)).into_response()
}

fn log_failure<T>(operation: &'static str, result: &Result<T, ApiError>) {
    match result {
        Err(err) if err.is_server_error() => {
            warn!(operation, code = err.code(), error = %err, "Token request failed");
        }
        Err(err) => {
            debug!(operation, code = err.code(), error = %err, "Token request refused");
        }
        Ok(_) => {}
    }
}

// ============================================================================
// GET /health - Health Check
// ============================================================================

/// Response body for health check endpoint.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `"ok"`, or `"degraded"` when the session store cannot be read.
    pub status: String,

    /// Number of stored sessions.
    pub sessions: Option<usize>,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

/// GET /health - Health check endpoint.
///
/// ```json
/// {
///   "status": "ok",
///   "sessions": 42,
///   "uptimeSeconds": 3600
/// }
/// ```
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = state.start_time.elapsed();

    let (status, sessions) = match state.tokens.session_count().await {
        Ok(count) => ("ok", Some(count)),
        Err(err) => {
            warn!(error = %err, "Session store unavailable");
            ("degraded", None)
        }
    };

    Json(HealthResponse {
        status: status.to_string(),
        sessions,
        uptime_seconds: uptime.as_secs(),
    })
}

// ============================================================================
// Tests
// ============================================================================
