//! Client for the Versecut token server.
//!
//! The server keeps the refresh token; this side only ever sees the
//! `session_id` cookie and short-lived access tokens. The cookie lives in a
//! [`reqwest::cookie::Jar`] so that exchange, refresh and revoke behave the
//! same way they do in a browser.
//!
//! # Example
//!
//! ```no_run
//! use versecut_client::auth::AuthClient;
//!
//! # async fn run() -> Result<(), versecut_client::error::AuthError> {
//! let client = AuthClient::new("https://versecut.example.com")?.with_session_id("abc");
//! let grant = client.refresh().await?;
//! println!("token valid for {:?}s", grant.expires_in_sec);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AuthError;
use crate::retry::TokenRefresher;

/// Name of the cookie carrying the session identifier.
pub const SESSION_COOKIE_NAME: &str = "session_id";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Body of `POST /oauth-exchange`.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRequest {
    pub code: String,
    pub code_verifier: String,
    pub redirect_uri: String,
    /// Provider name; the server rejects an exchange without one.
    pub provider: String,
    pub remember_me: bool,
}

impl std::fmt::Debug for ExchangeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeRequest")
            .field("code", &"[REDACTED]")
            .field("code_verifier", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .field("provider", &self.provider)
            .field("remember_me", &self.remember_me)
            .finish()
    }
}

/// Access token handed out by exchange and refresh.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub expires_in_sec: Option<i64>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[REDACTED]")
            .field("expires_in_sec", &self.expires_in_sec)
            .finish()
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Talks to the token server on behalf of one session.
#[derive(Clone)]
pub struct AuthClient {
    client: Client,
    jar: Arc<Jar>,
    base_url: Url,
}

impl std::fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("base_url", &self.base_url.as_str())
            .field("has_session", &self.session_id().is_some())
            .finish()
    }
}

impl AuthClient {
    /// Creates a client for the token server at `server_url`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Transport`] if the URL does not parse or the HTTP
    /// client cannot be built.
    pub fn new(server_url: &str) -> Result<Self, AuthError> {
        let base_url = Url::parse(server_url.trim_end_matches('/'))
            .map_err(|e| AuthError::Transport(format!("invalid server URL: {e}")))?;
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .cookie_provider(Arc::clone(&jar))
            .build()
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            jar,
            base_url,
        })
    }

    /// Seeds the cookie jar with an existing session identifier.
    pub fn with_session_id(self, session_id: &str) -> Self {
        let cookie = format!("{SESSION_COOKIE_NAME}={session_id}; Path=/");
        self.jar.add_cookie_str(&cookie, &self.base_url);
        self
    }

    /// The session identifier currently held in the cookie jar.
    pub fn session_id(&self) -> Option<String> {
        let header = self.jar.cookies(&self.base_url)?;
        let header = header.to_str().ok()?;
        header
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == SESSION_COOKIE_NAME)
            .map(|(_, value)| value.to_string())
            .filter(|value| !value.is_empty())
    }

    /// Exchanges an authorization code for an access token and a session.
    pub async fn exchange(&self, request: &ExchangeRequest) -> Result<TokenGrant, AuthError> {
        let response = self
            .client
            .post(self.endpoint("oauth-exchange"))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;
        let grant = parse_grant(response).await?;
        debug!(
            remember_me = request.remember_me,
            expires_in_sec = grant.expires_in_sec,
            "Authorization code exchanged"
        );
        Ok(grant)
    }

    /// Obtains a fresh access token for the current session.
    pub async fn refresh(&self) -> Result<TokenGrant, AuthError> {
        let response = self
            .client
            .post(self.endpoint("oauth-refresh"))
            .send()
            .await
            .map_err(transport_error)?;
        let grant = parse_grant(response).await?;
        debug!(expires_in_sec = grant.expires_in_sec, "Access token refreshed");
        Ok(grant)
    }

    /// Ends the current session on the server.
    pub async fn revoke(&self) -> Result<(), AuthError> {
        let response = self
            .client
            .post(self.endpoint("oauth-revoke"))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await?;
        debug!("Session revoked");
        Ok(())
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{name}", self.base_url.as_str().trim_end_matches('/'))
    }
}

impl TokenRefresher for AuthClient {
    async fn refresh_token(&self) -> Result<TokenGrant, AuthError> {
        self.refresh().await
    }
}

fn transport_error(e: reqwest::Error) -> AuthError {
    AuthError::Transport(e.without_url().to_string())
}

async fn parse_grant(response: Response) -> Result<TokenGrant, AuthError> {
    let response = check_status(response).await?;
    let grant: TokenGrant = response
        .json()
        .await
        .map_err(|e| AuthError::InvalidResponse(e.without_url().to_string()))?;
    if grant.access_token.is_empty() {
        return Err(AuthError::InvalidResponse("empty access token".to_string()));
    }
    Ok(grant)
}

async fn check_status(response: Response) -> Result<Response, AuthError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .json::<ErrorBody>()
        .await
        .map(|body| body.error)
        .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown").to_string());

    match status {
        StatusCode::UNAUTHORIZED => Err(AuthError::Unauthorized),
        StatusCode::BAD_REQUEST => Err(AuthError::BadRequest(message)),
        _ => Err(AuthError::Server {
            status: status.as_u16(),
            message,
        }),
    }
}
