//! HTTP client for provider token endpoints.
//!
//! [`OAuthClient`] performs the three upstream calls the token handlers need:
//! the authorization-code grant (with PKCE), the refresh-token grant, and
//! token revocation. All requests are form-encoded POSTs with a fixed
//! timeout.
//!
//! Token values travel in request bodies only; they are never logged and
//! never embedded in error messages.
//!
//! # Example
//!
//! ```rust,ignore
//! use versecut_server::oauth::OAuthClient;
//!
//! let client = OAuthClient::new()?;
//! let tokens = client
//!     .exchange_code(&params, "auth-code", "verifier", "https://app.example/callback")
//!     .await?;
//! println!("access token expires in {:?}s", tokens.expires_in);
//! ```

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::provider::ProviderParams;

/// Timeout applied to every upstream provider request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur when calling a provider token endpoint.
#[derive(Debug, Error)]
pub enum OAuthError {
    /// The provider rejected the grant (HTTP 401 or 403).
    #[error("provider rejected the request with status {status}")]
    Rejected {
        /// HTTP status returned by the provider.
        status: u16,
    },

    /// Any other non-success response.
    #[error("provider returned status {status}{}", describe_code(.error))]
    Upstream {
        /// HTTP status returned by the provider.
        status: u16,
        /// OAuth `error` code from the response body, if present.
        error: Option<String>,
    },

    /// The request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The provider could not be reached.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider answered 2xx with a body we could not use.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Client configuration error.
    #[error("client configuration error: {0}")]
    Configuration(String),
}

impl OAuthError {
    /// Returns `true` if the provider explicitly refused the credentials.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Successful token endpoint response.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    /// Short-lived bearer token for provider APIs.
    pub access_token: String,

    /// Access token lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<i64>,

    /// Refresh token. Absent on refreshes that do not rotate.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Refresh token lifetime in seconds, when the provider reports it.
    #[serde(default)]
    pub refresh_token_expires_in: Option<i64>,

    /// Granted scopes, space separated.
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// The refresh token, if present and non-empty.
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("refresh_token_expires_in", &self.refresh_token_expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Error body of an OAuth token endpoint.
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: Option<String>,
}

/// Client for provider token and revocation endpoints.
///
/// Cheap to clone; the inner `reqwest::Client` shares its connection pool.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http_client: Client,
}

impl OAuthClient {
    /// Creates a client with the default [`REQUEST_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns [`OAuthError::Configuration`] if the HTTP client cannot be created.
    pub fn new() -> Result<Self, OAuthError> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    /// Creates a client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns [`OAuthError::Configuration`] if the HTTP client cannot be created.
    pub fn with_timeout(timeout: Duration) -> Result<Self, OAuthError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OAuthError::Configuration(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { http_client })
    }

    /// Redeems an authorization code (PKCE) for tokens.
    ///
    /// # Errors
    ///
    /// - [`OAuthError::Rejected`] - The provider refused the code (401/403)
    /// - [`OAuthError::Upstream`] - Any other non-success status
    /// - [`OAuthError::Timeout`] / [`OAuthError::Unavailable`] - Transport failure
    /// - [`OAuthError::InvalidResponse`] - Unparseable success body
    pub async fn exchange_code(
        &self,
        params: &ProviderParams,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, OAuthError> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("client_id", params.client_id.as_str()),
            ("code", code),
            ("code_verifier", code_verifier),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(secret) = params.client_secret_for_request() {
            form.push(("client_secret", secret));
        }

        debug!(provider = %params.provider, "Exchanging authorization code");
        self.token_request(&params.token_url, &form).await
    }

    /// Uses a refresh token to obtain a new access token.
    ///
    /// # Errors
    ///
    /// Same as [`OAuthClient::exchange_code`].
    pub async fn refresh(
        &self,
        params: &ProviderParams,
        refresh_token: &str,
    ) -> Result<TokenResponse, OAuthError> {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("client_id", params.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];
        if let Some(secret) = params.client_secret_for_request() {
            form.push(("client_secret", secret));
        }

        debug!(provider = %params.provider, "Refreshing access token");
        self.token_request(&params.token_url, &form).await
    }

    /// Revokes a refresh or access token at the provider.
    ///
    /// # Errors
    ///
    /// Returns an error for any non-success status or transport failure.
    pub async fn revoke(&self, params: &ProviderParams, token: &str) -> Result<(), OAuthError> {
        debug!(provider = %params.provider, "Revoking token");

        let response = self
            .http_client
            .post(&params.revoke_url)
            .form(&[("token", token)])
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(status_error(status, response).await)
    }

    async fn token_request(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse, OAuthError> {
        let response = self
            .http_client
            .post(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response).await);
        }

        let tokens: TokenResponse = response.json().await.map_err(|e| {
            OAuthError::InvalidResponse(format!("failed to parse token response: {e}"))
        })?;

        if tokens.access_token.is_empty() {
            return Err(OAuthError::InvalidResponse(
                "token response has an empty access_token".to_string(),
            ));
        }

        debug!(
            expires_in = ?tokens.expires_in,
            has_refresh_token = tokens.refresh_token().is_some(),
            "Token endpoint succeeded"
        );
        Ok(tokens)
    }
}

fn describe_code(error: &Option<String>) -> String {
    error
        .as_deref()
        .map(|e| format!(" ({e})"))
        .unwrap_or_default()
}

fn map_transport_error(e: reqwest::Error) -> OAuthError {
    if e.is_timeout() {
        OAuthError::Timeout(REQUEST_TIMEOUT)
    } else if e.is_connect() {
        OAuthError::Unavailable(format!("connection failed: {}", e.without_url()))
    } else {
        OAuthError::Unavailable(format!("request failed: {}", e.without_url()))
    }
}

/// Builds the error for a non-success response, keeping only the OAuth
/// `error` code from the body.
async fn status_error(status: StatusCode, response: reqwest::Response) -> OAuthError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        debug!(status = status.as_u16(), "Provider rejected the grant");
        return OAuthError::Rejected {
            status: status.as_u16(),
        };
    }

    let error = response
        .json::<OAuthErrorBody>()
        .await
        .ok()
        .and_then(|body| body.error);

    warn!(status = status.as_u16(), error = ?error, "Unexpected response from provider");
    OAuthError::Upstream {
        status: status.as_u16(),
        error,
    }
}
