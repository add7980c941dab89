//! Exchange, refresh and revoke of provider tokens.
//!
//! [`TokenService`] owns the session lifecycle:
//!
//! - **exchange** redeems an authorization code, stores the refresh token in
//!   a new [`Session`] and hands the browser only the access token plus a
//!   `session_id` cookie.
//! - **refresh** looks the session up by cookie, asks the provider for a new
//!   access token and records either a rotation or another use of the same
//!   refresh token.
//! - **revoke** ends the session, revoking upstream on a best-effort basis.
//!
//! Each operation takes the request's [`CookieJar`] and returns it with any
//! `Set-Cookie` changes applied, so the HTTP layer only has to forward it.
//! Every `Unauthorized` outcome also clears the cookie.

use std::sync::Arc;

use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::cookie::{clear_session_cookie, session_cookie, session_id_from};
use crate::error::{ApiError, Result};
use crate::oauth::{OAuthClient, OAuthError, TokenResponse};
use crate::provider::ProviderRegistry;
use crate::session::{generate_session_id, Session, SessionStore, StoreError};

/// Attempts at writing a refreshed session before giving up on contention.
pub const MAX_CAS_ATTEMPTS: usize = 3;

/// Body of `POST /oauth-exchange`.
///
/// Every field is optional at the type level so that a missing field is
/// reported as a bad request naming the field.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRequest {
    pub code: Option<String>,
    pub code_verifier: Option<String>,
    pub redirect_uri: Option<String>,
    pub provider: Option<String>,
    pub remember_me: Option<bool>,
}

/// Access token handed to the browser.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in_sec: Option<i64>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("expires_in_sec", &self.expires_in_sec)
            .finish()
    }
}

impl From<&TokenResponse> for TokenGrant {
    fn from(tokens: &TokenResponse) -> Self {
        Self {
            access_token: tokens.access_token.clone(),
            expires_in_sec: tokens.expires_in,
        }
    }
}

/// Body of a successful `POST /oauth-revoke`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeResponse {
    pub revoked: bool,
}

/// Session-backed token operations.
#[derive(Clone)]
pub struct TokenService {
    providers: ProviderRegistry,
    store: Arc<dyn SessionStore>,
    oauth: OAuthClient,
    cookie_secure: bool,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("providers", &self.providers)
            .field("store", &"<SessionStore>")
            .field("cookie_secure", &self.cookie_secure)
            .finish()
    }
}

impl TokenService {
    /// Creates a service over the given providers and store.
    pub fn new(
        providers: ProviderRegistry,
        store: Arc<dyn SessionStore>,
        oauth: OAuthClient,
        cookie_secure: bool,
    ) -> Self {
        Self {
            providers,
            store,
            oauth,
            cookie_secure,
        }
    }

    /// Redeems an authorization code and opens a session.
    pub async fn exchange(
        &self,
        jar: CookieJar,
        request: ExchangeRequest,
    ) -> (CookieJar, Result<TokenGrant>) {
        match self.open_session(&jar, request).await {
            Ok((grant, cookie)) => (jar.add(cookie), Ok(grant)),
            Err(err) => {
                // The cookie is about to be cleared; its session goes with it.
                if matches!(err, ApiError::Unauthorized(_)) {
                    if let Some(previous) = session_id_from(&jar) {
                        self.discard(&previous).await;
                    }
                }
                self.fail(jar, err)
            }
        }
    }

    /// Mints a new access token for the session named by the cookie.
    pub async fn refresh(&self, jar: CookieJar) -> (CookieJar, Result<TokenGrant>) {
        let Some(session_id) = session_id_from(&jar) else {
            debug!("Refresh without session cookie");
            return (jar, Err(ApiError::unauthorized("missing session cookie")));
        };

        match self.refresh_session(&session_id).await {
            Ok((grant, session)) => {
                let now = Utc::now().timestamp();
                let cookie = session_cookie(
                    session_id,
                    session.remember_me,
                    session.remaining_secs(now),
                    self.cookie_secure,
                );
                (jar.add(cookie), Ok(grant))
            }
            Err(err) => self.fail(jar, err),
        }
    }

    /// Ends the session named by the cookie.
    ///
    /// Upstream revocation is best-effort; the local session is removed and
    /// the cookie cleared regardless of what the provider says.
    pub async fn revoke(&self, jar: CookieJar) -> (CookieJar, Result<RevokeResponse>) {
        let Some(session_id) = session_id_from(&jar) else {
            debug!("Revoke without session cookie");
            return (jar, Err(ApiError::unauthorized("missing session cookie")));
        };

        let id = session_id.clone();
        match self.with_store(move |store| store.get(&id)).await {
            Ok(Some(session)) => self.revoke_upstream(&session).await,
            Ok(None) => debug!("Revoke for unknown session"),
            Err(err) => warn!(error = %err, "Failed to read session for revocation"),
        }

        let jar = jar.add(clear_session_cookie(self.cookie_secure));
        match self.with_store(move |store| store.delete(&session_id)).await {
            Ok(_) => {
                info!("Session revoked");
                (jar, Ok(RevokeResponse { revoked: true }))
            }
            Err(err) => (jar, Err(err)),
        }
    }

    /// Removes every expired session from the store.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = Utc::now().timestamp();
        self.with_store(move |store| store.purge_expired(now)).await
    }

    /// Number of stored sessions, including expired ones not yet swept.
    pub async fn session_count(&self) -> Result<usize> {
        self.with_store(|store| store.len()).await
    }

    /// Runs a store operation on the blocking thread pool.
    ///
    /// The file store holds its lock across disk writes and `fsync`.
    async fn with_store<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&dyn SessionStore) -> std::result::Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || op(store.as_ref())).await {
            Ok(result) => Ok(result?),
            Err(join_error) => {
                error!(panicked = join_error.is_panic(), "Session store task failed");
                Err(ApiError::server_error("session store unavailable"))
            }
        }
    }

    /// Deletes a session on a best-effort cleanup path.
    async fn discard(&self, session_id: &str) {
        let id = session_id.to_string();
        if let Err(err) = self.with_store(move |store| store.delete(&id)).await {
            warn!(error = %err, "Failed to delete session");
        }
    }

    fn fail<T>(&self, jar: CookieJar, err: ApiError) -> (CookieJar, Result<T>) {
        if matches!(err, ApiError::Unauthorized(_)) {
            (jar.add(clear_session_cookie(self.cookie_secure)), Err(err))
        } else {
            (jar, Err(err))
        }
    }

    async fn open_session(
        &self,
        jar: &CookieJar,
        request: ExchangeRequest,
    ) -> Result<(TokenGrant, axum_extra::extract::cookie::Cookie<'static>)> {
        let code = require(request.code, "code")?;
        let code_verifier = require(request.code_verifier, "codeVerifier")?;
        let redirect_uri = require(request.redirect_uri, "redirectUri")?;
        let provider = require(request.provider, "provider")?;
        let remember_me = request.remember_me.unwrap_or(false);

        let params = self.providers.resolve_name(&provider)?;

        let tokens = self
            .oauth
            .exchange_code(params, &code, &code_verifier, &redirect_uri)
            .await
            .map_err(|err| {
                warn!(provider = %params.provider, error = %err, "Authorization code exchange failed");
                if err.is_rejection() {
                    ApiError::unauthorized("authorization code rejected by provider")
                } else {
                    ApiError::server_error("token exchange failed")
                }
            })?;

        let Some(refresh_token) = tokens.refresh_token() else {
            warn!(provider = %params.provider, "Provider returned no refresh token");
            if let Err(err) = self.oauth.revoke(params, &tokens.access_token).await {
                warn!(error = %err, "Failed to revoke orphaned access token");
            }
            return Err(ApiError::unauthorized("provider did not return a refresh token"));
        };

        // A browser signing in again replaces its previous session.
        if let Some(previous) = session_id_from(jar) {
            self.discard(&previous).await;
        }

        let now = Utc::now().timestamp();
        let token_expires_at = expiry_after(now, tokens.refresh_token_expires_in);
        let session = Session::new(
            params.provider,
            refresh_token.to_string(),
            token_expires_at,
            remember_me,
            now,
        );
        let session_id = generate_session_id();
        let cookie = session_cookie(
            session_id.clone(),
            remember_me,
            session.remaining_secs(now),
            self.cookie_secure,
        );
        self.with_store(move |store| store.put(&session_id, session))
            .await?;

        info!(
            provider = %params.provider,
            remember_me,
            token_expiry_known = token_expires_at.is_some(),
            "Session created"
        );
        Ok((TokenGrant::from(&tokens), cookie))
    }

    async fn refresh_session(&self, session_id: &str) -> Result<(TokenGrant, Session)> {
        let now = Utc::now().timestamp();
        let id = session_id.to_string();
        let Some(session) = self.with_store(move |store| store.get(&id)).await? else {
            debug!("Refresh for unknown session");
            return Err(ApiError::unauthorized("session not found"));
        };

        if let Some(reason) = session.invalid_reason(now) {
            info!(reason, "Discarding invalid session");
            self.discard(session_id).await;
            return Err(ApiError::unauthorized(reason));
        }

        let params = self.providers.resolve(session.provider)?;
        let sent_token = session.refresh_token().unwrap_or_default().to_string();

        let tokens = match self.oauth.refresh(params, &sent_token).await {
            Ok(tokens) => tokens,
            Err(err) if err.is_rejection() => {
                info!(provider = %params.provider, "Refresh token rejected, ending session");
                self.discard(session_id).await;
                return Err(ApiError::unauthorized("refresh token rejected by provider"));
            }
            Err(err) => {
                warn!(provider = %params.provider, error = %err, "Token refresh failed");
                return Err(ApiError::server_error(refresh_failure_summary(&err)));
            }
        };

        let updated = self
            .record_refresh(session_id, session, &sent_token, &tokens)
            .await?;
        Ok((TokenGrant::from(&tokens), updated))
    }

    /// Writes the outcome of a successful refresh with compare-and-swap.
    async fn record_refresh(
        &self,
        session_id: &str,
        mut current: Session,
        sent_token: &str,
        tokens: &TokenResponse,
    ) -> Result<Session> {
        let now = Utc::now().timestamp();
        let token_expires_at = expiry_after(now, tokens.refresh_token_expires_in);
        let new_token = tokens.refresh_token().filter(|t| *t != sent_token);

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            if current.refresh_token() != Some(sent_token) {
                warn!("Session refresh token changed during refresh");
                return Err(ApiError::server_error("session was refreshed concurrently"));
            }

            let updated = match new_token {
                Some(token) => current.rotated(token.to_string(), token_expires_at, now),
                None => current.touched(now),
            };

            let id = session_id.to_string();
            let expected = current.clone();
            let candidate = updated.clone();
            let swapped = self
                .with_store(move |store| store.compare_and_swap(&id, &expected, candidate))
                .await?;
            if swapped {
                debug!(
                    rotated = new_token.is_some(),
                    used_count = updated.used_count,
                    attempt,
                    "Session refreshed"
                );
                return Ok(updated);
            }

            let id = session_id.to_string();
            current = match self.with_store(move |store| store.get(&id)).await? {
                Some(session) => session,
                None => {
                    info!("Session ended during refresh");
                    return Err(ApiError::unauthorized("session ended during refresh"));
                }
            };
        }

        warn!(attempts = MAX_CAS_ATTEMPTS, "Session update kept conflicting");
        Err(ApiError::server_error("session update conflicted"))
    }

    async fn revoke_upstream(&self, session: &Session) {
        let Some(refresh_token) = session.refresh_token() else {
            return;
        };
        let params = match self.providers.resolve(session.provider) {
            Ok(params) => params,
            Err(err) => {
                warn!(provider = %session.provider, error = %err, "Cannot revoke upstream");
                return;
            }
        };
        if let Err(err) = self.oauth.revoke(params, refresh_token).await {
            warn!(provider = %params.provider, error = %err, "Upstream revocation failed");
        }
    }
}

/// Absolute expiry for a provider-reported lifetime in seconds.
///
/// A lifetime that is not positive counts as unknown; huge ones saturate.
fn expiry_after(now: i64, lifetime_secs: Option<i64>) -> Option<i64> {
    lifetime_secs
        .filter(|secs| *secs > 0)
        .map(|secs| now.saturating_add(secs))
}

fn require(value: Option<String>, field: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("missing '{field}'")))
}

/// Short description of a failed refresh for an authenticated caller.
fn refresh_failure_summary(err: &OAuthError) -> String {
    match err {
        OAuthError::Upstream { status, error } => match error {
            Some(code) => format!("token refresh failed: provider status {status} ({code})"),
            None => format!("token refresh failed: provider status {status}"),
        },
        OAuthError::Timeout(_) => "token refresh failed: provider timed out".to_string(),
        OAuthError::Unavailable(_) => "token refresh failed: provider unavailable".to_string(),
        _ => "token refresh failed".to_string(),
    }
}
