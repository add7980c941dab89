//! Re-authentication around operations that use a bearer access token.
//!
//! [`Reauthenticator::run`] hands the current access token to an operation.
//! When the operation reports [`PersistenceError::Unauthorized`] the token
//! is refreshed once and the operation retried once. If that still fails,
//! or the token server itself rejects the session, the auth-error state is
//! latched: every later call fails fast with `Unauthorized` until
//! [`Reauthenticator::reset`] is called after the user signs in again.
//!
//! Concurrent operations share one in-flight refresh. Each token carries a
//! generation number; an operation whose token was rejected only refreshes
//! if no one else has replaced that generation in the meantime.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::auth::TokenGrant;
use crate::error::{AuthError, PersistenceError};

/// Source of fresh access tokens.
pub trait TokenRefresher: Send + Sync {
    /// Obtains a new access token for the current session.
    fn refresh_token(&self) -> impl Future<Output = Result<TokenGrant, AuthError>> + Send;
}

#[derive(Debug, Default)]
struct TokenState {
    access_token: Option<String>,
    generation: u64,
    auth_failed: bool,
}

/// Runs token-bearing operations with a single refresh-and-retry.
pub struct Reauthenticator<R> {
    refresher: R,
    state: Mutex<TokenState>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl<R> std::fmt::Debug for Reauthenticator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("Reauthenticator")
            .field("has_token", &state.access_token.is_some())
            .field("generation", &state.generation)
            .field("auth_failed", &state.auth_failed)
            .finish()
    }
}

impl<R: TokenRefresher> Reauthenticator<R> {
    /// Creates a wrapper with no access token; the first operation refreshes.
    pub fn new(refresher: R) -> Self {
        Self {
            refresher,
            state: Mutex::new(TokenState::default()),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Creates a wrapper starting from a known access token.
    pub fn with_access_token(refresher: R, access_token: String) -> Self {
        let wrapper = Self::new(refresher);
        wrapper.lock_state().access_token = Some(access_token);
        wrapper
    }

    /// The underlying token source.
    pub fn refresher(&self) -> &R {
        &self.refresher
    }

    /// Returns true once authorization has failed for good.
    pub fn is_auth_failed(&self) -> bool {
        self.lock_state().auth_failed
    }

    /// Clears the auth-error latch and installs a new access token.
    pub fn reset(&self, access_token: String) {
        let mut state = self.lock_state();
        state.access_token = Some(access_token);
        state.generation += 1;
        state.auth_failed = false;
        info!("Authorization state reset");
    }

    /// Runs `op` with the current access token, refreshing and retrying once
    /// if the token is rejected.
    ///
    /// `op` must map 401/403 responses to [`PersistenceError::Unauthorized`];
    /// every other error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, PersistenceError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, PersistenceError>>,
    {
        let (token, generation) = self.current_token().await?;

        match op(token).await {
            Err(PersistenceError::Unauthorized) => {}
            other => return other,
        }

        debug!(generation, "Access token rejected, refreshing");
        let (token, _) = self.refresh_after(generation).await?;

        match op(token).await {
            Err(PersistenceError::Unauthorized) => {
                warn!("Access token rejected after refresh, authorization failed");
                self.latch();
                Err(PersistenceError::Unauthorized)
            }
            other => other,
        }
    }

    async fn current_token(&self) -> Result<(String, u64), PersistenceError> {
        let generation = {
            let state = self.lock_state();
            if state.auth_failed {
                return Err(PersistenceError::Unauthorized);
            }
            if let Some(token) = &state.access_token {
                return Ok((token.clone(), state.generation));
            }
            state.generation
        };
        self.refresh_after(generation).await
    }

    /// Refreshes unless the token of `seen_generation` was already replaced.
    async fn refresh_after(&self, seen_generation: u64) -> Result<(String, u64), PersistenceError> {
        let _gate = self.refresh_gate.lock().await;

        {
            let state = self.lock_state();
            if state.auth_failed {
                return Err(PersistenceError::Unauthorized);
            }
            if state.generation != seen_generation {
                if let Some(token) = &state.access_token {
                    debug!(generation = state.generation, "Using token refreshed concurrently");
                    return Ok((token.clone(), state.generation));
                }
            }
        }

        match self.refresher.refresh_token().await {
            Ok(grant) => {
                let mut state = self.lock_state();
                state.access_token = Some(grant.access_token.clone());
                state.generation += 1;
                debug!(generation = state.generation, "Access token refreshed");
                Ok((grant.access_token, state.generation))
            }
            Err(AuthError::Unauthorized) => {
                warn!("Session rejected by token server, authorization failed");
                self.latch();
                Err(PersistenceError::Unauthorized)
            }
            Err(err) => {
                warn!(error = %err, "Token refresh failed");
                Err(PersistenceError::ConnectError(err.to_string()))
            }
        }
    }

    fn latch(&self) {
        let mut state = self.lock_state();
        state.auth_failed = true;
        state.access_token = None;
    }
}

impl<R> Reauthenticator<R> {
    fn lock_state(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
