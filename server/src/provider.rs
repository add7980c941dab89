//! OAuth provider parameters and per-provider capabilities.
//!
//! Each supported identity provider is a [`Provider`] variant. Everything a
//! handler needs to talk to the provider's token endpoint is resolved through
//! the [`ProviderRegistry`], so the handlers themselves never branch on which
//! provider they are dealing with.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Default Google OAuth token endpoint.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Default Google OAuth revocation endpoint.
pub const GOOGLE_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";

/// An external identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Google accounts (Drive access).
    Google,
}

impl Provider {
    /// Wire name used in request bodies and the persisted store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
        }
    }

    /// Quirks of this provider's token endpoint.
    pub fn capabilities(&self) -> ProviderCapabilities {
        match self {
            // Google's web client flow wants the secret even with PKCE; the
            // code and verifier still gate the exchange.
            Self::Google => ProviderCapabilities {
                requires_client_secret: true,
            },
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown provider name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(Self::Google),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// Per-provider capability descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapabilities {
    /// Whether `client_secret` must accompany token requests despite PKCE.
    pub requires_client_secret: bool,
}

/// Endpoint URLs and client credentials for one provider.
#[derive(Clone)]
pub struct ProviderParams {
    /// The provider these parameters belong to.
    pub provider: Provider,

    /// OAuth token endpoint.
    pub token_url: String,

    /// OAuth revocation endpoint.
    pub revoke_url: String,

    /// OAuth client identifier.
    pub client_id: String,

    /// OAuth client secret, if one is configured.
    pub client_secret: Option<String>,
}

impl ProviderParams {
    /// Capabilities of the underlying provider.
    pub fn capabilities(&self) -> ProviderCapabilities {
        self.provider.capabilities()
    }

    /// The client secret to attach to a token request, if the provider
    /// wants one.
    pub fn client_secret_for_request(&self) -> Option<&str> {
        if self.capabilities().requires_client_secret {
            self.client_secret.as_deref().filter(|s| !s.is_empty())
        } else {
            None
        }
    }
}

// Never print the client secret.
impl fmt::Debug for ProviderParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderParams")
            .field("provider", &self.provider)
            .field("token_url", &self.token_url)
            .field("revoke_url", &self.revoke_url)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Maps providers to their configured parameters.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Provider, ProviderParams>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the parameters for a provider.
    #[must_use]
    pub fn with(mut self, params: ProviderParams) -> Self {
        self.providers.insert(params.provider, params);
        self
    }

    /// Resolves a provider given by name, as it arrives in a request body.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::BadRequest`] if the name is unknown or the
    /// provider is not configured.
    pub fn resolve_name(&self, name: &str) -> Result<&ProviderParams, ApiError> {
        let provider: Provider = name
            .parse()
            .map_err(|err: UnknownProvider| ApiError::bad_request(err.to_string()))?;
        self.resolve(provider)
    }

    /// Resolves a provider's parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::BadRequest`] if the provider is not configured.
    pub fn resolve(&self, provider: Provider) -> Result<&ProviderParams, ApiError> {
        self.providers
            .get(&provider)
            .ok_or_else(|| ApiError::bad_request(format!("provider not configured: {provider}")))
    }
}
