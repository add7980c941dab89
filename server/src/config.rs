//! Server configuration module.
//!
//! Parses configuration from environment variables for the Versecut server.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `VERSECUT_GOOGLE_CLIENT_ID` | Yes | - | OAuth client ID |
//! | `VERSECUT_GOOGLE_CLIENT_SECRET` | Yes | - | OAuth client secret |
//! | `VERSECUT_GOOGLE_TOKEN_URL` | No | Google token endpoint | Override for testing |
//! | `VERSECUT_GOOGLE_REVOKE_URL` | No | Google revoke endpoint | Override for testing |
//! | `VERSECUT_SESSION_STORE` | No | `file` | `memory` or `file` |
//! | `VERSECUT_SESSION_FILE` | No | `<data dir>/sessions.json` | Path of the file store |
//! | `VERSECUT_COOKIE_SECURE` | No | false | Mark the session cookie `Secure` |
//! | `PORT` | No | 8080 | HTTP server port |

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use directories::ProjectDirs;
use thiserror::Error;
use tracing::info;

use crate::provider::{Provider, ProviderParams, ProviderRegistry, GOOGLE_REVOKE_URL, GOOGLE_TOKEN_URL};
use crate::session::{FileSessionStore, MemorySessionStore, SessionStore};

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 8080;

/// File name of the session store inside the data directory.
const SESSION_FILE_NAME: &str = "sessions.json";

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },

    /// Port number is invalid.
    #[error("invalid port number: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),

    /// No location for the session file could be determined.
    #[error("cannot determine a data directory; set VERSECUT_SESSION_FILE")]
    NoDataDir,
}

/// Where sessions are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStoreKind {
    /// In-process map; sessions are lost on restart.
    Memory,
    /// JSON file at the given path.
    File(PathBuf),
}

/// Server configuration parsed from environment variables.
#[derive(Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,

    /// Google OAuth endpoints and credentials.
    pub google: ProviderParams,

    /// Session store backend.
    pub session_store: SessionStoreKind,

    /// Whether the session cookie carries the `Secure` attribute.
    pub cookie_secure: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("google", &self.google)
            .field("session_store", &self.session_store)
            .field("cookie_secure", &self.cookie_secure)
            .finish()
    }
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The Google client ID or secret is missing
    /// - `PORT` is not a valid u16
    /// - `VERSECUT_SESSION_STORE` names an unknown backend
    ///
    /// # Example
    ///
    /// ```no_run
    /// use versecut_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Server will listen on port {}", config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_port()?;
        let google = ProviderParams {
            provider: Provider::Google,
            token_url: env_or("VERSECUT_GOOGLE_TOKEN_URL", GOOGLE_TOKEN_URL),
            revoke_url: env_or("VERSECUT_GOOGLE_REVOKE_URL", GOOGLE_REVOKE_URL),
            client_id: required_env("VERSECUT_GOOGLE_CLIENT_ID")?,
            client_secret: Some(required_env("VERSECUT_GOOGLE_CLIENT_SECRET")?),
        };
        let session_store = parse_session_store()?;
        let cookie_secure = parse_bool_env("VERSECUT_COOKIE_SECURE");

        Ok(Self {
            port,
            google,
            session_store,
            cookie_secure,
        })
    }

    /// Builds the provider registry from the configured credentials.
    pub fn providers(&self) -> ProviderRegistry {
        ProviderRegistry::new().with(self.google.clone())
    }

    /// Opens the configured session store.
    pub fn open_store(&self) -> Arc<dyn SessionStore> {
        match &self.session_store {
            SessionStoreKind::Memory => {
                info!("Using in-memory session store");
                Arc::new(MemorySessionStore::new())
            }
            SessionStoreKind::File(path) => {
                info!(path = %path.display(), "Using file session store");
                Arc::new(FileSessionStore::new(path.clone()))
            }
        }
    }
}

/// Parse a boolean environment variable.
///
/// Returns `true` if the variable is set to "true" or "1" (case-insensitive),
/// `false` otherwise.
fn parse_bool_env(name: &str) -> bool {
    env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
}

/// Read a variable that must be present and non-empty.
fn required_env(name: &str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::MissingEnvVar(name.to_string())),
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Parse the PORT environment variable.
///
/// Returns the default port if not set.
fn parse_port() -> Result<u16, ConfigError> {
    match env::var("PORT") {
        Ok(port_str) => Ok(port_str.parse()?),
        Err(env::VarError::NotPresent) => Ok(DEFAULT_PORT),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: "PORT".to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

/// Parse `VERSECUT_SESSION_STORE` and, for the file backend, its path.
fn parse_session_store() -> Result<SessionStoreKind, ConfigError> {
    let kind = env::var("VERSECUT_SESSION_STORE").unwrap_or_default();
    match kind.trim().to_ascii_lowercase().as_str() {
        "memory" => Ok(SessionStoreKind::Memory),
        "" | "file" => {
            let path = match env::var("VERSECUT_SESSION_FILE") {
                Ok(path) if !path.trim().is_empty() => PathBuf::from(path.trim()),
                _ => default_session_file()?,
            };
            Ok(SessionStoreKind::File(path))
        }
        other => Err(ConfigError::InvalidFormat {
            var: "VERSECUT_SESSION_STORE".to_string(),
            message: format!("expected 'memory' or 'file', got '{other}'"),
        }),
    }
}

fn default_session_file() -> Result<PathBuf, ConfigError> {
    ProjectDirs::from("", "", "versecut")
        .map(|dirs| dirs.data_dir().join(SESSION_FILE_NAME))
        .ok_or(ConfigError::NoDataDir)
}
