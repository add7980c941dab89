//! Configuration module for the Versecut client.
//!
//! This module handles parsing configuration from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `VERSECUT_SERVER_URL` | Yes | - | Token server URL (e.g., `https://versecut.example.com`) |
//! | `VERSECUT_DRIVE_URL` | No | `https://www.googleapis.com` | Drive API base URL |
//! | `VERSECUT_SESSION_ID` | No | - | Session identifier; overrides the session file |
//! | `VERSECUT_SESSION_FILE` | No | `<config dir>/session` | Where `versecut login` keeps the session identifier |

use std::env;
use std::path::PathBuf;

use directories::ProjectDirs;
use thiserror::Error;

/// Default Drive API base URL.
pub const DEFAULT_DRIVE_URL: &str = "https://www.googleapis.com";

/// File name of the persisted session identifier inside the config directory.
const SESSION_FILE_NAME: &str = "session";

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to determine the per-user config directory.
    #[error("failed to determine config directory")]
    NoConfigDirectory,
}

/// Configuration for the Versecut client.
#[derive(Clone)]
pub struct Config {
    /// Base URL of the token server, without a trailing slash.
    pub server_url: String,

    /// Base URL of the Drive API, without a trailing slash.
    pub drive_url: String,

    /// Session identifier taken from the environment, if any.
    pub session_id: Option<String>,

    /// File holding the session identifier between invocations.
    pub session_file: PathBuf,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("server_url", &self.server_url)
            .field("drive_url", &self.drive_url)
            .field("session_id", &self.session_id.as_ref().map(|_| "[REDACTED]"))
            .field("session_file", &self.session_file)
            .finish()
    }
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - `VERSECUT_SERVER_URL` is not set or is not an http(s) URL
    /// - `VERSECUT_DRIVE_URL` is set but is not an http(s) URL
    /// - `VERSECUT_SESSION_FILE` is unset and no config directory exists
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_url = env::var("VERSECUT_SERVER_URL")
            .map_err(|_| ConfigError::MissingEnvVar("VERSECUT_SERVER_URL".to_string()))?;
        let server_url = parse_base_url("VERSECUT_SERVER_URL", &server_url)?;

        let drive_url = match env::var("VERSECUT_DRIVE_URL") {
            Ok(val) => parse_base_url("VERSECUT_DRIVE_URL", &val)?,
            Err(_) => DEFAULT_DRIVE_URL.to_string(),
        };

        let session_id = env::var("VERSECUT_SESSION_ID")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let session_file = match env::var("VERSECUT_SESSION_FILE") {
            Ok(path) => PathBuf::from(path),
            Err(_) => default_session_file()?,
        };

        Ok(Self {
            server_url,
            drive_url,
            session_id,
            session_file,
        })
    }
}

/// Validates an http(s) base URL and strips any trailing slash.
fn parse_base_url(key: &str, value: &str) -> Result<String, ConfigError> {
    let value = value.trim();
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected an http(s) URL, got '{value}'"),
        });
    }
    Ok(value.trim_end_matches('/').to_string())
}

fn default_session_file() -> Result<PathBuf, ConfigError> {
    let dirs = ProjectDirs::from("", "", "versecut").ok_or(ConfigError::NoConfigDirectory)?;
    Ok(dirs.config_dir().join(SESSION_FILE_NAME))
}
