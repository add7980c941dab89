//! Error types for the Versecut server.
//!
//! This module defines the caller-facing error taxonomy shared by the token
//! handlers. Every variant maps to exactly one HTTP status and one stable
//! machine-readable code.
//!
//! # Error Types
//!
//! - [`ApiError::BadRequest`] - Missing or invalid caller input (400)
//! - [`ApiError::Unauthorized`] - Session or token invalid, expired or rejected upstream (401)
//! - [`ApiError::ServerError`] - Unexpected upstream or internal failure (500)
//!
//! Messages carried by these variants are returned to the caller verbatim,
//! so they must never contain token values or raw provider error bodies.
//!
//! # Example
//!
//! ```rust
//! use versecut_server::error::ApiError;
//!
//! fn require(field: Option<&str>) -> Result<&str, ApiError> {
//!     field.ok_or_else(|| ApiError::bad_request("missing 'code'"))
//! }
//!
//! assert!(require(None).is_err());
//! ```

use std::error::Error;
use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::session::StoreError;

/// Caller-facing error for the OAuth token endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Missing or invalid caller input, or an unknown provider.
    BadRequest(String),

    /// The session or its upstream credentials are not usable.
    ///
    /// Callers should restart the login flow.
    Unauthorized(String),

    /// Unexpected upstream or internal failure.
    ///
    /// The session is left intact; retrying may succeed.
    ServerError(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest(msg) => write!(f, "bad request: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::ServerError(msg) => write!(f, "server error: {msg}"),
        }
    }
}

impl Error for ApiError {}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::ServerError(format!("session store failure: {err}"))
    }
}

impl ApiError {
    /// Creates a new bad request error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use versecut_server::error::ApiError;
    ///
    /// let err = ApiError::bad_request("unknown provider");
    /// assert!(matches!(err, ApiError::BadRequest(_)));
    /// ```
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Creates a new unauthorized error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use versecut_server::error::ApiError;
    ///
    /// let err = ApiError::unauthorized("session expired");
    /// assert!(matches!(err, ApiError::Unauthorized(_)));
    /// ```
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Creates a new server error.
    pub fn server_error(message: impl Into<String>) -> Self {
        Self::ServerError(message.into())
    }

    /// The HTTP status this error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the JSON error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::ServerError(_) => "server_error",
        }
    }

    /// The message returned to the caller.
    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(msg) | Self::Unauthorized(msg) | Self::ServerError(msg) => msg,
        }
    }

    /// Returns `true` if this error indicates a server-side problem.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ServerError(_))
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl ErrorResponse {
    pub(crate) fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
        }
    }

    pub(crate) fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::new(self.message()).with_code(self.code());
        (self.status(), Json(body)).into_response()
    }
}

/// A specialized Result type for token handler operations.
pub type Result<T> = std::result::Result<T, ApiError>;
