//! Error types for the Versecut client.
//!
//! Each layer has its own error: [`AuthError`] for the token server,
//! [`PersistenceError`] for project storage, and [`ClientError`] wrapping
//! both, plus local file and JSON failures, for callers that do not care
//! which layer failed.

use thiserror::Error;

/// Errors returned by the token server endpoints.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The session is missing, expired or rejected; the user must sign in again.
    #[error("not signed in")]
    Unauthorized,

    /// The server rejected the request as malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The server failed to complete the request.
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The server could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// A success response did not carry the expected body.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors returned by the project store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// Authorization failed and could not be recovered by a refresh.
    #[error("not authorized to access project storage")]
    Unauthorized,

    /// The store could not be reached or answered with an error status.
    #[error("could not reach project storage: {0}")]
    ConnectError(String),

    /// The store answered, but the body was not what was expected.
    #[error("unexpected data from project storage: {0}")]
    DataError(String),
}

impl PersistenceError {
    /// Returns true if the user has to sign in again.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, PersistenceError::Unauthorized)
    }
}

/// Errors that can occur during client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Token server error.
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Project storage error.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using [`ClientError`].
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(AuthError::Unauthorized.to_string(), "not signed in");
        assert_eq!(
            AuthError::Server {
                status: 502,
                message: "upstream down".to_string()
            }
            .to_string(),
            "server error (502): upstream down"
        );
        assert_eq!(
            PersistenceError::DataError("expected object".to_string()).to_string(),
            "unexpected data from project storage: expected object"
        );
    }

    #[test]
    fn test_from_conversions() {
        let err: ClientError = PersistenceError::Unauthorized.into();
        assert!(matches!(err, ClientError::Persistence(PersistenceError::Unauthorized)));

        let err: ClientError = AuthError::Unauthorized.into();
        assert_eq!(err.to_string(), "authentication error: not signed in");

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ClientError = io_err.into();
        assert!(matches!(err, ClientError::Io(_)));

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ClientError = json_err.into();
        assert!(err.to_string().starts_with("JSON error:"));
    }

    #[test]
    fn test_is_unauthorized() {
        assert!(PersistenceError::Unauthorized.is_unauthorized());
        assert!(!PersistenceError::ConnectError("x".into()).is_unauthorized());
    }
}
