//! Backend error types
//!
//! Every failure coming back from the managed backend, whether transport,
//! auth, or a structured API error, ends up as a [`BackendError`].

use thiserror::Error;

/// Errors that can occur when talking to the backend
#[derive(Error, Debug)]
pub enum BackendError {
    /// Backend could not be reached
    #[error("Backend unavailable")]
    Unavailable,

    /// Request did not complete in time
    #[error("Request timeout")]
    Timeout,

    /// Transport-level failure
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Structured error returned by the REST or auth API
    #[error("API error {status}{}: {message}", code_suffix(.code))]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Operation requires a signed-in user
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Row-level rules refused the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Response body could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Live channel failure
    #[error("Realtime error: {0}")]
    Realtime(String),

    /// Session persistence failure
    #[error("Session store error: {0}")]
    SessionStore(String),

    /// Client was built with an unusable configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref()
        .map(|c| format!(" ({})", c))
        .unwrap_or_default()
}

impl BackendError {
    /// Classify a reqwest error the same way for every call site
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if err.is_connect() {
            BackendError::Unavailable
        } else {
            BackendError::Request(err)
        }
    }

    /// Whether the error means the session is missing or no longer valid
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            BackendError::NotAuthenticated | BackendError::Api { status: 401, .. }
        )
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Serialization(err.to_string())
    }
}

/// Result type alias for backend operations
pub type BackendResult<T> = Result<T, BackendError>;
