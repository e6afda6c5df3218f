//! Authentication
//!
//! The identity provider and the backend own the OAuth exchange; this module
//! only drives it from a terminal and guards the views.
//!
//! - **SessionGuard**: session checks, sign-in and sign-out
//! - **CallbackServer**: local listener for the provider redirect
//! - **PkceChallenge**: verifier/challenge pair for the code exchange
//! - **SessionStore**: session persisted between runs

mod callback;
mod guard;
pub mod pkce;
mod session;

pub use callback::{callback_router, CallbackOutcome, CallbackParams, CallbackServer, CallbackState};
pub use guard::{SessionGuard, SignInOptions};
pub use pkce::PkceChallenge;
pub use session::{default_session_path, SessionStore};

use std::path::PathBuf;
use thiserror::Error;

use crate::backend::BackendError;

/// Errors from the sign-in plumbing
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored session {path:?} is unreadable: {error}")]
    CorruptSession { path: PathBuf, error: String },

    #[error("Failed to generate random bytes")]
    Random,

    #[error("Invalid redirect URL {0}")]
    InvalidRedirect(String),

    #[error("No sign-in redirect received within {0} seconds")]
    CallbackTimeout(u64),

    #[error("Sign-in listener closed before a redirect arrived")]
    CallbackClosed,

    #[error("Identity provider denied sign-in: {error}{}", .description.as_deref().map(|d| format!(" ({})", d)).unwrap_or_default())]
    Denied {
        error: String,
        description: Option<String>,
    },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

impl From<AuthError> for BackendError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Backend(inner) => inner,
            other => BackendError::SessionStore(other.to_string()),
        }
    }
}
