//! Session Guard
//!
//! Keeps the dashboard behind a session and skips the landing page when one
//! already exists. Every check fails closed: if the backend cannot answer,
//! the user is treated as signed out.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{AuthorizeRequest, Backend};
use crate::views::{Navigator, Route};

use super::callback::CallbackServer;
use super::pkce::PkceChallenge;
use super::AuthError;

/// Sign-in settings the guard needs
#[derive(Debug, Clone)]
pub struct SignInOptions {
    /// Identity provider name
    pub provider: String,
    /// Local address the provider redirects back to
    pub redirect_url: String,
    /// How long to wait for the redirect
    pub callback_timeout: Duration,
}

/// Session checks and sign-in/sign-out actions
pub struct SessionGuard<B: Backend> {
    backend: Arc<B>,
    navigator: Arc<dyn Navigator>,
}

impl<B: Backend> Clone for SessionGuard<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            navigator: Arc::clone(&self.navigator),
        }
    }
}

impl<B: Backend> SessionGuard<B> {
    pub fn new(backend: Arc<B>, navigator: Arc<dyn Navigator>) -> Self {
        Self { backend, navigator }
    }

    /// Whether a session exists; a failed check counts as "no"
    async fn has_session(&self) -> bool {
        match self.backend.session().await {
            Ok(session) => session.is_some(),
            Err(e) => {
                tracing::warn!(error = %e, "Session check failed, treating as signed out");
                false
            }
        }
    }

    /// Send the user to the landing page unless a session exists
    ///
    /// Returns whether the session is present.
    pub async fn require_session(&self) -> bool {
        let present = self.has_session().await;
        if !present {
            tracing::info!("No session, redirecting to landing");
            self.navigator.navigate(Route::Landing);
        }
        present
    }

    /// Skip straight to the dashboard when a session exists
    ///
    /// Returns whether a redirect happened.
    pub async fn redirect_if_session(&self) -> bool {
        let present = self.has_session().await;
        if present {
            tracing::info!("Session found, redirecting to dashboard");
            self.navigator.navigate(Route::Dashboard);
        }
        present
    }

    /// Run the federated sign-in
    ///
    /// `show_url` receives the provider URL the user must open. The backend
    /// stores the resulting session; on success the guard moves to the
    /// dashboard.
    pub async fn sign_in<F>(&self, options: &SignInOptions, show_url: F) -> Result<(), AuthError>
    where
        F: FnOnce(&str),
    {
        let pkce = PkceChallenge::generate()?;
        let server = CallbackServer::bind(&options.redirect_url).await?;

        let url = self.backend.authorize_url(&AuthorizeRequest {
            provider: options.provider.clone(),
            redirect_to: server.redirect_url().to_string(),
            code_challenge: pkce.challenge().to_string(),
        })?;

        tracing::info!(provider = %options.provider, "Starting sign-in");
        show_url(&url);

        let code = server.wait_for_code(options.callback_timeout).await?;
        let session = self.backend.exchange_code(&code, pkce.verifier()).await?;

        tracing::info!(user_id = %session.user.id, "Signed in");
        self.navigator.navigate(Route::Dashboard);
        Ok(())
    }

    /// End the session and go back to the landing page
    ///
    /// Termination is best-effort; navigation happens regardless.
    pub async fn sign_out(&self) {
        if let Err(e) = self.backend.sign_out().await {
            tracing::warn!(error = %e, "Sign-out failed");
        }
        self.navigator.navigate(Route::Landing);
    }
}
