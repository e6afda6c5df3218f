//! Landing View
//!
//! The sign-in screen. Skipped entirely when a session already exists.

use std::sync::Arc;

use crate::auth::{AuthError, SessionGuard, SignInOptions};
use crate::backend::Backend;

use super::Navigator;

pub struct LandingView<B: Backend> {
    guard: SessionGuard<B>,
    options: SignInOptions,
}

impl<B: Backend> LandingView<B> {
    pub fn new(backend: Arc<B>, navigator: Arc<dyn Navigator>, options: SignInOptions) -> Self {
        Self {
            guard: SessionGuard::new(backend, navigator),
            options,
        }
    }

    /// Show the landing page
    ///
    /// Returns `true` if an existing session sent the user on to the dashboard.
    pub async fn mount(&self) -> bool {
        self.guard.redirect_if_session().await
    }

    /// Start the federated sign-in; `show_url` presents the provider URL
    pub async fn sign_in<F>(&self, show_url: F) -> Result<(), AuthError>
    where
        F: FnOnce(&str),
    {
        self.guard.sign_in(&self.options, show_url).await
    }
}
