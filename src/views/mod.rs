//! Views
//!
//! The application has two screens:
//!
//! - **Landing**: sign-in; skipped when a session already exists
//! - **Dashboard**: the live bookmark list with add and delete
//!
//! Views never navigate directly; they ask a [`Navigator`] to move to a
//! [`Route`]. The binary drives the screens from [`CurrentRoute`], tests
//! record navigations with [`RouteRecorder`].

mod dashboard;
mod landing;

pub use dashboard::{DashboardView, LiveStats, MountedDashboard};
pub use landing::LandingView;

use std::fmt;
use std::sync::Mutex;
use tokio::sync::watch;

/// Screens the client can show
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Landing,
    Dashboard,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Landing => f.write_str("/"),
            Route::Dashboard => f.write_str("/dashboard"),
        }
    }
}

/// Something that can switch screens
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route);
}

/// Route state observed by the binary
pub struct CurrentRoute {
    tx: watch::Sender<Route>,
}

impl CurrentRoute {
    pub fn new(initial: Route) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn get(&self) -> Route {
        *self.tx.borrow()
    }

    /// Receiver notified on every navigation
    pub fn watch(&self) -> watch::Receiver<Route> {
        self.tx.subscribe()
    }
}

impl Navigator for CurrentRoute {
    fn navigate(&self, route: Route) {
        tracing::debug!(route = %route, "Navigate");
        self.tx.send_replace(route);
    }
}

/// Navigator that remembers every request
#[derive(Default)]
pub struct RouteRecorder {
    routes: Mutex<Vec<Route>>,
}

impl RouteRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn routes(&self) -> Vec<Route> {
        self.routes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn last(&self) -> Option<Route> {
        self.routes().last().copied()
    }
}

impl Navigator for RouteRecorder {
    fn navigate(&self, route: Route) {
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(route);
    }
}
