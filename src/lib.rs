//! # Smart Bookmarks
//!
//! A personal bookmark dashboard over a Supabase backend. The backend owns
//! authentication, storage, row-level security and change fan-out; this crate
//! is the client that keeps a live, read-only mirror of the signed-in user's
//! bookmarks.
//!
//! ## Modules
//!
//! - [`backend`]: the managed-backend seam (`Backend` trait, Supabase and in-memory implementations)
//! - [`realtime`]: change subscriptions over the realtime websocket
//! - [`auth`]: session guard, PKCE sign-in and session persistence
//! - [`sync`]: the bookmark list reconciler and the visibility signal
//! - [`views`]: landing and dashboard views
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use smart_bookmarks::backend::MemoryBackend;
//! use smart_bookmarks::sync::VisibilityHandle;
//! use smart_bookmarks::views::{CurrentRoute, DashboardView, Route};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = Arc::new(MemoryBackend::signed_in("user-1"));
//!     let route = Arc::new(CurrentRoute::new(Route::Dashboard));
//!     let visibility = VisibilityHandle::new();
//!
//!     let view = DashboardView::new(backend, route, visibility.clone());
//!     if let Some(mounted) = view.mount().await {
//!         mounted.list().set_title("Example").await;
//!         mounted.list().set_url("https://example.com").await;
//!         mounted.list().add_bookmark().await;
//!
//!         println!("{} bookmarks", mounted.list().bookmarks().len());
//!         mounted.unmount().await;
//!     }
//! }
//! ```

pub mod auth;
pub mod backend;
pub mod config;
pub mod realtime;
pub mod sync;
pub mod views;

// Re-export top-level types for convenience
pub use backend::{
    Backend, BackendError, BackendResult, Bookmark, BookmarkId, MemoryBackend, NewBookmark,
    Session, SupabaseClient, SupabaseConfig, User,
};

pub use auth::{AuthError, SessionGuard, SessionStore, SignInOptions};

pub use realtime::{ChangeKind, ChangeNotice, ChangeSubscription, RealtimeClient, RealtimeError};

pub use sync::{BookmarkList, DashboardState, Visibility, VisibilityHandle, WriteOutcome};

pub use views::{DashboardView, LandingView, MountedDashboard, Navigator, Route};

pub use config::{Config, ConfigError, LoggingConfig};
