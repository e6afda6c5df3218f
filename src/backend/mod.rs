//! Managed Backend
//!
//! Everything non-trivial (authentication, storage, row-level security and
//! change fan-out) lives in the managed backend. This module is the seam to
//! it.
//!
//! ## Implementations
//!
//! - **SupabaseClient**: REST, auth and realtime calls against a Supabase project
//! - **MemoryBackend**: in-process backend with per-user row scoping, used for
//!   tests and `--offline` runs
//!
//! One backend instance is built at startup and shared by reference (`Arc`)
//! with every view.

mod error;
mod memory;
mod supabase;
mod types;

pub use error::{BackendError, BackendResult};
pub use memory::{MemoryBackend, MemoryStats};
pub use supabase::{SupabaseClient, SupabaseConfig};
pub use types::{AuthorizeRequest, Bookmark, BookmarkId, NewBookmark, Session, User};

use async_trait::async_trait;

use crate::realtime::ChangeSubscription;

/// Operations the managed backend exposes to the client
#[async_trait]
pub trait Backend: Send + Sync {
    /// Current session, if one exists
    async fn session(&self) -> BackendResult<Option<Session>>;

    /// Identity of the signed-in user, verified by the backend
    async fn current_user(&self) -> BackendResult<Option<User>>;

    /// URL that starts the federated sign-in with an identity provider
    fn authorize_url(&self, request: &AuthorizeRequest) -> BackendResult<String>;

    /// Complete a sign-in by exchanging the provider's code for a session
    async fn exchange_code(&self, code: &str, verifier: &str) -> BackendResult<Session>;

    /// Terminate the current session
    async fn sign_out(&self) -> BackendResult<()>;

    /// All bookmarks visible to the caller, newest first
    async fn list_bookmarks(&self) -> BackendResult<Vec<Bookmark>>;

    /// Create one bookmark
    async fn insert_bookmark(&self, bookmark: &NewBookmark) -> BackendResult<()>;

    /// Remove one bookmark by identifier
    async fn delete_bookmark(&self, id: &BookmarkId) -> BackendResult<()>;

    /// Open a change feed for the bookmark collection
    async fn subscribe(&self) -> BackendResult<ChangeSubscription>;
}
