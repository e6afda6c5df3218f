//! Bookmark List Reconciler
//!
//! Keeps a local mirror of the signed-in user's bookmarks. Every trigger
//! (mount, change notice, wake) calls [`BookmarkList::resync`], which fetches
//! the whole collection and replaces the mirror. Nothing is merged or patched.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, RwLock};

use crate::backend::{Backend, Bookmark, BookmarkId, NewBookmark};

/// What the dashboard renders
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardState {
    /// Newest first
    pub bookmarks: Vec<Bookmark>,
    /// Message from the last failed write, cleared by the next successful one
    pub last_error: Option<String>,
    /// When the last successful resync completed
    pub synced_at: Option<DateTime<Utc>>,
}

/// Scratch input for a new bookmark
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookmarkForm {
    pub title: String,
    pub url: String,
}

impl BookmarkForm {
    fn is_complete(&self) -> bool {
        !self.title.is_empty() && !self.url.is_empty()
    }
}

/// Result of one resync
#[derive(Debug, Clone)]
pub struct SyncStatus {
    /// Number of bookmarks after the resync
    pub items: usize,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

/// Result of an add or delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Backend accepted the write and the list was resynced
    Applied,
    /// Nothing was sent (incomplete form)
    Skipped,
    /// Backend refused or could not be reached
    Failed(String),
}

/// Local mirror of the bookmark collection plus the add form
pub struct BookmarkList<B: Backend> {
    backend: Arc<B>,
    state: watch::Sender<DashboardState>,
    form: RwLock<BookmarkForm>,
}

impl<B: Backend> BookmarkList<B> {
    pub fn new(backend: Arc<B>) -> Self {
        let (state, _) = watch::channel(DashboardState::default());
        Self {
            backend,
            state,
            form: RwLock::new(BookmarkForm::default()),
        }
    }

    /// Receiver notified on every state change
    pub fn subscribe_state(&self) -> watch::Receiver<DashboardState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> DashboardState {
        self.state.borrow().clone()
    }

    pub fn bookmarks(&self) -> Vec<Bookmark> {
        self.state.borrow().bookmarks.clone()
    }

    /// Fetch the whole collection and replace the local list
    ///
    /// On failure the list is left as it was.
    pub async fn resync(&self) -> SyncStatus {
        let start = Instant::now();

        match self.backend.list_bookmarks().await {
            Ok(rows) => {
                let items = rows.len();
                self.state.send_modify(|state| {
                    state.bookmarks = rows;
                    state.synced_at = Some(Utc::now());
                });

                let duration_ms = start.elapsed().as_millis() as u64;
                tracing::debug!(items, duration_ms, "Resync completed");
                SyncStatus {
                    items,
                    duration_ms,
                    success: true,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Resync failed");
                SyncStatus {
                    items: self.state.borrow().bookmarks.len(),
                    duration_ms: start.elapsed().as_millis() as u64,
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn set_title(&self, title: impl Into<String>) {
        self.form.write().await.title = title.into();
    }

    pub async fn set_url(&self, url: impl Into<String>) {
        self.form.write().await.url = url.into();
    }

    pub async fn form(&self) -> BookmarkForm {
        self.form.read().await.clone()
    }

    /// Insert the bookmark described by the form
    ///
    /// An incomplete form sends nothing. The form is cleared only after the
    /// backend accepts the insert, so a failed add can be retried as is.
    pub async fn add_bookmark(&self) -> WriteOutcome {
        let form = self.form().await;
        if !form.is_complete() {
            tracing::debug!("Add skipped, title or url empty");
            return WriteOutcome::Skipped;
        }

        let user = match self.backend.current_user().await {
            Ok(Some(user)) => user,
            Ok(None) => return self.write_failed("add", "not signed in".to_string()),
            Err(e) => return self.write_failed("add", e.to_string()),
        };

        let new = NewBookmark {
            title: form.title,
            url: form.url,
            user_id: user.id,
        };
        if let Err(e) = self.backend.insert_bookmark(&new).await {
            return self.write_failed("add", e.to_string());
        }

        tracing::info!(title = %new.title, "Bookmark added");
        {
            let mut form = self.form.write().await;
            *form = BookmarkForm::default();
        }
        self.write_applied().await
    }

    /// Delete one bookmark by identifier
    pub async fn delete_bookmark(&self, id: &BookmarkId) -> WriteOutcome {
        if let Err(e) = self.backend.delete_bookmark(id).await {
            return self.write_failed("delete", e.to_string());
        }

        tracing::info!(id = %id, "Bookmark deleted");
        self.write_applied().await
    }

    async fn write_applied(&self) -> WriteOutcome {
        self.state.send_if_modified(|state| state.last_error.take().is_some());
        self.resync().await;
        WriteOutcome::Applied
    }

    fn write_failed(&self, op: &str, message: String) -> WriteOutcome {
        tracing::error!(op, error = %message, "Bookmark write failed");
        let banner = format!("Could not {} bookmark: {}", op, message);
        self.state.send_modify(|state| state.last_error = Some(banner));
        WriteOutcome::Failed(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn list(backend: &MemoryBackend) -> BookmarkList<MemoryBackend> {
        BookmarkList::new(Arc::new(backend.clone()))
    }

    async fn add(list: &BookmarkList<MemoryBackend>, title: &str, url: &str) -> WriteOutcome {
        list.set_title(title).await;
        list.set_url(url).await;
        list.add_bookmark().await
    }

    #[tokio::test]
    async fn test_resync_mirrors_backend_newest_first() {
        let backend = MemoryBackend::signed_in("alice");
        backend.seed("alice", "first", "https://1.example");
        backend.seed("bob", "foreign", "https://b.example");
        backend.seed("alice", "second", "https://2.example");
        let list = list(&backend);

        let status = list.resync().await;
        assert!(status.success);
        assert_eq!(status.items, 2);

        let titles: Vec<_> = list.bookmarks().into_iter().map(|b| b.title).collect();
        assert_eq!(titles, vec!["second", "first"]);
        assert!(list.state().synced_at.is_some());
    }

    #[tokio::test]
    async fn test_list_matches_backend_after_writes() {
        let backend = MemoryBackend::signed_in("alice");
        let list = list(&backend);

        for i in 0..5 {
            assert_eq!(
                add(&list, &format!("t{}", i), &format!("https://{}.example", i)).await,
                WriteOutcome::Applied
            );
        }
        let victims: Vec<_> = list.bookmarks().iter().step_by(2).map(|b| b.id.clone()).collect();
        for id in &victims {
            assert_eq!(list.delete_bookmark(id).await, WriteOutcome::Applied);
        }
        // A write from another session, then a notice-driven resync
        backend.seed("alice", "elsewhere", "https://e.example");
        list.resync().await;

        assert_eq!(list.bookmarks(), backend.visible_rows());
        let times: Vec<_> = list.bookmarks().iter().map(|b| b.created_at).collect();
        assert!(times.windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test]
    async fn test_resync_is_idempotent() {
        let backend = MemoryBackend::signed_in("alice");
        backend.seed("alice", "one", "https://1.example");
        backend.seed("alice", "two", "https://2.example");
        let list = list(&backend);

        list.resync().await;
        let first = list.bookmarks();
        list.resync().await;
        assert_eq!(list.bookmarks(), first);
    }

    #[tokio::test]
    async fn test_example_round_trip() {
        let backend = MemoryBackend::signed_in("alice");
        backend.seed("alice", "older", "https://old.example");
        let list = list(&backend);

        assert_eq!(add(&list, "Example", "https://example.com").await, WriteOutcome::Applied);

        let rows = list.bookmarks();
        let matching: Vec<_> = rows.iter().filter(|b| b.title == "Example").collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].url, "https://example.com");
        assert_eq!(matching[0].user_id, "alice");
        assert_eq!(rows[0].title, "Example");
        assert_eq!(rows[1].title, "older");

        // Form cleared after success
        assert_eq!(list.form().await, BookmarkForm::default());
    }

    #[tokio::test]
    async fn test_delete_removes_exactly_one() {
        let backend = MemoryBackend::signed_in("alice");
        backend.seed("alice", "a", "https://a.example");
        let target = backend.seed("alice", "b", "https://b.example");
        backend.seed("alice", "c", "https://c.example");
        let list = list(&backend);
        list.resync().await;
        let before = list.bookmarks();

        assert_eq!(list.delete_bookmark(&target.id).await, WriteOutcome::Applied);

        let after = list.bookmarks();
        assert_eq!(after.len(), before.len() - 1);
        let expected: Vec<_> = before.into_iter().filter(|b| b.id != target.id).collect();
        assert_eq!(after, expected);
    }

    #[tokio::test]
    async fn test_empty_field_makes_no_backend_call() {
        let backend = MemoryBackend::signed_in("alice");
        backend.seed("alice", "kept", "https://k.example");
        let list = list(&backend);
        list.resync().await;
        let before = list.bookmarks();
        let stats = backend.stats();

        assert_eq!(add(&list, "", "https://x.example").await, WriteOutcome::Skipped);
        assert_eq!(add(&list, "Title", "").await, WriteOutcome::Skipped);

        assert_eq!(backend.stats(), stats);
        assert_eq!(list.bookmarks(), before);
    }

    #[tokio::test]
    async fn test_failed_add_keeps_form_and_shows_banner() {
        let backend = MemoryBackend::signed_in("alice");
        let list = list(&backend);
        backend.fail_next_insert("connection reset");

        let outcome = add(&list, "Example", "https://example.com").await;
        assert!(matches!(outcome, WriteOutcome::Failed(ref msg) if msg.contains("connection reset")));

        let form = list.form().await;
        assert_eq!(form.title, "Example");
        assert_eq!(form.url, "https://example.com");
        let banner = list.state().last_error.unwrap();
        assert!(banner.starts_with("Could not add bookmark"));
        assert!(list.bookmarks().is_empty());

        // Retrying the same form succeeds and clears the banner
        assert_eq!(list.add_bookmark().await, WriteOutcome::Applied);
        assert!(list.state().last_error.is_none());
        assert_eq!(list.bookmarks().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_delete_leaves_list() {
        let backend = MemoryBackend::signed_in("alice");
        let row = backend.seed("alice", "a", "https://a.example");
        let list = list(&backend);
        list.resync().await;
        let lists_before = backend.stats().list_calls;

        backend.fail_next_delete("timeout");
        assert!(matches!(list.delete_bookmark(&row.id).await, WriteOutcome::Failed(_)));
        assert_eq!(list.bookmarks().len(), 1);
        // No resync after a failed write
        assert_eq!(backend.stats().list_calls, lists_before);
    }

    #[tokio::test]
    async fn test_failed_resync_keeps_previous_list() {
        let backend = MemoryBackend::signed_in("alice");
        backend.seed("alice", "a", "https://a.example");
        let list = list(&backend);
        list.resync().await;

        backend.fail_next_list("unavailable");
        backend.seed("alice", "b", "https://b.example");
        let status = list.resync().await;

        assert!(!status.success);
        assert_eq!(status.items, 1);
        assert_eq!(list.bookmarks().len(), 1);
    }

    #[tokio::test]
    async fn test_add_without_session_fails() {
        let backend = MemoryBackend::new();
        let list = list(&backend);

        let outcome = add(&list, "Example", "https://example.com").await;
        assert!(matches!(outcome, WriteOutcome::Failed(_)));
        assert_eq!(backend.stats().insert_calls, 0);
    }

    #[tokio::test]
    async fn test_state_watchers_see_resync() {
        let backend = MemoryBackend::signed_in("alice");
        backend.seed("alice", "a", "https://a.example");
        let list = list(&backend);
        let mut rx = list.subscribe_state();

        list.resync().await;
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().bookmarks.len(), 1);
    }
}
