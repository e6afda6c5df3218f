//! In-process backend
//!
//! Behaves like the managed backend from the client's point of view: rows are
//! scoped to the signed-in user, `created_at` comes from a server clock, and
//! every mutation fans out a notice to all open subscriptions. Failures can be
//! injected per operation.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

use super::error::{BackendError, BackendResult};
use super::types::{AuthorizeRequest, Bookmark, BookmarkId, NewBookmark, Session, User};
use super::Backend;
use crate::auth::pkce;
use crate::realtime::{ChangeKind, ChangeNotice, ChangeSubscription};

const TABLE: &str = "bookmarks";
const NOTICE_BUFFER: usize = 64;

/// Call and subscription counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub list_calls: usize,
    pub insert_calls: usize,
    pub delete_calls: usize,
    pub user_calls: usize,
    pub subscriptions_opened: usize,
    pub subscriptions_closed: usize,
}

#[derive(Default)]
struct MemoryState {
    rows: Vec<Bookmark>,
    session: Option<Session>,
    clock: Option<DateTime<Utc>>,
    next_id: u64,
    subscribers: HashMap<u64, mpsc::Sender<ChangeNotice>>,
    next_subscriber: u64,
    stats: MemoryStats,
    fail_insert: Option<String>,
    fail_delete: Option<String>,
    fail_list: Option<String>,
    fail_subscribe: Option<String>,
    fail_session: Option<String>,
    fail_sign_out: Option<String>,
    grant: Option<User>,
    challenge: Option<String>,
}

impl MemoryState {
    fn tick(&mut self) -> DateTime<Utc> {
        let next = match self.clock {
            Some(t) => t + Duration::seconds(1),
            None => Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_else(Utc::now),
        };
        self.clock = Some(next);
        next
    }

    fn session_user(&self) -> Option<&User> {
        self.session.as_ref().map(|s| &s.user)
    }

    fn notify(&mut self, kind: ChangeKind) {
        self.subscribers.retain(|id, tx| match tx.try_send(ChangeNotice::new(kind, TABLE)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(subscriber = id, "Subscriber buffer full, notice dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    fn visible_rows(&self) -> Vec<Bookmark> {
        let Some(user) = self.session_user() else {
            return Vec::new();
        };
        let mut rows: Vec<Bookmark> = self
            .rows
            .iter()
            .filter(|b| b.user_id == user.id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }
}

/// Backend held entirely in memory
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

fn session_for(user: User) -> Session {
    Session {
        access_token: format!("memory-access-{}", user.id),
        refresh_token: format!("memory-refresh-{}", user.id),
        token_type: "bearer".to_string(),
        expires_at: (Utc::now() + Duration::hours(1)).timestamp(),
        user,
    }
}

fn injected(message: String) -> BackendError {
    BackendError::Api {
        status: 500,
        code: None,
        message,
    }
}

impl MemoryBackend {
    /// Empty backend with no session
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend already signed in as `user_id`
    pub fn signed_in(user_id: &str) -> Self {
        let backend = Self::new();
        backend.sign_in_as(User {
            id: user_id.to_string(),
            email: None,
        });
        backend
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Establish a session for `user` directly
    pub fn sign_in_as(&self, user: User) {
        self.lock().session = Some(session_for(user));
    }

    /// User that the next successful code exchange signs in as
    pub fn grant_on_exchange(&self, user: User) {
        self.lock().grant = Some(user);
    }

    /// Write a row on behalf of `user_id`, as another session would
    pub fn seed(&self, user_id: &str, title: &str, url: &str) -> Bookmark {
        let mut state = self.lock();
        state.next_id += 1;
        let bookmark = Bookmark {
            id: BookmarkId::new(format!("bm-{}", state.next_id)),
            title: title.to_string(),
            url: url.to_string(),
            user_id: user_id.to_string(),
            created_at: state.tick(),
        };
        state.rows.push(bookmark.clone());
        state.notify(ChangeKind::Insert);
        bookmark
    }

    /// Push a notice to every open subscription without changing any row
    pub fn notify(&self, kind: ChangeKind) {
        self.lock().notify(kind);
    }

    /// Rows the signed-in user can see, newest first
    pub fn visible_rows(&self) -> Vec<Bookmark> {
        self.lock().visible_rows()
    }

    /// Make the next insert fail with `message`
    pub fn fail_next_insert(&self, message: &str) {
        self.lock().fail_insert = Some(message.to_string());
    }

    /// Make the next delete fail with `message`
    pub fn fail_next_delete(&self, message: &str) {
        self.lock().fail_delete = Some(message.to_string());
    }

    /// Make the next list fail with `message`
    pub fn fail_next_list(&self, message: &str) {
        self.lock().fail_list = Some(message.to_string());
    }

    /// Make the next subscribe fail with `message`
    pub fn fail_next_subscribe(&self, message: &str) {
        self.lock().fail_subscribe = Some(message.to_string());
    }

    /// Make the next session check fail with `message`
    pub fn fail_next_session(&self, message: &str) {
        self.lock().fail_session = Some(message.to_string());
    }

    /// Make the next sign-out fail remotely with `message`; local state still clears
    pub fn fail_next_sign_out(&self, message: &str) {
        self.lock().fail_sign_out = Some(message.to_string());
    }

    pub fn stats(&self) -> MemoryStats {
        self.lock().stats.clone()
    }

    /// Number of subscriptions not yet released
    pub fn active_subscriptions(&self) -> usize {
        self.lock().subscribers.len()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn session(&self) -> BackendResult<Option<Session>> {
        let mut state = self.lock();
        if let Some(message) = state.fail_session.take() {
            return Err(injected(message));
        }
        Ok(state.session.clone())
    }

    async fn current_user(&self) -> BackendResult<Option<User>> {
        let mut state = self.lock();
        state.stats.user_calls += 1;
        Ok(state.session_user().cloned())
    }

    fn authorize_url(&self, request: &AuthorizeRequest) -> BackendResult<String> {
        self.lock().challenge = Some(request.code_challenge.clone());
        Ok(format!(
            "memory://authorize?provider={}&redirect_to={}&code_challenge={}",
            urlencoding::encode(&request.provider),
            urlencoding::encode(&request.redirect_to),
            urlencoding::encode(&request.code_challenge),
        ))
    }

    async fn exchange_code(&self, code: &str, verifier: &str) -> BackendResult<Session> {
        let mut state = self.lock();
        let invalid = |message: &str| BackendError::Api {
            status: 400,
            code: Some("invalid_grant".to_string()),
            message: message.to_string(),
        };

        if code.is_empty() {
            return Err(invalid("auth code is missing"));
        }
        let challenge = state
            .challenge
            .take()
            .ok_or_else(|| invalid("no sign-in in progress"))?;
        if pkce::challenge_for(verifier) != challenge {
            return Err(invalid("code challenge does not match previously saved code verifier"));
        }
        let user = state
            .grant
            .clone()
            .ok_or_else(|| invalid("provider did not grant access"))?;

        let session = session_for(user);
        state.session = Some(session.clone());
        Ok(session)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let mut state = self.lock();
        state.session = None;
        match state.fail_sign_out.take() {
            Some(message) => Err(injected(message)),
            None => Ok(()),
        }
    }

    async fn list_bookmarks(&self) -> BackendResult<Vec<Bookmark>> {
        let mut state = self.lock();
        state.stats.list_calls += 1;
        if let Some(message) = state.fail_list.take() {
            return Err(injected(message));
        }
        Ok(state.visible_rows())
    }

    async fn insert_bookmark(&self, bookmark: &NewBookmark) -> BackendResult<()> {
        let mut state = self.lock();
        state.stats.insert_calls += 1;
        if let Some(message) = state.fail_insert.take() {
            return Err(injected(message));
        }

        let owner = state
            .session_user()
            .map(|u| u.id.clone())
            .ok_or(BackendError::NotAuthenticated)?;
        if owner != bookmark.user_id {
            return Err(BackendError::PermissionDenied(
                "new row violates row-level security policy for table \"bookmarks\"".to_string(),
            ));
        }

        state.next_id += 1;
        let row = Bookmark {
            id: BookmarkId::new(format!("bm-{}", state.next_id)),
            title: bookmark.title.clone(),
            url: bookmark.url.clone(),
            user_id: bookmark.user_id.clone(),
            created_at: state.tick(),
        };
        state.rows.push(row);
        state.notify(ChangeKind::Insert);
        Ok(())
    }

    async fn delete_bookmark(&self, id: &BookmarkId) -> BackendResult<()> {
        let mut state = self.lock();
        state.stats.delete_calls += 1;
        if let Some(message) = state.fail_delete.take() {
            return Err(injected(message));
        }

        let owner = state
            .session_user()
            .map(|u| u.id.clone())
            .ok_or(BackendError::NotAuthenticated)?;

        // Rows owned by someone else are invisible, so the delete matches nothing
        let before = state.rows.len();
        state.rows.retain(|b| !(&b.id == id && b.user_id == owner));
        if state.rows.len() != before {
            state.notify(ChangeKind::Delete);
        }
        Ok(())
    }

    async fn subscribe(&self) -> BackendResult<ChangeSubscription> {
        let (tx, rx) = mpsc::channel(NOTICE_BUFFER);
        let id = {
            let mut state = self.lock();
            if let Some(message) = state.fail_subscribe.take() {
                return Err(BackendError::Realtime(message));
            }
            state.next_subscriber += 1;
            let id = state.next_subscriber;
            state.subscribers.insert(id, tx);
            state.stats.subscriptions_opened += 1;
            id
        };

        let shared = Arc::clone(&self.state);
        Ok(ChangeSubscription::new(
            format!("realtime:public:{}", TABLE),
            rx,
            move || {
                let mut state = shared.lock().unwrap_or_else(|e| e.into_inner());
                state.subscribers.remove(&id);
                state.stats.subscriptions_closed += 1;
            },
        ))
    }
}
