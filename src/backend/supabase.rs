//! Supabase Client
//!
//! HTTP client for a Supabase project: PostgREST for the bookmark table,
//! GoTrue for sessions, and the realtime socket for change notices.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::error::{BackendError, BackendResult};
use super::types::{AuthorizeRequest, Bookmark, BookmarkId, NewBookmark, Session, User};
use super::Backend;
use crate::auth::{default_session_path, SessionStore};
use crate::realtime::{ChangeSubscription, RealtimeClient, RealtimeConfig, TokenSource};

/// Refresh sessions that expire within this many seconds
const REFRESH_LEEWAY_SECS: i64 = 60;

/// Configuration for the Supabase client
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project URL (e.g., "https://abc.supabase.co")
    pub url: String,
    /// Public anon key
    pub anon_key: String,
    pub schema: String,
    pub table: String,
    pub request_timeout: Duration,
    /// Where the session is persisted between runs
    pub session_file: PathBuf,
    /// Whether `subscribe` opens a realtime channel
    pub realtime_enabled: bool,
    pub heartbeat_interval: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for SupabaseConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:54321".to_string(),
            anon_key: String::new(),
            schema: "public".to_string(),
            table: "bookmarks".to_string(),
            request_timeout: Duration::from_secs(10),
            session_file: default_session_path(),
            realtime_enabled: true,
            heartbeat_interval: Duration::from_secs(30),
            max_reconnect_attempts: 5,
        }
    }
}

/// Token grant returned by GoTrue
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: User,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .unwrap_or_else(|| Utc::now().timestamp() + self.expires_in.unwrap_or(3600));
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type.unwrap_or_else(|| "bearer".to_string()),
            expires_at,
            user: self.user,
        }
    }
}

/// Error body shapes used by PostgREST and GoTrue
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Turn a failed response body into a [`BackendError`]
fn parse_error(status: u16, body: &str) -> BackendError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();

    let code = parsed
        .error_code
        .or_else(|| match parsed.code {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) if n.as_u64() != Some(u64::from(status)) => Some(n.to_string()),
            _ => None,
        })
        .or_else(|| parsed.error.clone().filter(|_| parsed.error_description.is_some()));

    let message = parsed
        .message
        .or(parsed.msg)
        .or(parsed.error_description)
        .or(parsed.error)
        .unwrap_or_else(|| body.trim().to_string());

    // 42501: insufficient_privilege, raised by row-level security
    if code.as_deref() == Some("42501") {
        return BackendError::PermissionDenied(message);
    }

    BackendError::Api {
        status,
        code,
        message,
    }
}

/// Supabase-backed implementation of [`Backend`]
///
/// Clones share the session cache.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    config: SupabaseConfig,
    session: Arc<RwLock<Option<Session>>>,
    store: SessionStore,
}

impl SupabaseClient {
    /// Create a client, restoring any persisted session
    pub fn new(config: SupabaseConfig) -> BackendResult<Self> {
        if config.url.is_empty() {
            return Err(BackendError::Config("backend.url is empty".to_string()));
        }
        if config.anon_key.is_empty() {
            return Err(BackendError::Config("backend.anon_key is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BackendError::Config(format!("HTTP client: {}", e)))?;

        let store = SessionStore::new(&config.session_file);
        let session = match store.load() {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring stored session");
                None
            }
        };

        tracing::debug!(
            url = %config.url,
            restored = session.is_some(),
            "Supabase client ready"
        );

        Ok(Self {
            client,
            config,
            session: Arc::new(RwLock::new(session)),
            store,
        })
    }

    fn base(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn rest_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base(), self.config.table)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base(), path)
    }

    /// Attach the API key and bearer token
    fn authorized(&self, request: RequestBuilder, session: Option<&Session>) -> RequestBuilder {
        let token = session
            .map(|s| s.access_token.as_str())
            .unwrap_or(self.config.anon_key.as_str());
        request
            .header("apikey", &self.config.anon_key)
            .bearer_auth(token)
    }

    /// Attach the schema profile headers PostgREST expects for non-public schemas
    fn profiled(&self, request: RequestBuilder) -> RequestBuilder {
        if self.config.schema == "public" {
            request
        } else {
            request
                .header("Accept-Profile", &self.config.schema)
                .header("Content-Profile", &self.config.schema)
        }
    }

    async fn send(&self, request: RequestBuilder) -> BackendResult<Response> {
        let response = request.send().await.map_err(BackendError::from_transport)?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(parse_error(status, &body))
    }

    async fn grant(&self, grant_type: &str, body: Value) -> BackendResult<Session> {
        let url = format!("{}?grant_type={}", self.auth_url("token"), grant_type);
        let response = self
            .send(
                self.client
                    .post(&url)
                    .header("apikey", &self.config.anon_key)
                    .json(&body),
            )
            .await?;
        let token: TokenResponse = response.json().await.map_err(BackendError::from_transport)?;
        Ok(token.into_session())
    }

    fn persist(&self, session: Option<&Session>) {
        let result = match session {
            Some(session) => self.store.save(session),
            None => self.store.clear(),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, path = ?self.store.path(), "Failed to persist session");
        }
    }

    /// Current session, refreshed if it is about to expire
    async fn valid_session(&self) -> BackendResult<Option<Session>> {
        {
            let cached = self.session.read().await;
            match cached.as_ref() {
                None => return Ok(None),
                Some(s) if !s.is_expired(Utc::now(), REFRESH_LEEWAY_SECS) => {
                    return Ok(Some(s.clone()))
                }
                Some(_) => {}
            }
        }

        let mut cached = self.session.write().await;
        let Some(current) = cached.clone() else {
            return Ok(None);
        };
        // Another caller may have refreshed while we waited
        if !current.is_expired(Utc::now(), REFRESH_LEEWAY_SECS) {
            return Ok(Some(current));
        }

        tracing::debug!(user_id = %current.user.id, "Refreshing session");
        match self
            .grant("refresh_token", json!({ "refresh_token": current.refresh_token }))
            .await
        {
            Ok(fresh) => {
                self.persist(Some(&fresh));
                *cached = Some(fresh.clone());
                Ok(Some(fresh))
            }
            Err(e @ BackendError::Api { status: 400..=401, .. }) => {
                tracing::warn!(error = %e, "Session refresh rejected, signing out");
                self.persist(None);
                *cached = None;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Backend for SupabaseClient {
    async fn session(&self) -> BackendResult<Option<Session>> {
        self.valid_session().await
    }

    async fn current_user(&self) -> BackendResult<Option<User>> {
        let Some(session) = self.valid_session().await? else {
            return Ok(None);
        };

        let request = self.authorized(self.client.get(self.auth_url("user")), Some(&session));
        match self.send(request).await {
            Ok(response) => {
                let user: User = response.json().await.map_err(BackendError::from_transport)?;
                Ok(Some(user))
            }
            Err(e) if e.is_auth() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn authorize_url(&self, request: &AuthorizeRequest) -> BackendResult<String> {
        if request.provider.is_empty() {
            return Err(BackendError::Config("auth.provider is empty".to_string()));
        }
        Ok(format!(
            "{}?provider={}&redirect_to={}&code_challenge={}&code_challenge_method=s256",
            self.auth_url("authorize"),
            urlencoding::encode(&request.provider),
            urlencoding::encode(&request.redirect_to),
            urlencoding::encode(&request.code_challenge),
        ))
    }

    async fn exchange_code(&self, code: &str, verifier: &str) -> BackendResult<Session> {
        let session = self
            .grant(
                "pkce",
                json!({ "auth_code": code, "code_verifier": verifier }),
            )
            .await?;

        self.persist(Some(&session));
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let session = self.session.write().await.take();
        self.persist(None);

        let Some(session) = session else {
            return Ok(());
        };
        let request = self.authorized(self.client.post(self.auth_url("logout")), Some(&session));
        self.send(request).await?;
        tracing::info!(user_id = %session.user.id, "Session terminated");
        Ok(())
    }

    async fn list_bookmarks(&self) -> BackendResult<Vec<Bookmark>> {
        let session = self.valid_session().await?;
        let request = self.client.get(self.rest_url()).query(&[
            ("select", "*"),
            ("order", "created_at.desc"),
        ]);
        let request = self.profiled(self.authorized(request, session.as_ref()));

        let response = self.send(request).await?;
        let rows: Vec<Bookmark> = response.json().await.map_err(BackendError::from_transport)?;
        tracing::debug!(count = rows.len(), "Fetched bookmarks");
        Ok(rows)
    }

    async fn insert_bookmark(&self, bookmark: &NewBookmark) -> BackendResult<()> {
        let session = self
            .valid_session()
            .await?
            .ok_or(BackendError::NotAuthenticated)?;

        let request = self
            .client
            .post(self.rest_url())
            .header("Prefer", "return=minimal")
            .json(bookmark);
        let request = self.profiled(self.authorized(request, Some(&session)));

        self.send(request).await?;
        Ok(())
    }

    async fn delete_bookmark(&self, id: &BookmarkId) -> BackendResult<()> {
        let session = self
            .valid_session()
            .await?
            .ok_or(BackendError::NotAuthenticated)?;

        let filter = format!("eq.{}", id);
        let request = self
            .client
            .delete(self.rest_url())
            .query(&[("id", filter.as_str())]);
        let request = self.profiled(self.authorized(request, Some(&session)));

        self.send(request).await?;
        Ok(())
    }

    async fn subscribe(&self) -> BackendResult<ChangeSubscription> {
        if !self.config.realtime_enabled {
            return Err(BackendError::Realtime("realtime is disabled".to_string()));
        }

        let client = RealtimeClient::new(RealtimeConfig {
            url: self.config.url.clone(),
            api_key: self.config.anon_key.clone(),
            schema: self.config.schema.clone(),
            table: self.config.table.clone(),
            heartbeat_interval: self.config.heartbeat_interval,
            max_reconnect_attempts: self.config.max_reconnect_attempts,
        });

        let subscription = client.subscribe(Arc::new(self.clone())).await?;
        Ok(subscription)
    }
}

#[async_trait]
impl TokenSource for SupabaseClient {
    async fn access_token(&self) -> Option<String> {
        match self.valid_session().await {
            Ok(session) => session.map(|s| s.access_token),
            Err(e) => {
                // Keep the cached token until the refresh can be retried
                tracing::warn!(error = %e, "Session refresh failed for realtime");
                self.session.read().await.as_ref().map(|s| s.access_token.clone())
            }
        }
    }
}
