//! OAuth redirect listener
//!
//! The identity provider sends the browser back to `redirect_url` with a
//! `code` (or an `error`). A short-lived axum server on that address picks it
//! up and hands it to whoever is waiting on [`CallbackServer::wait_for_code`].

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Html,
    routing::get,
    Router,
};
use reqwest::Url;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use super::AuthError;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const SUCCESS_PAGE: &str = "<!doctype html><html><body>\
<h1>Signed in</h1><p>You can close this window and return to the terminal.</p>\
</body></html>";

const DENIED_PAGE: &str = "<!doctype html><html><body>\
<h1>Sign-in failed</h1><p>The provider did not grant access. Check the terminal for details.</p>\
</body></html>";

const MISSING_PAGE: &str = "<!doctype html><html><body>\
<h1>Missing code</h1><p>This address only accepts sign-in redirects.</p>\
</body></html>";

/// Query parameters on the redirect
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// What the provider sent back
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    Code(String),
    Denied {
        error: String,
        description: Option<String>,
    },
}

/// Shared state for the callback handler
pub struct CallbackState {
    sender: Mutex<Option<oneshot::Sender<CallbackOutcome>>>,
}

impl CallbackState {
    pub fn new(sender: oneshot::Sender<CallbackOutcome>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }
}

/// Build the router serving `path`
pub fn callback_router(path: &str, state: Arc<CallbackState>) -> Router {
    Router::new()
        .route(path, get(handle_callback))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_callback(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<&'static str>) {
    let outcome = match (params.code, params.error) {
        (Some(code), _) if !code.is_empty() => CallbackOutcome::Code(code),
        (_, Some(error)) => CallbackOutcome::Denied {
            error,
            description: params.error_description,
        },
        _ => return (StatusCode::BAD_REQUEST, Html(MISSING_PAGE)),
    };

    let Some(sender) = state.sender.lock().await.take() else {
        tracing::debug!("Ignoring repeated OAuth callback");
        return (StatusCode::CONFLICT, Html(MISSING_PAGE));
    };

    let page = match &outcome {
        CallbackOutcome::Code(_) => {
            tracing::info!("Received OAuth authorization code");
            (StatusCode::OK, Html(SUCCESS_PAGE))
        }
        CallbackOutcome::Denied { error, .. } => {
            tracing::warn!(error = %error, "Identity provider denied sign-in");
            (StatusCode::OK, Html(DENIED_PAGE))
        }
    };

    if sender.send(outcome).is_err() {
        tracing::debug!("Sign-in no longer waiting for the callback");
    }
    page
}

/// Listener for a single OAuth redirect
pub struct CallbackServer {
    redirect_url: String,
    outcome: oneshot::Receiver<CallbackOutcome>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl CallbackServer {
    /// Bind to the host and port of `redirect_url`
    ///
    /// Port 0 binds an ephemeral port; [`redirect_url`](Self::redirect_url)
    /// then reports the actual address.
    pub async fn bind(redirect_url: &str) -> Result<Self, AuthError> {
        let mut url = Url::parse(redirect_url)
            .map_err(|e| AuthError::InvalidRedirect(format!("{}: {}", redirect_url, e)))?;
        if url.scheme() != "http" {
            return Err(AuthError::InvalidRedirect(format!(
                "{}: the local listener only serves http",
                redirect_url
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| AuthError::InvalidRedirect(format!("{}: missing host", redirect_url)))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);

        let listener = TcpListener::bind((host.as_str(), port)).await?;
        let local = listener.local_addr()?;
        if port == 0 {
            url.set_port(Some(local.port())).map_err(|_| {
                AuthError::InvalidRedirect(format!("{}: cannot carry a port", redirect_url))
            })?;
        }

        let (outcome_tx, outcome) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = callback_router(url.path(), Arc::new(CallbackState::new(outcome_tx)));

        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "OAuth callback listener failed");
            }
        });

        tracing::debug!(addr = %local, "OAuth callback listener bound");
        Ok(Self {
            redirect_url: url.to_string(),
            outcome,
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    /// Address the provider should redirect to
    pub fn redirect_url(&self) -> &str {
        &self.redirect_url
    }

    /// Wait for the redirect and return the authorization code
    pub async fn wait_for_code(mut self, timeout: Duration) -> Result<String, AuthError> {
        let received = tokio::time::timeout(timeout, &mut self.outcome).await;
        self.stop();
        // Let the in-flight response finish before returning
        let _ = tokio::time::timeout(DRAIN_TIMEOUT, &mut self.task).await;

        match received {
            Err(_) => Err(AuthError::CallbackTimeout(timeout.as_secs())),
            Ok(Err(_)) => Err(AuthError::CallbackClosed),
            Ok(Ok(CallbackOutcome::Code(code))) => Ok(code),
            Ok(Ok(CallbackOutcome::Denied { error, description })) => {
                Err(AuthError::Denied { error, description })
            }
        }
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn router() -> (Router, oneshot::Receiver<CallbackOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            callback_router("/auth/callback", Arc::new(CallbackState::new(tx))),
            rx,
        )
    }

    #[tokio::test]
    async fn test_code_is_forwarded() {
        let (app, rx) = router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/auth/callback?code=abc123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(rx.await.unwrap(), CallbackOutcome::Code("abc123".to_string()));
    }

    #[tokio::test]
    async fn test_provider_error_is_forwarded() {
        let (app, rx) = router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/auth/callback?error=access_denied&error_description=User%20cancelled")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            rx.await.unwrap(),
            CallbackOutcome::Denied {
                error: "access_denied".to_string(),
                description: Some("User cancelled".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_missing_code_is_rejected() {
        let (app, _rx) = router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/auth/callback")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_bind_and_receive() {
        let server = CallbackServer::bind("http://127.0.0.1:0/auth/callback")
            .await
            .unwrap();
        let url = format!("{}?code=xyz", server.redirect_url());
        assert!(!server.redirect_url().contains(":0/"));

        let request = tokio::spawn(async move { reqwest::get(url).await });
        let code = server.wait_for_code(Duration::from_secs(5)).await.unwrap();
        assert_eq!(code, "xyz");

        let response = request.await.unwrap().unwrap();
        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let server = CallbackServer::bind("http://127.0.0.1:0/auth/callback")
            .await
            .unwrap();
        let err = server
            .wait_for_code(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CallbackTimeout(_)));
    }

    #[tokio::test]
    async fn test_https_redirect_rejected() {
        let result = CallbackServer::bind("https://localhost:8443/auth/callback").await;
        assert!(matches!(result, Err(AuthError::InvalidRedirect(_))));
    }
}
