//! Realtime Change Feed
//!
//! Change notifications pushed by the backend over a websocket. Notices say
//! only that the bookmark collection changed; consumers refetch to learn how.
//!
//! - **RealtimeClient**: socket, channel join, heartbeats and reconnects
//! - **ChangeSubscription**: consumer handle, released exactly once
//! - **PhoenixMessage**: wire frames

mod client;
mod messages;
mod subscription;

pub use client::{reconnect_delay, websocket_base, RealtimeClient, RealtimeConfig, TokenSource};
pub use messages::{Inbound, PhoenixMessage, PostgresChangeFilter, PHOENIX_TOPIC};
pub use subscription::{ChangeKind, ChangeNotice, ChangeSubscription};

use thiserror::Error;

use crate::backend::BackendError;

/// Errors from the realtime socket
#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<RealtimeError> for BackendError {
    fn from(err: RealtimeError) -> Self {
        BackendError::Realtime(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_backend_error() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: BackendError = RealtimeError::from(err).into();
        assert!(matches!(err, BackendError::Realtime(msg) if msg.starts_with("Serialization error")));
    }
}
