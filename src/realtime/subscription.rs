//! Change subscription handle
//!
//! A [`ChangeSubscription`] is the consumer end of a live change feed. It is
//! a lazy, unbounded sequence of [`ChangeNotice`]s; nothing in a notice is
//! trusted beyond "the collection changed".

use chrono::{DateTime, Utc};
use std::fmt;
use tokio::sync::mpsc;

/// What kind of mutation the backend reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// The channel was re-established; events may have been missed
    Resubscribed,
}

impl ChangeKind {
    /// Parse the event type used by the realtime wire format
    pub fn from_event(event: &str) -> Option<Self> {
        match event.to_ascii_uppercase().as_str() {
            "INSERT" => Some(ChangeKind::Insert),
            "UPDATE" => Some(ChangeKind::Update),
            "DELETE" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
            ChangeKind::Resubscribed => "resubscribed",
        };
        f.write_str(s)
    }
}

/// A "something changed" notification
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeNotice {
    pub kind: ChangeKind,
    /// Table the change happened on
    pub table: String,
    pub received_at: DateTime<Utc>,
}

impl ChangeNotice {
    pub fn new(kind: ChangeKind, table: impl Into<String>) -> Self {
        Self {
            kind,
            table: table.into(),
            received_at: Utc::now(),
        }
    }
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// Live change feed for one collection
///
/// The release hook runs exactly once: on [`close`](Self::close), or on drop
/// if the subscription was never closed explicitly.
pub struct ChangeSubscription {
    topic: String,
    notices: mpsc::Receiver<ChangeNotice>,
    release: Option<ReleaseHook>,
}

impl ChangeSubscription {
    /// Create a subscription from a notice stream and its release hook
    pub fn new<F>(topic: impl Into<String>, notices: mpsc::Receiver<ChangeNotice>, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            topic: topic.into(),
            notices,
            release: Some(Box::new(release)),
        }
    }

    /// Channel topic this subscription listens on
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next notice
    ///
    /// Returns `None` once the underlying channel has gone away for good.
    pub async fn next(&mut self) -> Option<ChangeNotice> {
        self.notices.recv().await
    }

    /// Release the subscription
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(hook) = self.release.take() {
            self.notices.close();
            hook();
            tracing::debug!(topic = %self.topic, "Change subscription released");
        }
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSubscription")
            .field("topic", &self.topic)
            .field("released", &self.release.is_none())
            .finish()
    }
}
