//! Realtime Message Types
//!
//! Frames exchanged with the realtime server. The server speaks Phoenix
//! channels (v1 JSON serializer): every frame carries a topic, an event name,
//! a payload and an optional reference.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::subscription::ChangeKind;

/// Topic used for socket-level heartbeats
pub const PHOENIX_TOPIC: &str = "phoenix";

/// A Phoenix channel frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

/// Filter for one `postgres_changes` listener
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostgresChangeFilter {
    /// `*`, `INSERT`, `UPDATE` or `DELETE`
    pub event: String,
    pub schema: String,
    pub table: String,
}

#[derive(Debug, Clone, Serialize)]
struct BroadcastConfig {
    ack: bool,
    #[serde(rename = "self")]
    self_broadcast: bool,
}

#[derive(Debug, Clone, Serialize)]
struct PresenceConfig {
    key: String,
}

#[derive(Debug, Clone, Serialize)]
struct JoinConfig {
    broadcast: BroadcastConfig,
    presence: PresenceConfig,
    postgres_changes: Vec<PostgresChangeFilter>,
}

#[derive(Debug, Clone, Serialize)]
struct JoinPayload {
    config: JoinConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
}

/// What an inbound frame means to the subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A row in the watched table changed
    Change(ChangeKind),
    /// Reply to one of our pushes
    Reply {
        reference: Option<String>,
        ok: bool,
        response: Value,
    },
    /// Server-side status for the channel
    System { ok: bool, message: String },
    /// The server closed the channel
    Closed,
    /// The channel crashed on the server
    ChannelError(String),
    /// Anything else (presence, broadcast, replies on other topics)
    Ignored,
}

impl PhoenixMessage {
    fn new(topic: &str, event: &str, payload: Value, reference: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            reference: Some(reference),
            join_ref: None,
        }
    }

    /// Join `topic`, listening for every change on `filter`'s table
    pub fn join(
        topic: &str,
        filter: PostgresChangeFilter,
        access_token: Option<String>,
        reference: String,
    ) -> Self {
        let payload = JoinPayload {
            config: JoinConfig {
                broadcast: BroadcastConfig {
                    ack: false,
                    self_broadcast: false,
                },
                presence: PresenceConfig { key: String::new() },
                postgres_changes: vec![filter],
            },
            access_token,
        };
        let mut msg = Self::new(
            topic,
            "phx_join",
            serde_json::to_value(payload).unwrap_or(Value::Null),
            reference.clone(),
        );
        msg.join_ref = Some(reference);
        msg
    }

    /// Socket keepalive
    pub fn heartbeat(reference: String) -> Self {
        Self::new(PHOENIX_TOPIC, "heartbeat", Value::Object(Default::default()), reference)
    }

    /// Hand the channel a fresh access token
    pub fn access_token(topic: &str, token: &str, reference: String) -> Self {
        Self::new(
            topic,
            "access_token",
            serde_json::json!({ "access_token": token }),
            reference,
        )
    }

    /// Leave `topic`
    pub fn leave(topic: &str, reference: String) -> Self {
        Self::new(topic, "phx_leave", Value::Object(Default::default()), reference)
    }

    /// Interpret a frame received for `topic`
    pub fn classify(&self, topic: &str) -> Inbound {
        if self.topic != topic {
            return Inbound::Ignored;
        }

        match self.event.as_str() {
            "postgres_changes" => self
                .payload
                .pointer("/data/type")
                .and_then(Value::as_str)
                .and_then(ChangeKind::from_event)
                .map(Inbound::Change)
                .unwrap_or(Inbound::Ignored),
            // Older servers name the event after the operation
            "INSERT" | "UPDATE" | "DELETE" => ChangeKind::from_event(&self.event)
                .map(Inbound::Change)
                .unwrap_or(Inbound::Ignored),
            "phx_reply" => Inbound::Reply {
                reference: self.reference.clone(),
                ok: self.payload.get("status").and_then(Value::as_str) == Some("ok"),
                response: self.payload.get("response").cloned().unwrap_or(Value::Null),
            },
            "system" => Inbound::System {
                ok: self.payload.get("status").and_then(Value::as_str) != Some("error"),
                message: self
                    .payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            "phx_close" => Inbound::Closed,
            "phx_error" => Inbound::ChannelError(self.payload.to_string()),
            _ => Inbound::Ignored,
        }
    }
}
