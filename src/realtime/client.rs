//! Realtime Client
//!
//! Opens a websocket to the realtime server, joins the channel for the
//! bookmark table and forwards every change as a [`ChangeNotice`].
//!
//! A background task owns the socket. It sends heartbeats, reconnects with
//! exponential backoff when the socket drops, and leaves the channel when the
//! [`ChangeSubscription`] is released.
//!
//! The access token comes from a [`TokenSource`], asked again before every
//! join and on every heartbeat, so a refreshed session reaches the channel
//! and a rejoin never replays a stale token.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use super::messages::{Inbound, PhoenixMessage, PostgresChangeFilter};
use super::subscription::{ChangeKind, ChangeNotice, ChangeSubscription};
use super::RealtimeError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const NOTICE_BUFFER: usize = 64;
const MAX_BACKOFF_MS: u64 = 30_000;

/// Configuration for the realtime client
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Project URL (http(s) or ws(s))
    pub url: String,
    /// Public API key sent as the `apikey` query parameter
    pub api_key: String,
    pub schema: String,
    pub table: String,
    pub heartbeat_interval: Duration,
    /// Reconnect attempts after the socket drops before giving up
    pub max_reconnect_attempts: u32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            schema: "public".to_string(),
            table: "bookmarks".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            max_reconnect_attempts: 5,
        }
    }
}

/// Supplies the access token the channel authenticates with
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Current token, refreshed by the implementor if needed
    async fn access_token(&self) -> Option<String>;
}

/// Client for the realtime change feed
#[derive(Debug, Clone)]
pub struct RealtimeClient {
    config: RealtimeConfig,
}

/// Delay before reconnect attempt `attempt` (0-based): 1s, 2s, 4s ... capped at 30s
pub fn reconnect_delay(attempt: u32) -> Duration {
    let ms = 2_u64.saturating_pow(attempt).saturating_mul(1000);
    Duration::from_millis(ms.min(MAX_BACKOFF_MS))
}

/// Websocket base for a project URL
pub fn websocket_base(url: &str) -> String {
    let url = url.trim_end_matches('/');
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        url.to_string()
    }
}

impl RealtimeClient {
    pub fn new(config: RealtimeConfig) -> Self {
        Self { config }
    }

    /// Websocket endpoint including the API key
    pub fn socket_url(&self) -> String {
        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            websocket_base(&self.config.url),
            urlencoding::encode(&self.config.api_key)
        )
    }

    /// Channel topic for the configured table
    pub fn topic(&self) -> String {
        format!("realtime:{}:{}", self.config.schema, self.config.table)
    }

    /// Connect and join the change channel
    ///
    /// The initial connection is made before returning so that an
    /// unreachable server is reported to the caller.
    pub async fn subscribe(
        &self,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<ChangeSubscription, RealtimeError> {
        let (socket, _) = connect_async(self.socket_url()).await?;
        tracing::info!(topic = %self.topic(), "Realtime connected");

        let (notices_tx, notices_rx) = mpsc::channel(NOTICE_BUFFER);
        let (close_tx, close_rx) = oneshot::channel();

        let channel = Channel {
            url: self.socket_url(),
            topic: self.topic(),
            filter: PostgresChangeFilter {
                event: "*".to_string(),
                schema: self.config.schema.clone(),
                table: self.config.table.clone(),
            },
            tokens,
            heartbeat_interval: self.config.heartbeat_interval,
            max_reconnect_attempts: self.config.max_reconnect_attempts,
            notices: notices_tx,
        };
        tokio::spawn(channel.run(socket, close_rx));

        Ok(ChangeSubscription::new(self.topic(), notices_rx, move || {
            let _ = close_tx.send(());
        }))
    }
}

/// How a socket session ended
enum Exit {
    /// Subscriber released the channel
    Released,
    /// Socket or channel went away
    Dropped(String),
}

struct Channel {
    url: String,
    topic: String,
    filter: PostgresChangeFilter,
    tokens: Arc<dyn TokenSource>,
    heartbeat_interval: Duration,
    max_reconnect_attempts: u32,
    notices: mpsc::Sender<ChangeNotice>,
}

impl Channel {
    async fn run(self, socket: Socket, mut close: oneshot::Receiver<()>) {
        let mut socket = Some(socket);
        let mut rejoin = false;
        let mut attempts = 0;

        loop {
            let current = match socket.take() {
                Some(s) => s,
                None => {
                    if attempts >= self.max_reconnect_attempts {
                        tracing::error!(
                            topic = %self.topic,
                            attempts,
                            "Realtime reconnect attempts exhausted"
                        );
                        break;
                    }
                    let delay = reconnect_delay(attempts);
                    attempts += 1;
                    tracing::info!(
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Realtime reconnecting"
                    );

                    tokio::select! {
                        _ = &mut close => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    match connect_async(self.url.as_str()).await {
                        Ok((s, _)) => s,
                        Err(e) => {
                            tracing::warn!(error = %e, "Realtime reconnect failed");
                            continue;
                        }
                    }
                }
            };

            let mut joined = false;
            match self.drive(current, &mut close, rejoin, &mut joined).await {
                Exit::Released => break,
                Exit::Dropped(reason) => {
                    tracing::warn!(topic = %self.topic, reason = %reason, "Realtime channel dropped");
                    rejoin = true;
                }
            }
            // A session that got as far as a join resets the backoff
            if joined {
                attempts = 0;
            }
        }

        tracing::debug!(topic = %self.topic, "Realtime task finished");
    }

    /// Run one socket session until it drops or the subscriber releases it
    async fn drive(
        &self,
        socket: Socket,
        close: &mut oneshot::Receiver<()>,
        rejoin: bool,
        joined: &mut bool,
    ) -> Exit {
        let (mut sink, mut stream) = socket.split();
        let join_ref = Uuid::new_v4().to_string();
        let mut token = self.tokens.access_token().await;

        let join = PhoenixMessage::join(
            &self.topic,
            self.filter.clone(),
            token.clone(),
            join_ref.clone(),
        );
        if let Err(e) = send(&mut sink, &join).await {
            return Exit::Dropped(e.to_string());
        }

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = &mut *close => {
                    let leave = PhoenixMessage::leave(&self.topic, Uuid::new_v4().to_string());
                    let _ = send(&mut sink, &leave).await;
                    let _ = sink.close().await;
                    tracing::info!(topic = %self.topic, "Realtime channel left");
                    return Exit::Released;
                }
                _ = heartbeat.tick() => {
                    let beat = PhoenixMessage::heartbeat(Uuid::new_v4().to_string());
                    if let Err(e) = send(&mut sink, &beat).await {
                        return Exit::Dropped(e.to_string());
                    }

                    let current = self.tokens.access_token().await;
                    if current.is_some() && current != token {
                        token = current;
                        let fresh = token.as_deref().unwrap_or_default();
                        let push = PhoenixMessage::access_token(
                            &self.topic,
                            fresh,
                            Uuid::new_v4().to_string(),
                        );
                        if let Err(e) = send(&mut sink, &push).await {
                            return Exit::Dropped(e.to_string());
                        }
                        tracing::debug!(topic = %self.topic, "Realtime access token updated");
                    }
                }
                frame = stream.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(frame))) => {
                            return Exit::Dropped(format!("closed by server: {:?}", frame));
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Exit::Dropped(e.to_string()),
                        None => return Exit::Dropped("stream ended".to_string()),
                    };

                    let msg: PhoenixMessage = match serde_json::from_str(&text) {
                        Ok(msg) => msg,
                        Err(e) => {
                            tracing::warn!(error = %e, "Unparseable realtime frame");
                            continue;
                        }
                    };

                    match msg.classify(&self.topic) {
                        Inbound::Change(kind) => {
                            tracing::debug!(kind = %kind, "Realtime change");
                            if self.forward(kind).is_err() {
                                return Exit::Released;
                            }
                        }
                        Inbound::Reply { reference, ok, response } => {
                            if reference.as_deref() != Some(join_ref.as_str()) {
                                continue;
                            }
                            if !ok {
                                return Exit::Dropped(format!("join refused: {}", response));
                            }
                            tracing::info!(topic = %self.topic, "Realtime channel joined");
                            *joined = true;
                            if rejoin && self.forward(ChangeKind::Resubscribed).is_err() {
                                return Exit::Released;
                            }
                        }
                        Inbound::System { ok, message } => {
                            if ok {
                                tracing::debug!(message = %message, "Realtime system message");
                            } else {
                                tracing::warn!(message = %message, "Realtime system error");
                            }
                        }
                        Inbound::Closed => return Exit::Dropped("channel closed".to_string()),
                        Inbound::ChannelError(reason) => return Exit::Dropped(reason),
                        Inbound::Ignored => {}
                    }
                }
            }
        }
    }

    fn forward(&self, kind: ChangeKind) -> Result<(), ()> {
        match self.notices.try_send(ChangeNotice::new(kind, self.filter.table.clone())) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                // A pending notice already triggers a full refresh
                tracing::debug!("Notice buffer full, coalescing");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(()),
        }
    }
}

async fn send<S>(sink: &mut S, msg: &PhoenixMessage) -> Result<(), RealtimeError>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(msg)?;
    sink.send(Message::Text(text)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    const TOPIC: &str = "realtime:public:bookmarks";

    /// Token source the test can rotate
    struct Tokens(Mutex<Option<String>>);

    impl Tokens {
        fn new(token: &str) -> Arc<Self> {
            Arc::new(Self(Mutex::new(Some(token.to_string()))))
        }

        fn set(&self, token: &str) {
            *self.0.lock().unwrap() = Some(token.to_string());
        }
    }

    #[async_trait]
    impl TokenSource for Tokens {
        async fn access_token(&self) -> Option<String> {
            self.0.lock().unwrap().clone()
        }
    }

    fn local_client(addr: std::net::SocketAddr, heartbeat_interval: Duration) -> RealtimeClient {
        RealtimeClient::new(RealtimeConfig {
            url: format!("http://{}", addr),
            api_key: "anon".to_string(),
            heartbeat_interval,
            ..Default::default()
        })
    }

    async fn reply_ok(ws: &mut WebSocketStream<TcpStream>, reference: &serde_json::Value) {
        let reply = json!({
            "topic": TOPIC,
            "event": "phx_reply",
            "payload": {"status": "ok", "response": {}},
            "ref": reference,
        });
        ws.send(Message::Text(reply.to_string())).await.unwrap();
    }

    #[test]
    fn test_reconnect_delay() {
        assert_eq!(reconnect_delay(0), Duration::from_secs(1));
        assert_eq!(reconnect_delay(1), Duration::from_secs(2));
        assert_eq!(reconnect_delay(4), Duration::from_secs(16));
        assert_eq!(reconnect_delay(5), Duration::from_secs(30));
        assert_eq!(reconnect_delay(40), Duration::from_secs(30));
    }

    #[test]
    fn test_websocket_base() {
        assert_eq!(websocket_base("https://abc.supabase.co/"), "wss://abc.supabase.co");
        assert_eq!(websocket_base("http://localhost:54321"), "ws://localhost:54321");
        assert_eq!(websocket_base("ws://example"), "ws://example");
    }

    #[test]
    fn test_socket_url_and_topic() {
        let client = RealtimeClient::new(RealtimeConfig {
            url: "https://abc.supabase.co".to_string(),
            api_key: "anon key".to_string(),
            ..Default::default()
        });
        assert_eq!(
            client.socket_url(),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=anon%20key&vsn=1.0.0"
        );
        assert_eq!(client.topic(), "realtime:public:bookmarks");
    }

    async fn recv_json(ws: &mut WebSocketStream<TcpStream>) -> serde_json::Value {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_join_forward_and_leave() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let join = recv_json(&mut ws).await;
            assert_eq!(join["event"], "phx_join");
            assert_eq!(join["topic"], "realtime:public:bookmarks");
            assert_eq!(join["payload"]["access_token"], "jwt");

            let reply = json!({
                "topic": "realtime:public:bookmarks",
                "event": "phx_reply",
                "payload": {"status": "ok", "response": {}},
                "ref": join["ref"],
            });
            ws.send(Message::Text(reply.to_string())).await.unwrap();

            let change = json!({
                "topic": "realtime:public:bookmarks",
                "event": "postgres_changes",
                "payload": {"data": {"type": "INSERT"}},
                "ref": null,
            });
            ws.send(Message::Text(change.to_string())).await.unwrap();

            let leave = recv_json(&mut ws).await;
            assert_eq!(leave["event"], "phx_leave");
        });

        let client = RealtimeClient::new(RealtimeConfig {
            url: format!("http://{}", addr),
            api_key: "anon".to_string(),
            ..Default::default()
        });
        let mut sub = client.subscribe(Tokens::new("jwt")).await.unwrap();

        let notice = tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notice.kind, ChangeKind::Insert);

        sub.close();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejoin_uses_current_token() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let tokens = Tokens::new("jwt-at-mount");
        let server_tokens = tokens.clone();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let join = recv_json(&mut ws).await;
            assert_eq!(join["payload"]["access_token"], "jwt-at-mount");
            reply_ok(&mut ws, &join["ref"]).await;

            // Session refreshed elsewhere, then the server expires the old token
            server_tokens.set("jwt-refreshed");
            let expired = json!({
                "topic": TOPIC,
                "event": "system",
                "payload": {"status": "error", "message": "Token has expired 5 seconds ago"},
                "ref": null,
            });
            ws.send(Message::Text(expired.to_string())).await.unwrap();
            let close = json!({"topic": TOPIC, "event": "phx_close", "payload": {}, "ref": null});
            ws.send(Message::Text(close.to_string())).await.unwrap();
            drop(ws);

            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let rejoin = recv_json(&mut ws).await;
            assert_eq!(rejoin["event"], "phx_join");
            assert_eq!(rejoin["payload"]["access_token"], "jwt-refreshed");
            reply_ok(&mut ws, &rejoin["ref"]).await;

            let leave = recv_json(&mut ws).await;
            assert_eq!(leave["event"], "phx_leave");
        });

        let client = local_client(addr, Duration::from_secs(30));
        let mut sub = client.subscribe(tokens).await.unwrap();

        let notice = tokio::time::timeout(Duration::from_secs(10), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notice.kind, ChangeKind::Resubscribed);

        sub.close();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_refreshed_token_pushed_on_heartbeat() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let tokens = Tokens::new("old");
        let server_tokens = tokens.clone();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let join = recv_json(&mut ws).await;
            reply_ok(&mut ws, &join["ref"]).await;

            server_tokens.set("new");
            let mut pushes = Vec::new();
            loop {
                let frame = recv_json(&mut ws).await;
                match frame["event"].as_str() {
                    Some("access_token") => {
                        assert_eq!(frame["topic"], TOPIC);
                        pushes.push(frame["payload"]["access_token"].clone());
                    }
                    Some("phx_leave") => break,
                    _ => {}
                }
            }
            pushes
        });

        let client = local_client(addr, Duration::from_millis(50));
        let sub = client.subscribe(tokens).await.unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        sub.close();

        let pushes = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pushes, vec![json!("new")]);
    }
}
