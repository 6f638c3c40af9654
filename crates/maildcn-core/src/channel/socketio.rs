//! Socket.IO push channel over WebSocket
//!
//! Speaks Engine.IO v4 / Socket.IO v5 on the WebSocket transport only (no
//! long-polling). The bearer token travels in the namespace CONNECT auth
//! payload. Reconnection uses capped exponential backoff and every state
//! change is published on a `watch` channel.

use super::packet::{EnginePacket, SocketPacket};
use super::{ConnectionStatus, EventHandler, HandlerRegistry, PushChannel, SubscriptionId};
use futures_util::{Sink, SinkExt, StreamExt};
use maildcn_common::config::{BackendConfig, ChannelConfig};
use maildcn_common::{Error, Result};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Connection parameters
#[derive(Debug, Clone)]
pub struct SocketIoOptions {
    /// Base address, e.g. `ws://localhost:5000`
    pub url: String,
    /// Bearer credential sent in the CONNECT packet
    pub token: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// 0 = retry forever
    pub max_reconnect_attempts: u32,
    /// Used until the server announces its own ping settings
    pub ping_timeout: Duration,
}

impl SocketIoOptions {
    pub fn from_config(backend: &BackendConfig, channel: &ChannelConfig, token: &str) -> Self {
        Self {
            url: backend.socket_url.clone(),
            token: token.to_string(),
            initial_backoff: Duration::from_millis(channel.initial_backoff_ms),
            max_backoff: Duration::from_millis(channel.max_backoff_ms),
            max_reconnect_attempts: channel.max_reconnect_attempts,
            ping_timeout: Duration::from_secs(channel.ping_timeout_secs),
        }
    }

    /// WebSocket endpoint of the Socket.IO server
    pub fn endpoint(&self) -> String {
        let base = self.url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/socket.io/?EIO=4&transport=websocket", base)
    }
}

/// Delay before reconnect attempt `attempt` (1-based)
pub fn backoff_delay(initial: Duration, max: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    initial.saturating_mul(1u32 << shift).min(max)
}

/// Push channel backed by a Socket.IO server
pub struct SocketIoChannel {
    registry: HandlerRegistry,
    outbound: mpsc::UnboundedSender<SocketPacket>,
    status: watch::Receiver<ConnectionStatus>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SocketIoChannel {
    /// Open a channel. Without a credential no channel is opened and `None`
    /// is returned. Must be called from within a tokio runtime.
    pub fn open(
        backend: &BackendConfig,
        channel: &ChannelConfig,
        token: Option<&str>,
    ) -> Option<Self> {
        let token = token.filter(|t| !t.trim().is_empty())?;
        Some(Self::connect(SocketIoOptions::from_config(
            backend, channel, token,
        )))
    }

    /// Spawn the connection task
    pub fn connect(options: SocketIoOptions) -> Self {
        let registry = HandlerRegistry::new();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionStatus::Disconnected);
        let cancel = CancellationToken::new();

        info!("Opening push channel to {}", options.endpoint());

        let task = tokio::spawn(run_connection(
            options,
            registry.clone(),
            outbound_rx,
            status_tx,
            cancel.clone(),
        ));

        Self {
            registry,
            outbound,
            status,
            cancel,
            task,
        }
    }

    /// Stop the connection task
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            info!("Closing push channel");
            self.cancel.cancel();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SocketIoChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl PushChannel for SocketIoChannel {
    fn subscribe(&self, topic: &str, handler: EventHandler) -> SubscriptionId {
        self.registry.add(topic, handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.registry.remove(id);
    }

    fn emit(&self, topic: &str, payload: Option<Value>) -> Result<()> {
        if !self.status().is_connected() {
            debug!("Queueing '{}' until the channel is connected", topic);
        }
        self.outbound
            .send(SocketPacket::event(topic, payload))
            .map_err(|_| Error::Channel("push channel is closed".to_string()))
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }
}

/// How a connected session ended
enum SessionEnd {
    Cancelled,
    Dropped { was_connected: bool },
}

async fn run_connection(
    options: SocketIoOptions,
    registry: HandlerRegistry,
    mut outbound: mpsc::UnboundedReceiver<SocketPacket>,
    status: watch::Sender<ConnectionStatus>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        status.send_replace(if attempt == 0 {
            ConnectionStatus::Connecting
        } else {
            ConnectionStatus::Reconnecting { attempt }
        });

        match run_session(&options, &registry, &mut outbound, &status, &cancel).await {
            Ok(SessionEnd::Cancelled) => break,
            Ok(SessionEnd::Dropped { was_connected }) => {
                warn!("Push channel connection dropped");
                if was_connected {
                    attempt = 0;
                }
            }
            Err(Error::Auth(message)) => {
                error!("Push channel rejected credentials: {}", message);
                break;
            }
            Err(e) => {
                warn!("Push channel connection failed: {}", e);
            }
        }

        attempt += 1;
        if options.max_reconnect_attempts > 0 && attempt > options.max_reconnect_attempts {
            error!(
                "Giving up on push channel after {} attempts",
                options.max_reconnect_attempts
            );
            break;
        }

        let delay = backoff_delay(options.initial_backoff, options.max_backoff, attempt);
        status.send_replace(ConnectionStatus::Reconnecting { attempt });
        debug!("Reconnecting in {:?} (attempt {})", delay, attempt);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    status.send_replace(ConnectionStatus::Closed);
    debug!("Push channel task finished");
}

async fn run_session(
    options: &SocketIoOptions,
    registry: &HandlerRegistry,
    outbound: &mut mpsc::UnboundedReceiver<SocketPacket>,
    status: &watch::Sender<ConnectionStatus>,
    cancel: &CancellationToken,
) -> Result<SessionEnd> {
    let connect = tokio::time::timeout(options.ping_timeout, connect_async(options.endpoint()));
    let (ws, _) = tokio::select! {
        _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
        result = connect => result
            .map_err(|_| Error::Channel("connect timed out".to_string()))?
            .map_err(|e| Error::Channel(format!("WebSocket connect failed: {}", e)))?,
    };
    let (mut sink, mut stream) = ws.split();

    let mut idle_timeout = options.ping_timeout;
    let mut connected = false;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = send_packet(&mut sink, &EnginePacket::Message(SocketPacket::Disconnect {
                    namespace: super::packet::DEFAULT_NAMESPACE.to_string(),
                })).await;
                let _ = sink.close().await;
                return Ok(SessionEnd::Cancelled);
            }
            Some(packet) = outbound.recv(), if connected => {
                send_packet(&mut sink, &EnginePacket::Message(packet)).await?;
                continue;
            }
            frame = tokio::time::timeout(idle_timeout, stream.next()) => frame,
        };

        let text = match frame {
            Err(_) => {
                warn!("No traffic for {:?}, treating connection as dead", idle_timeout);
                return Ok(SessionEnd::Dropped { was_connected: connected });
            }
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => {
                return Ok(SessionEnd::Dropped { was_connected: connected });
            }
            Ok(Some(Err(e))) => {
                warn!("WebSocket read error: {}", e);
                return Ok(SessionEnd::Dropped { was_connected: connected });
            }
            Ok(Some(Ok(Message::Text(text)))) => text,
            Ok(Some(Ok(_))) => continue,
        };

        let packet = match EnginePacket::decode(&text) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Ignoring undecodable frame: {}", e);
                continue;
            }
        };

        match packet {
            EnginePacket::Open(info) => {
                debug!("Engine.IO session {} opened", info.sid);
                idle_timeout = Duration::from_millis(info.ping_interval + info.ping_timeout);
                let auth = serde_json::json!({ "token": options.token });
                send_packet(&mut sink, &EnginePacket::Message(SocketPacket::connect(Some(auth))))
                    .await?;
            }
            EnginePacket::Ping => send_packet(&mut sink, &EnginePacket::Pong).await?,
            EnginePacket::Close => return Ok(SessionEnd::Dropped { was_connected: connected }),
            EnginePacket::Message(SocketPacket::Connect { .. }) => {
                connected = true;
                status.send_replace(ConnectionStatus::Connected);
                info!("Push channel connected");
            }
            EnginePacket::Message(SocketPacket::ConnectError { data, .. }) => {
                let message = data
                    .as_ref()
                    .and_then(|d| d.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("connection refused")
                    .to_string();
                return Err(Error::Auth(message));
            }
            EnginePacket::Message(SocketPacket::Disconnect { .. }) => {
                info!("Server disconnected the namespace");
                return Ok(SessionEnd::Dropped { was_connected: connected });
            }
            EnginePacket::Message(SocketPacket::Event { name, args, .. }) => {
                let payload = args.into_iter().next().unwrap_or(Value::Null);
                if registry.dispatch(&name, &payload) == 0 {
                    debug!("No subscriber for '{}'", name);
                }
            }
            EnginePacket::Message(SocketPacket::Ack { id, .. }) => {
                debug!("Ignoring ack {}", id);
            }
            EnginePacket::Pong | EnginePacket::Upgrade | EnginePacket::Noop => {}
        }
    }
}

async fn send_packet<S>(sink: &mut S, packet: &EnginePacket) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    sink.send(Message::Text(packet.encode()))
        .await
        .map_err(|e| Error::Channel(format!("WebSocket send failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use maildcn_common::Config;
    use std::sync::Arc;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{accept_async, WebSocketStream};

    type ServerSocket = WebSocketStream<TcpStream>;

    const OPEN: &str = r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#;

    fn options(url: &str) -> SocketIoOptions {
        let config = Config::default();
        let mut options = SocketIoOptions::from_config(&config.backend, &config.channel, "tok");
        options.url = url.to_string();
        options
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(
            options("ws://localhost:5000").endpoint(),
            "ws://localhost:5000/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            options("http://localhost:5000/").endpoint(),
            "ws://localhost:5000/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            options("https://mail.example.com").endpoint(),
            "wss://mail.example.com/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let initial = Duration::from_millis(500);
        let max = Duration::from_secs(5);
        assert_eq!(backoff_delay(initial, max, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(initial, max, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(initial, max, 4), Duration::from_millis(4000));
        assert_eq!(backoff_delay(initial, max, 5), max);
        assert_eq!(backoff_delay(initial, max, 40), max);
    }

    #[tokio::test]
    async fn test_no_token_opens_no_channel() {
        let config = Config::default();
        assert!(SocketIoChannel::open(&config.backend, &config.channel, None).is_none());
        assert!(SocketIoChannel::open(&config.backend, &config.channel, Some("  ")).is_none());
    }

    #[tokio::test]
    async fn test_unreachable_server_gives_up() {
        let mut options = options("ws://127.0.0.1:9");
        options.initial_backoff = Duration::from_millis(1);
        options.max_backoff = Duration::from_millis(2);
        options.max_reconnect_attempts = 2;
        options.ping_timeout = Duration::from_secs(2);

        let channel = SocketIoChannel::connect(options);
        let mut status = channel.status_watch();
        tokio::time::timeout(Duration::from_secs(10), async {
            while *status.borrow_and_update() != ConnectionStatus::Closed {
                if status.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(channel.status(), ConnectionStatus::Closed);
    }

    async fn next_text(ws: &mut ServerSocket) -> String {
        let read = async {
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => return text,
                    Some(Ok(_)) => continue,
                    other => panic!("client went away: {:?}", other),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(10), read)
            .await
            .expect("no frame from client")
    }

    /// Accept one client and run the Engine.IO and namespace handshake
    async fn accept_session(listener: &TcpListener) -> ServerSocket {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::Text(OPEN.to_string())).await.unwrap();
        assert_eq!(next_text(&mut ws).await, r#"40{"token":"tok"}"#);
        ws.send(Message::Text(r#"40{"sid":"ns"}"#.to_string()))
            .await
            .unwrap();
        ws
    }

    async fn wait_status(rx: &mut watch::Receiver<ConnectionStatus>, want: ConnectionStatus) {
        tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| *s == want))
            .await
            .expect("status never reached")
            .unwrap();
    }

    #[tokio::test]
    async fn test_session_with_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut options = options(&format!("ws://{}", listener.local_addr().unwrap()));
        options.initial_backoff = Duration::from_millis(10);
        options.max_backoff = Duration::from_millis(20);

        let channel = SocketIoChannel::connect(options);
        let mut status = channel.status_watch();
        let (tx, mut received) = mpsc::unbounded_channel();
        let handler: EventHandler = Arc::new(move |payload: &Value| {
            let _ = tx.send(payload.clone());
        });
        channel.subscribe("dcn_process", handler);

        // queued until the namespace is joined
        channel.emit("request_dcn_demo", None).unwrap();

        let mut ws = accept_session(&listener).await;
        wait_status(&mut status, ConnectionStatus::Connected).await;
        assert_eq!(next_text(&mut ws).await, r#"42["request_dcn_demo"]"#);

        ws.send(Message::Text("2".to_string())).await.unwrap();
        assert_eq!(next_text(&mut ws).await, "3");

        ws.send(Message::Text(
            r#"42["dcn_process",{"protocol":"SMTP","stage":"MAIL_FROM","details":"d"}]"#
                .to_string(),
        ))
        .await
        .unwrap();
        let payload = tokio::time::timeout(Duration::from_secs(10), received.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload["stage"], "MAIL_FROM");

        // a server-side close is followed by a fresh handshake
        ws.close(None).await.unwrap();
        drop(ws);
        wait_status(&mut status, ConnectionStatus::Reconnecting { attempt: 1 }).await;
        let mut ws = accept_session(&listener).await;
        wait_status(&mut status, ConnectionStatus::Connected).await;

        channel.emit("request_dcn_demo", None).unwrap();
        assert_eq!(next_text(&mut ws).await, r#"42["request_dcn_demo"]"#);

        channel.close();
        wait_status(&mut status, ConnectionStatus::Closed).await;
    }
}
