//! The reconnecting realtime socket.
//!
//! One spawned supervisor task owns the WebSocket for the socket's whole
//! lifetime: it connects, drives the frame/command/ping loop, and decides
//! whether a lost connection is retried. Public methods talk to the task
//! over an mpsc command channel; received frames and lifecycle changes fan
//! out over a broadcast channel.

use std::time::Duration;

use beacon_core::constants::{DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_PING_INTERVAL_MS};
use beacon_core::{
    AgentError, ConnectionStatus, ErrorCode, RetryConfig, calculate_backoff_delay_with_random,
};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};
use url::Url;

use crate::event::{SocketEvent, SocketMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reconnect delays wander ±10% around the exponential curve so a fleet of
/// clients does not reconnect in lockstep.
const RECONNECT_JITTER: f64 = 0.1;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Realtime socket configuration.
#[derive(Clone, Debug)]
pub struct SocketConfig {
    /// WebSocket endpoint (`ws://` / `wss://`).
    pub url: String,
    /// API key appended as the `apiKey` query parameter.
    pub api_key: String,
    /// Optional auth token appended as the `token` query parameter.
    pub auth_token: Option<String>,
    /// Whether lost connections are retried.
    pub auto_reconnect: bool,
    /// Reconnect attempt ceiling.
    pub max_reconnect_attempts: u32,
    /// Liveness ping interval in ms.
    pub ping_interval_ms: u64,
    /// Backoff shape shared with the HTTP transport.
    pub retry: RetryConfig,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            url: "wss://realtime.beacon.dev".to_owned(),
            api_key: String::new(),
            auth_token: None,
            auto_reconnect: true,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
            retry: RetryConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Socket
// ─────────────────────────────────────────────────────────────────────────────

enum Command {
    Send(Value),
    Close { code: u16, reason: String },
    Refresh,
}

struct Shared {
    config: parking_lot::RwLock<SocketConfig>,
    status_tx: watch::Sender<ConnectionStatus>,
    events_tx: broadcast::Sender<SocketEvent>,
}

impl Shared {
    fn emit(&self, event: SocketEvent) {
        let _ = self.events_tx.send(event);
    }

    fn set_status(&self, status: ConnectionStatus) {
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            self.emit(SocketEvent::StatusChange(status));
        }
    }
}

/// Auto-reconnecting realtime WebSocket.
pub struct RealtimeSocket {
    shared: std::sync::Arc<Shared>,
    cmd_tx: parking_lot::RwLock<Option<mpsc::Sender<Command>>>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeSocket {
    /// Create a socket; no connection is opened until [`connect`].
    ///
    /// [`connect`]: RealtimeSocket::connect
    #[must_use]
    pub fn new(config: SocketConfig) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let (events_tx, _) = broadcast::channel(256);
        Self {
            shared: std::sync::Arc::new(Shared {
                config: parking_lot::RwLock::new(config),
                status_tx,
                events_tx,
            }),
            cmd_tx: parking_lot::RwLock::new(None),
            task: parking_lot::Mutex::new(None),
        }
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status_tx.borrow()
    }

    /// Watch channel for status changes. The socket is the sole writer.
    #[must_use]
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Subscribe to socket events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Open the connection and start the supervisor task.
    ///
    /// Fails with a `SESSION` error if the socket is already running.
    pub fn connect(&self) -> Result<(), AgentError> {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(AgentError::new(ErrorCode::Session, "socket is already connected"));
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        self.shared.set_status(ConnectionStatus::Connecting);
        *self.cmd_tx.write() = Some(cmd_tx);
        *task = Some(tokio::spawn(run_socket(self.shared.clone(), cmd_rx)));
        Ok(())
    }

    /// Close the connection. Caller-initiated: never retried.
    pub async fn disconnect(&self, code: u16, reason: &str) {
        let cmd_tx = self.cmd_tx.write().take();
        if let Some(tx) = cmd_tx {
            let _ = tx
                .send(Command::Close {
                    code,
                    reason: reason.to_owned(),
                })
                .await;
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.shared.set_status(ConnectionStatus::Disconnected);
    }

    /// Send a JSON payload as one text frame.
    pub async fn send(&self, payload: Value) -> Result<(), AgentError> {
        let cmd_tx = self
            .cmd_tx
            .read()
            .clone()
            .ok_or_else(|| AgentError::network("socket is not connected"))?;
        cmd_tx
            .send(Command::Send(payload))
            .await
            .map_err(|_| AgentError::network("socket is not connected"))
    }

    /// Replace the auth token. If the socket is running this forces a
    /// disconnect/reconnect cycle so the new credential takes effect on the
    /// next handshake.
    pub async fn set_auth_token(&self, token: Option<String>) {
        self.shared.config.write().auth_token = token;
        let cmd_tx = self.cmd_tx.read().clone();
        if let Some(tx) = cmd_tx {
            let _ = tx.send(Command::Refresh).await;
        }
    }
}

impl std::fmt::Debug for RealtimeSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeSocket")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Supervisor task
// ─────────────────────────────────────────────────────────────────────────────

enum SessionEnd {
    CallerClose,
    Refresh,
    Lost,
}

fn handshake_url(config: &SocketConfig) -> Result<Url, AgentError> {
    let mut url = Url::parse(&config.url).map_err(|e| {
        AgentError::new(ErrorCode::InvalidConfig, format!("invalid socket URL: {e}"))
    })?;
    {
        let mut query = url.query_pairs_mut();
        let _ = query.append_pair("apiKey", &config.api_key);
        if let Some(token) = &config.auth_token {
            let _ = query.append_pair("token", token);
        }
    }
    Ok(url)
}

async fn run_socket(shared: std::sync::Arc<Shared>, mut cmd_rx: mpsc::Receiver<Command>) {
    let mut attempt: u32 = 0;

    loop {
        let config = shared.config.read().clone();
        let url = match handshake_url(&config) {
            Ok(url) => url,
            Err(e) => {
                shared.emit(SocketEvent::Error(e));
                shared.set_status(ConnectionStatus::Error);
                return;
            }
        };

        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                // Counter resets on every successful open.
                attempt = 0;
                metrics::counter!("socket_connects_total").increment(1);
                shared.set_status(ConnectionStatus::Connected);
                shared.emit(SocketEvent::Open);

                match drive_session(ws, &shared, &mut cmd_rx, config.ping_interval_ms).await {
                    SessionEnd::CallerClose => {
                        shared.set_status(ConnectionStatus::Disconnected);
                        return;
                    }
                    SessionEnd::Refresh => {
                        shared.set_status(ConnectionStatus::Reconnecting);
                        continue;
                    }
                    SessionEnd::Lost => {
                        if !config.auto_reconnect {
                            shared.set_status(ConnectionStatus::Disconnected);
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "socket connect failed");
                shared.emit(SocketEvent::Error(
                    AgentError::network("socket connect failed").with_source(e),
                ));
                if !config.auto_reconnect {
                    shared.set_status(ConnectionStatus::Error);
                    return;
                }
            }
        }

        attempt += 1;
        if attempt > config.max_reconnect_attempts {
            shared.emit(SocketEvent::Error(AgentError::network(format!(
                "gave up after {} reconnect attempts",
                config.max_reconnect_attempts
            ))));
            shared.set_status(ConnectionStatus::Error);
            return;
        }

        let delay_ms = calculate_backoff_delay_with_random(
            attempt,
            config.retry.base_delay_ms,
            config.retry.max_delay_ms,
            RECONNECT_JITTER,
            rand::random::<f64>(),
        );
        metrics::counter!("socket_reconnects_total").increment(1);
        shared.set_status(ConnectionStatus::Reconnecting);
        shared.emit(SocketEvent::Reconnecting { attempt, delay_ms });
        warn!(attempt, delay_ms, "socket reconnecting");

        let sleep = tokio::time::sleep(Duration::from_millis(delay_ms));
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Close { code, reason }) => {
                        shared.emit(SocketEvent::Close { code, reason });
                        shared.set_status(ConnectionStatus::Disconnected);
                        return;
                    }
                    None => {
                        shared.set_status(ConnectionStatus::Disconnected);
                        return;
                    }
                    // Token already updated; reconnect immediately.
                    Some(Command::Refresh) => break,
                    Some(Command::Send(_)) => {
                        warn!("dropping send while socket is reconnecting");
                    }
                },
            }
        }
    }
}

async fn drive_session(
    ws: WsStream,
    shared: &Shared,
    cmd_rx: &mut mpsc::Receiver<Command>,
    ping_interval_ms: u64,
) -> SessionEnd {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let period = Duration::from_millis(ping_interval_ms);
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                // Handle dropped: treat like a caller close.
                None => return SessionEnd::CallerClose,
                Some(Command::Send(payload)) => {
                    if let Err(e) = ws_tx.send(Message::text(payload.to_string())).await {
                        shared.emit(SocketEvent::Error(
                            AgentError::network("socket send failed").with_source(e),
                        ));
                        return SessionEnd::Lost;
                    }
                }
                Some(Command::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    shared.emit(SocketEvent::Close { code, reason });
                    return SessionEnd::CallerClose;
                }
                Some(Command::Refresh) => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return SessionEnd::Refresh;
                }
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    shared.emit(SocketEvent::Message(SocketMessage::decode(text.as_str())));
                }
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => shared.emit(SocketEvent::Message(SocketMessage::decode(text))),
                    Err(_) => warn!("dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame.map_or_else(
                        || (1000, String::new()),
                        |f| (u16::from(f.code), f.reason.to_string()),
                    );
                    shared.emit(SocketEvent::Close { code, reason });
                    return SessionEnd::Lost;
                }
                Some(Ok(_)) => {} // ping/pong handled by the protocol layer
                Some(Err(e)) => {
                    shared.emit(SocketEvent::Error(
                        AgentError::network("socket read failed").with_source(e),
                    ));
                    return SessionEnd::Lost;
                }
                None => {
                    shared.emit(SocketEvent::Close {
                        code: 1006,
                        reason: "connection lost".to_owned(),
                    });
                    return SessionEnd::Lost;
                }
            },
            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(bytes::Bytes::new())).await.is_err() {
                    return SessionEnd::Lost;
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
