//! The chat turn orchestrator.
//!
//! One orchestrator owns the current session id and runs at most one turn
//! at a time. A turn walks `idle → sending → {streaming → finalizing} |
//! {awaiting sync response} → idle`; any failure drops it into the error
//! path, which normalizes to one [`AgentError`], publishes it once on the
//! bus, and hands it to the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use beacon_core::{AgentError, Message, SessionId, StreamEvent, TurnMetadata};
use beacon_events::{AgentEvent, EventBus};
use beacon_settings::BeaconSettings;
use beacon_stream::{StreamConfig, StreamDecoder, StreamSink};
use beacon_transport::{Method, RequestOptions, TransportClient, TransportConfig};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::endpoints::AgentEndpoints;
use crate::tools::ToolRegistry;

// ─────────────────────────────────────────────────────────────────────────────
// Options & callbacks
// ─────────────────────────────────────────────────────────────────────────────

/// Incremental response text callback.
pub type TokenCallback = Box<dyn Fn(&str) + Send + Sync>;
/// Reasoning progress callback.
pub type ThinkingCallback = Box<dyn Fn(&str) + Send + Sync>;
/// Turn metadata callback, fired once when the turn settles.
pub type CompleteCallback = Box<dyn Fn(&TurnMetadata) + Send + Sync>;
/// Normalized error callback.
pub type ErrorCallback = Box<dyn Fn(&AgentError) + Send + Sync>;

/// Per-turn callbacks. All optional.
#[derive(Default)]
pub struct ChatCallbacks {
    /// Fired per streamed token, in arrival order.
    pub on_token: Option<TokenCallback>,
    /// Fired per thinking fragment.
    pub on_thinking: Option<ThinkingCallback>,
    /// Fired once with the turn metadata on success.
    pub on_complete: Option<CompleteCallback>,
    /// Fired once with the normalized error on failure.
    pub on_error: Option<ErrorCallback>,
}

/// Options for one [`Orchestrator::chat`] call.
pub struct ChatOptions {
    /// Session to continue; defaults to the last known session, else a
    /// freshly generated one.
    pub session_id: Option<SessionId>,
    /// Streaming (default) or one synchronous request.
    pub stream: bool,
    /// Cooperative cancellation for the turn.
    pub cancel: Option<CancellationToken>,
    /// Per-turn callbacks.
    pub callbacks: ChatCallbacks,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            session_id: None,
            stream: true,
            cancel: None,
            callbacks: ChatCallbacks::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// Drives chat turns against the agent backend.
///
/// Explicitly constructed and DI-friendly; multiple orchestrators with
/// separate sessions can coexist in one process.
pub struct Orchestrator {
    transport: Arc<TransportClient>,
    decoder: StreamDecoder,
    endpoints: AgentEndpoints,
    bus: EventBus,
    tools: Arc<ToolRegistry>,
    current_session: parking_lot::RwLock<Option<SessionId>>,
    turn_active: AtomicBool,
}

impl Orchestrator {
    /// Assemble an orchestrator from its collaborators.
    #[must_use]
    pub fn new(
        transport: Arc<TransportClient>,
        decoder: StreamDecoder,
        assistant_id: impl Into<String>,
        bus: EventBus,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        let endpoints = AgentEndpoints::new(transport.clone(), assistant_id);
        Self {
            transport,
            decoder,
            endpoints,
            bus,
            tools,
            current_session: parking_lot::RwLock::new(None),
            turn_active: AtomicBool::new(false),
        }
    }

    /// Build transport and decoder from loaded settings.
    pub fn from_settings(
        settings: &BeaconSettings,
        assistant_id: impl Into<String>,
        bus: EventBus,
        tools: Arc<ToolRegistry>,
    ) -> Result<Self, AgentError> {
        let transport = Arc::new(TransportClient::new(TransportConfig {
            base_url: settings.api.base_url.clone(),
            api_key: settings.api.api_key.clone(),
            auth_token: settings.api.auth_token.clone(),
            request_timeout_ms: settings.api.request_timeout_ms,
            retry: settings.retry.clone(),
        })?);
        let decoder = StreamDecoder::new(StreamConfig {
            api_key: settings.api.api_key.clone(),
            auth_token: settings.api.auth_token.clone(),
            stream_timeout_ms: settings.api.stream_timeout_ms,
        })?;
        Ok(Self::new(transport, decoder, assistant_id, bus, tools))
    }

    /// The REST endpoint wrappers sharing this orchestrator's transport.
    #[must_use]
    pub fn endpoints(&self) -> &AgentEndpoints {
        &self.endpoints
    }

    /// The tool registry backing tool dispatch.
    #[must_use]
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// The shared transport client.
    #[must_use]
    pub fn transport(&self) -> &Arc<TransportClient> {
        &self.transport
    }

    /// The session the next turn will continue, if any.
    #[must_use]
    pub fn current_session(&self) -> Option<SessionId> {
        self.current_session.read().clone()
    }

    /// Run one chat turn and return the finished assistant message.
    ///
    /// Exactly one `typing_start`/`typing_end` pair is published per call,
    /// on every exit path. The user message is published twice under the
    /// same id: once when it leaves (`Sending`) and again when the turn
    /// settles (`Sent` or `Error`). Failures are normalized to one
    /// [`AgentError`], published once on the bus, passed to `on_error`,
    /// and returned; caller cancellation is returned but never published.
    pub async fn chat(&self, text: &str, options: ChatOptions) -> Result<Message, AgentError> {
        if self
            .turn_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AgentError::session("a chat turn is already in flight"));
        }
        let _turn = TurnGuard {
            active: &self.turn_active,
        };

        let session_id = self.resolve_session(options.session_id);
        let _typing = TypingGuard::start(&self.bus, session_id.clone());

        let mut user_msg = Message::user(text);
        self.bus.publish(&AgentEvent::MessageSent(user_msg.clone()));

        let cancel = options.cancel.clone().unwrap_or_default();
        let result = if options.stream {
            self.run_streaming_turn(text, &session_id, &options.callbacks, &cancel)
                .await
        } else {
            self.run_sync_turn(text, &session_id, &cancel).await
        };

        match result {
            Ok((buffer, metadata)) => {
                user_msg.mark_sent();
                self.bus.publish(&AgentEvent::MessageSent(user_msg));
                let metadata = self.settle_tool_calls(metadata).await;
                let message = build_assistant_message(buffer, &metadata);
                self.bus.publish(&AgentEvent::MessageReceived(message.clone()));
                if let Some(on_complete) = &options.callbacks.on_complete {
                    on_complete(&metadata);
                }
                Ok(message)
            }
            Err(err) => {
                user_msg.mark_failed();
                self.bus.publish(&AgentEvent::MessageSent(user_msg));
                if !err.is_cancelled() {
                    self.bus.publish(&AgentEvent::Error(err.clone()));
                    if let Some(on_error) = &options.callbacks.on_error {
                        on_error(&err);
                    }
                }
                Err(err)
            }
        }
    }

    /// Close the current session server-side and forget it.
    pub async fn end_session(&self) -> Result<(), AgentError> {
        let Some(session_id) = self.current_session.write().take() else {
            return Ok(());
        };
        let _ = self.endpoints.close_session(&session_id).await?;
        self.bus.publish(&AgentEvent::SessionEnded { session_id });
        Ok(())
    }

    // ── turn internals ───────────────────────────────────────────────────

    /// Supplied id, else the last known session, else a fresh one. The
    /// resolved id becomes current regardless of how the turn ends.
    fn resolve_session(&self, given: Option<SessionId>) -> SessionId {
        let mut current = self.current_session.write();
        let session_id = given
            .or_else(|| current.clone())
            .unwrap_or_else(SessionId::new);
        let is_new = current.as_ref() != Some(&session_id);
        *current = Some(session_id.clone());
        drop(current);
        if is_new {
            self.bus.publish(&AgentEvent::SessionStarted {
                session_id: session_id.clone(),
            });
        }
        session_id
    }

    async fn run_streaming_turn(
        &self,
        text: &str,
        session_id: &SessionId,
        callbacks: &ChatCallbacks,
        cancel: &CancellationToken,
    ) -> Result<(String, TurnMetadata), AgentError> {
        let endpoint = self.transport.endpoint("v1/chat")?;
        let body = json!({ "message": text, "sessionId": session_id });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = self
            .decoder
            .connect(endpoint, body, Arc::new(ChannelSink { tx }));

        let mut buffer = String::new();
        let mut metadata = TurnMetadata::default();
        loop {
            let msg = tokio::select! {
                () = cancel.cancelled() => {
                    handle.disconnect();
                    return Err(AgentError::cancelled());
                }
                msg = rx.recv() => msg,
            };
            match msg {
                Some(SinkMsg::Event(StreamEvent::Token { content })) => {
                    buffer.push_str(&content);
                    if let Some(on_token) = &callbacks.on_token {
                        on_token(&content);
                    }
                }
                Some(SinkMsg::Event(StreamEvent::Thinking { content })) => {
                    if let Some(on_thinking) = &callbacks.on_thinking {
                        on_thinking(&content);
                    }
                }
                Some(SinkMsg::Event(StreamEvent::Complete { metadata: m })) => {
                    metadata = m;
                }
                // The decoder surfaces the failure separately.
                Some(SinkMsg::Event(StreamEvent::Error { .. })) => {}
                Some(SinkMsg::Error(err)) => {
                    handle.disconnect();
                    return Err(err);
                }
                Some(SinkMsg::Complete) | None => break,
            }
        }
        Ok((buffer, metadata))
    }

    async fn run_sync_turn(
        &self,
        text: &str,
        session_id: &SessionId,
        cancel: &CancellationToken,
    ) -> Result<(String, TurnMetadata), AgentError> {
        let body = json!({ "message": text, "sessionId": session_id, "stream": false });
        let response: ChatResponseBody = self
            .transport
            .request_with(
                Method::POST,
                "v1/chat",
                Some(&body),
                RequestOptions {
                    timeout_ms: None,
                    cancel: Some(cancel.clone()),
                },
            )
            .await?;
        Ok((response.message, response.metadata))
    }

    /// Dispatch the tool calls the backend attached to `complete`, folding
    /// their results back into the turn metadata. Tool failures settle as
    /// `ToolResult::error`; they never fail the turn.
    async fn settle_tool_calls(&self, metadata: TurnMetadata) -> TurnMetadata {
        for call in &metadata.tool_calls {
            self.bus.publish(&AgentEvent::ToolCallRequested(call.clone()));
            let result = self.tools.dispatch(call).await;
            debug!(tool_name = %call.name, error = ?result.error, "tool call settled");
            self.bus.publish(&AgentEvent::ToolCallCompleted(result));
        }
        metadata
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("current_session", &self.current_session())
            .field("turn_active", &self.turn_active.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Guards & helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Releases the single-turn slot on every exit path.
struct TurnGuard<'a> {
    active: &'a AtomicBool,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Publishes `typing_start` on creation and `typing_end` on drop, so the
/// pair holds on every exit path.
struct TypingGuard {
    bus: EventBus,
    session_id: SessionId,
}

impl TypingGuard {
    fn start(bus: &EventBus, session_id: SessionId) -> Self {
        bus.publish(&AgentEvent::TypingStart {
            session_id: session_id.clone(),
        });
        Self {
            bus: bus.clone(),
            session_id,
        }
    }
}

impl Drop for TypingGuard {
    fn drop(&mut self) {
        self.bus.publish(&AgentEvent::TypingEnd {
            session_id: self.session_id.clone(),
        });
    }
}

enum SinkMsg {
    Event(StreamEvent),
    Error(AgentError),
    Complete,
}

/// Forwards sink callbacks onto the turn's channel.
struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkMsg>,
}

impl StreamSink for ChannelSink {
    fn on_event(&self, event: StreamEvent) {
        let _ = self.tx.send(SinkMsg::Event(event));
    }

    fn on_error(&self, error: AgentError) {
        let _ = self.tx.send(SinkMsg::Error(error));
    }

    fn on_complete(&self) {
        let _ = self.tx.send(SinkMsg::Complete);
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatResponseBody {
    #[serde(default)]
    message: String,
    #[serde(flatten)]
    metadata: TurnMetadata,
}

fn build_assistant_message(content: String, metadata: &TurnMetadata) -> Message {
    let mut message = Message::assistant(content);
    let _ = message
        .metadata
        .insert("iterations".to_owned(), json!(metadata.iterations));
    let _ = message.metadata.insert(
        "handoffRequested".to_owned(),
        json!(metadata.handoff_requested),
    );
    if !metadata.tool_calls.is_empty() {
        let _ = message
            .metadata
            .insert("toolCalls".to_owned(), json!(metadata.tool_calls));
    }
    message
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
