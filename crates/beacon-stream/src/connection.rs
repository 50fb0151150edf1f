//! Streaming connection management.
//!
//! Opens an SSE request against the agent backend, feeds the byte chunks
//! through the [`SseDecoder`], and dispatches decoded [`StreamEvent`]s to a
//! caller-supplied [`StreamSink`]. The whole read runs on one spawned task;
//! [`StreamHandle::disconnect`] cancels it cooperatively and suppresses any
//! further sink callbacks.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::constants::DEFAULT_STREAM_TIMEOUT_MS;
use beacon_core::{AgentError, ErrorCode, StreamEvent};
use serde_json::Value;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::decoder::{SseDecoder, SseFrame, parse_stream_event};

// ─────────────────────────────────────────────────────────────────────────────
// Sink
// ─────────────────────────────────────────────────────────────────────────────

/// Receiver of decoded stream events.
///
/// Callbacks fire on the stream task, strictly in arrival order. After
/// [`StreamHandle::disconnect`] no callback fires. `on_complete` fires at
/// most once per connection.
pub trait StreamSink: Send + Sync + 'static {
    /// One decoded event.
    fn on_event(&self, event: StreamEvent);
    /// A failure that ended the stream.
    fn on_error(&self, error: AgentError);
    /// The stream finished (`[DONE]`, a `complete` event, or end of body).
    fn on_complete(&self);
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Streaming connection configuration.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// API key sent as `X-API-Key`.
    pub api_key: String,
    /// Optional bearer token.
    pub auth_token: Option<String>,
    /// Total window for the whole stream read, in ms.
    pub stream_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            auth_token: None,
            stream_timeout_ms: DEFAULT_STREAM_TIMEOUT_MS,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoder client
// ─────────────────────────────────────────────────────────────────────────────

/// Opens and drives SSE streaming sessions.
#[derive(Clone, Debug)]
pub struct StreamDecoder {
    http: reqwest::Client,
    config: StreamConfig,
}

impl StreamDecoder {
    /// Build a streaming client.
    pub fn new(config: StreamConfig) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder().build().map_err(|e| {
            AgentError::new(ErrorCode::Initialization, "failed to build HTTP client")
                .with_source(e)
        })?;
        Ok(Self { http, config })
    }

    /// Open a streaming POST against `endpoint` and feed `sink` until the
    /// stream ends or the returned handle is disconnected.
    ///
    /// `stream: true` is forced into the JSON body so the backend answers
    /// incrementally.
    #[must_use]
    pub fn connect(&self, endpoint: Url, body: Value, sink: Arc<dyn StreamSink>) -> StreamHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_stream(
            self.http.clone(),
            self.config.clone(),
            endpoint,
            body,
            sink,
            cancel.clone(),
        ));
        StreamHandle { cancel, task }
    }
}

/// Handle to one in-flight streaming session.
#[derive(Debug)]
#[must_use = "dropping the handle leaves the stream running; call disconnect() to stop it"]
pub struct StreamHandle {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl StreamHandle {
    /// Abort the read. Not an error; no sink callback fires afterwards.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    /// Whether the stream task has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the stream task to wind down. Does not cancel the read;
    /// callers that want to stop early call [`StreamHandle::disconnect`]
    /// first.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream task
// ─────────────────────────────────────────────────────────────────────────────

async fn run_stream(
    http: reqwest::Client,
    config: StreamConfig,
    endpoint: Url,
    mut body: Value,
    sink: Arc<dyn StreamSink>,
    cancel: CancellationToken,
) {
    if let Some(map) = body.as_object_mut() {
        let _ = map.insert("stream".to_owned(), Value::Bool(true));
    }

    let mut request = http
        .post(endpoint)
        .header("Accept", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .header("X-API-Key", &config.api_key)
        .timeout(Duration::from_millis(config.stream_timeout_ms))
        .json(&body);
    if let Some(token) = &config.auth_token {
        request = request.header("Authorization", format!("Bearer {token}"));
    }

    let response = tokio::select! {
        () = cancel.cancelled() => return,
        result = request.send() => match result {
            Ok(response) => response,
            Err(e) => {
                let error = if e.is_timeout() {
                    AgentError::timeout("stream timed out").with_source(e)
                } else {
                    AgentError::network("failed to open stream").with_source(e)
                };
                dispatch_error(&sink, &cancel, error);
                return;
            }
        },
    };

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        dispatch_error(&sink, &cancel, AgentError::from_status(status.as_u16(), message));
        return;
    }

    let mut chunks = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    loop {
        let chunk = tokio::select! {
            () = cancel.cancelled() => return,
            chunk = chunks.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                for frame in decoder.push(&bytes) {
                    if dispatch_frame(&sink, &cancel, frame) {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                debug!(error = %e, "stream read failed");
                dispatch_error(
                    &sink,
                    &cancel,
                    AgentError::network("stream read failed").with_source(e),
                );
                return;
            }
            None => {
                // Body ended without [DONE]; a dangling partial line still
                // counts, and the stream completes regardless.
                if let Some(frame) = decoder.finish() {
                    if dispatch_frame(&sink, &cancel, frame) {
                        return;
                    }
                }
                if !cancel.is_cancelled() {
                    sink.on_complete();
                }
                return;
            }
        }
    }
}

/// Dispatch one frame. Returns `true` when the stream should stop.
fn dispatch_frame(sink: &Arc<dyn StreamSink>, cancel: &CancellationToken, frame: SseFrame) -> bool {
    if cancel.is_cancelled() {
        return true;
    }
    match frame {
        SseFrame::Done => {
            sink.on_complete();
            true
        }
        SseFrame::Data(data) => {
            let Some(event) = parse_stream_event(&data) else {
                return false;
            };
            let terminal = event.is_terminal();
            match &event {
                StreamEvent::Error { message } => {
                    let error = AgentError::network(message.clone());
                    sink.on_event(event.clone());
                    sink.on_error(error);
                }
                StreamEvent::Complete { .. } => {
                    sink.on_event(event.clone());
                    sink.on_complete();
                }
                StreamEvent::Thinking { .. } | StreamEvent::Token { .. } => {
                    sink.on_event(event.clone());
                }
            }
            terminal
        }
    }
}

fn dispatch_error(sink: &Arc<dyn StreamSink>, cancel: &CancellationToken, error: AgentError) {
    if !cancel.is_cancelled() {
        sink.on_error(error);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
