//! Socket event types.

use beacon_core::{AgentError, ConnectionStatus};
use serde_json::Value;

/// One received frame payload.
///
/// Frames are opportunistically JSON-decoded; anything that fails to parse
/// is forwarded as raw text unchanged.
#[derive(Clone, Debug, PartialEq)]
pub enum SocketMessage {
    /// A frame that parsed as JSON.
    Json(Value),
    /// A frame that did not; the raw payload.
    Text(String),
}

impl SocketMessage {
    /// Decode a frame payload.
    #[must_use]
    pub fn decode(text: &str) -> Self {
        serde_json::from_str::<Value>(text)
            .map_or_else(|_| Self::Text(text.to_owned()), Self::Json)
    }
}

/// Events emitted over the socket's broadcast channel.
#[derive(Clone, Debug)]
pub enum SocketEvent {
    /// Handshake completed.
    Open,
    /// The connection closed (either side).
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
    /// A received frame.
    Message(SocketMessage),
    /// A connection or send failure.
    Error(AgentError),
    /// A reconnect has been scheduled.
    Reconnecting {
        /// 1-based reconnect attempt.
        attempt: u32,
        /// Delay before the attempt, in ms.
        delay_ms: u64,
    },
    /// The connection status changed.
    StatusChange(ConnectionStatus),
}
