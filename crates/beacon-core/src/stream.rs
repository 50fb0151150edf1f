//! Transient stream events decoded from SSE payloads.
//!
//! These drive real-time UI updates during a streamed turn and are never
//! persisted. The wire format is a tagged union keyed by `type`:
//! `{"type":"token","content":"Hi"}`.

use serde::{Deserialize, Serialize};

use crate::model::ToolCall;

/// One decoded server stream event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// The agent is reasoning; `content` is a progress fragment.
    Thinking {
        /// Thinking text fragment.
        #[serde(default)]
        content: String,
    },

    /// Incremental response content.
    Token {
        /// Response text fragment.
        content: String,
    },

    /// The turn finished; carries turn metadata.
    Complete {
        /// Turn metadata (iterations, handoff, pending tool calls).
        #[serde(flatten)]
        metadata: TurnMetadata,
    },

    /// The server reported a stream-level failure.
    Error {
        /// Error description.
        #[serde(default)]
        message: String,
    },
}

impl StreamEvent {
    /// Whether this event terminates the stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}

/// Metadata attached to a `complete` stream event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnMetadata {
    /// Backend agent-loop iterations for this turn.
    #[serde(default)]
    pub iterations: u32,
    /// Whether the backend requested a human handoff.
    #[serde(default)]
    pub handoff_requested: bool,
    /// Tool calls the backend wants executed before the turn settles.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Session the turn belongs to, when the server echoes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
