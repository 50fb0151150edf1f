//! The closed event vocabulary published on the bus.

use serde::{Deserialize, Serialize};

use beacon_core::{AgentError, ConnectionStatus, Message, SessionId, ToolCall, ToolResult, VoiceState};

/// Every event the SDK can publish.
///
/// A closed tagged union rather than string-keyed handler sets: subscribers
/// match on variants and the compiler checks exhaustiveness.
#[derive(Clone, Debug)]
pub enum AgentEvent {
    /// A user message left the orchestrator.
    MessageSent(Message),
    /// A finished assistant message was published.
    MessageReceived(Message),
    /// A turn started; the agent is "typing".
    TypingStart {
        /// Session the turn belongs to.
        session_id: SessionId,
    },
    /// The turn exited (success or failure).
    TypingEnd {
        /// Session the turn belongs to.
        session_id: SessionId,
    },
    /// The backend requested a tool execution.
    ToolCallRequested(ToolCall),
    /// A tool execution settled (success or captured failure).
    ToolCallCompleted(ToolResult),
    /// A connection-owning component changed status.
    ConnectionStatus(ConnectionStatus),
    /// The voice session changed state.
    VoiceState(VoiceState),
    /// Normalized microphone level in `0.0..=1.0`.
    VoiceLevel {
        /// Normalized level.
        level: f32,
    },
    /// A session became current.
    SessionStarted {
        /// The session.
        session_id: SessionId,
    },
    /// A session was closed.
    SessionEnded {
        /// The session.
        session_id: SessionId,
    },
    /// A failure was surfaced past the core boundary.
    Error(AgentError),
}

impl AgentEvent {
    /// Discriminant for subscription routing.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::MessageSent(_) => EventKind::MessageSent,
            Self::MessageReceived(_) => EventKind::MessageReceived,
            Self::TypingStart { .. } => EventKind::TypingStart,
            Self::TypingEnd { .. } => EventKind::TypingEnd,
            Self::ToolCallRequested(_) => EventKind::ToolCallRequested,
            Self::ToolCallCompleted(_) => EventKind::ToolCallCompleted,
            Self::ConnectionStatus(_) => EventKind::ConnectionStatus,
            Self::VoiceState(_) => EventKind::VoiceState,
            Self::VoiceLevel { .. } => EventKind::VoiceLevel,
            Self::SessionStarted { .. } => EventKind::SessionStarted,
            Self::SessionEnded { .. } => EventKind::SessionEnded,
            Self::Error(_) => EventKind::Error,
        }
    }
}

/// Event kind discriminant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// [`AgentEvent::MessageSent`]
    MessageSent,
    /// [`AgentEvent::MessageReceived`]
    MessageReceived,
    /// [`AgentEvent::TypingStart`]
    TypingStart,
    /// [`AgentEvent::TypingEnd`]
    TypingEnd,
    /// [`AgentEvent::ToolCallRequested`]
    ToolCallRequested,
    /// [`AgentEvent::ToolCallCompleted`]
    ToolCallCompleted,
    /// [`AgentEvent::ConnectionStatus`]
    ConnectionStatus,
    /// [`AgentEvent::VoiceState`]
    VoiceState,
    /// [`AgentEvent::VoiceLevel`]
    VoiceLevel,
    /// [`AgentEvent::SessionStarted`]
    SessionStarted,
    /// [`AgentEvent::SessionEnded`]
    SessionEnded,
    /// [`AgentEvent::Error`]
    Error,
}
