//! Conversation data model.
//!
//! `Message` and `Session` are the persistent shapes owned by the
//! orchestrator; `ToolCall`/`ToolResult` cross the tool boundary;
//! `ConnectionStatus` and `VoiceState` are the two shared status machines.
//! Wire format is camelCase to match the backend envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{MessageId, SessionId, ToolCallId};

// ─────────────────────────────────────────────────────────────────────────────
// Message
// ─────────────────────────────────────────────────────────────────────────────

/// Author of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End user.
    User,
    /// The agent.
    Assistant,
    /// System-injected content.
    System,
}

/// Delivery lifecycle of a message.
///
/// A message is immutable once `Delivered`; the only legal mutation before
/// that is the `Sending → Sent/Error` transition performed by the
/// orchestrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Accepted locally, not yet acknowledged by the backend.
    Sending,
    /// Acknowledged by the backend.
    Sent,
    /// Confirmed part of the conversation history.
    Delivered,
    /// Send failed.
    Error,
}

/// One message in a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message ID.
    pub id: MessageId,
    /// Author role.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Delivery lifecycle state.
    pub delivery_status: DeliveryStatus,
    /// Free-form metadata (turn iterations, handoff flag, tool results).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Message {
    /// Create a user message in the `Sending` state.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
            delivery_status: DeliveryStatus::Sending,
            metadata: Map::new(),
        }
    }

    /// Create an assistant message in the `Delivered` state.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Assistant,
            content: content.into(),
            created_at: Utc::now(),
            delivery_status: DeliveryStatus::Delivered,
            metadata: Map::new(),
        }
    }

    /// Transition `Sending → Sent`. No-op in any other state.
    pub fn mark_sent(&mut self) {
        if self.delivery_status == DeliveryStatus::Sending {
            self.delivery_status = DeliveryStatus::Sent;
        }
    }

    /// Transition `Sending → Error`. No-op in any other state.
    pub fn mark_failed(&mut self) {
        if self.delivery_status == DeliveryStatus::Sending {
            self.delivery_status = DeliveryStatus::Error;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Accepting turns.
    Active,
    /// Explicitly closed.
    Completed,
    /// Timed out by backend policy.
    Abandoned,
}

/// A server-tracked conversation spanning multiple turns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session ID (continuity token).
    pub id: SessionId,
    /// Assistant this session talks to.
    pub assistant_id: String,
    /// Optional end-user identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_user_id: Option<String>,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// When the session ended, if it has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Number of messages exchanged.
    #[serde(default)]
    pub message_count: u64,
    /// Whether a human handoff was requested.
    #[serde(default)]
    pub handoff_requested: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool call / result
// ─────────────────────────────────────────────────────────────────────────────

/// A backend-initiated request to execute a client-registered function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Unique call ID.
    pub id: ToolCallId,
    /// Tool name to look up in the registry.
    pub name: String,
    /// Arguments (JSON object).
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// When the backend requested the call.
    pub requested_at: DateTime<Utc>,
}

/// Outcome of executing (or failing to execute) a tool call.
///
/// A missing tool or a failing handler is expressed here as `error`, never
/// as a thrown error: the turn still completes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// ID of the call this result answers.
    pub call_id: ToolCallId,
    /// Tool name.
    pub name: String,
    /// Handler output on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure description on error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock execution time in milliseconds (0 for a registry miss).
    pub duration_ms: u64,
}

impl ToolResult {
    /// Successful result with measured duration.
    #[must_use]
    pub fn ok(call_id: ToolCallId, name: impl Into<String>, result: Value, duration_ms: u64) -> Self {
        Self {
            call_id,
            name: name.into(),
            result: Some(result),
            error: None,
            duration_ms,
        }
    }

    /// Failed result.
    #[must_use]
    pub fn failed(
        call_id: ToolCallId,
        name: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            call_id,
            name: name.into(),
            result: None,
            error: Some(error.into()),
            duration_ms,
        }
    }

    /// Whether the call failed.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared status machines
// ─────────────────────────────────────────────────────────────────────────────

/// Connection status shared by the transport, the socket, and the UI.
///
/// Each connection-owning component is the sole writer of its own status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No connection, none pending.
    Disconnected,
    /// Initial connection in progress.
    Connecting,
    /// Connected and live.
    Connected,
    /// Lost connection, retrying.
    Reconnecting,
    /// Gave up (retry ceiling reached or fatal failure).
    Error,
}

/// Voice session state. Exactly one manager instance owns this.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceState {
    /// Nothing in progress.
    Idle,
    /// Microphone capture active.
    Recording,
    /// Upload / transcription in flight.
    Processing,
    /// Response audio playing.
    Playing,
    /// Failed; requires an explicit reset.
    Error,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_starts_sending() {
        let msg = Message::user("hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.delivery_status, DeliveryStatus::Sending);
    }

    #[test]
    fn assistant_message_is_delivered() {
        let msg = Message::assistant("hi there");
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.delivery_status, DeliveryStatus::Delivered);
    }

    #[test]
    fn mark_sent_transitions_from_sending_only() {
        let mut msg = Message::user("hello");
        msg.mark_sent();
        assert_eq!(msg.delivery_status, DeliveryStatus::Sent);
        // Already sent: mark_failed must not regress it.
        msg.mark_failed();
        assert_eq!(msg.delivery_status, DeliveryStatus::Sent);
    }

    #[test]
    fn mark_failed_transitions_from_sending() {
        let mut msg = Message::user("hello");
        msg.mark_failed();
        assert_eq!(msg.delivery_status, DeliveryStatus::Error);
    }

    #[test]
    fn message_serde_camel_case() {
        let msg = Message::user("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("createdAt").is_some());
        assert!(json.get("deliveryStatus").is_some());
        assert_eq!(json["role"], "user");
    }

    #[test]
    fn message_metadata_omitted_when_empty() {
        let msg = Message::user("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn session_deserializes_with_defaults() {
        let json = serde_json::json!({
            "id": "sess-1",
            "assistantId": "asst-1",
            "status": "active",
            "startedAt": "2026-01-01T00:00:00Z",
        });
        let session: Session = serde_json::from_value(json).unwrap();
        assert_eq!(session.message_count, 0);
        assert!(!session.handoff_requested);
        assert!(session.end_user_id.is_none());
        assert_eq!(session.status, SessionStatus::Active);
    }

    #[test]
    fn tool_result_ok() {
        let result = ToolResult::ok(
            ToolCallId::from("call-1"),
            "lookup_order",
            serde_json::json!({"status": "shipped"}),
            42,
        );
        assert!(!result.is_error());
        assert_eq!(result.duration_ms, 42);
    }

    #[test]
    fn tool_result_failed() {
        let result = ToolResult::failed(ToolCallId::from("call-1"), "missing", "Tool not found", 0);
        assert!(result.is_error());
        assert_eq!(result.duration_ms, 0);
        assert!(result.result.is_none());
    }

    #[test]
    fn tool_call_serde_roundtrip() {
        let call = ToolCall {
            id: ToolCallId::from("call-9"),
            name: "lookup_order".into(),
            arguments: serde_json::from_value(serde_json::json!({"orderId": "o-1"})).unwrap(),
            requested_at: Utc::now(),
        };
        let json = serde_json::to_string(&call).unwrap();
        let back: ToolCall = serde_json::from_str(&json).unwrap();
        assert_eq!(back, call);
    }

    #[test]
    fn status_enums_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&ConnectionStatus::Reconnecting).unwrap(),
            "\"reconnecting\""
        );
        assert_eq!(serde_json::to_string(&VoiceState::Playing).unwrap(), "\"playing\"");
        assert_eq!(
            serde_json::to_string(&SessionStatus::Abandoned).unwrap(),
            "\"abandoned\""
        );
    }
}
