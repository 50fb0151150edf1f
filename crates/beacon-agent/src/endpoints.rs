//! Thin REST wrappers over the transport client.
//!
//! Session lifecycle, message history, and support tickets. Each call is
//! one request through [`TransportClient`] with the envelope/error mapping
//! that implies.

use std::sync::Arc;

use beacon_core::{AgentError, Message, Session, SessionId};
use beacon_transport::{Method, TransportClient};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// A customer support ticket created from a conversation.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportTicket {
    /// Ticket ID issued by the backend.
    pub id: String,
    /// Short subject line.
    pub subject: String,
    /// Backend-defined status string.
    pub status: String,
}

/// Request body for [`AgentEndpoints::submit_support_ticket`].
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportTicketRequest {
    /// Short subject line.
    pub subject: String,
    /// Full description of the issue.
    pub description: String,
    /// Session the ticket escalates, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

/// REST endpoints for session and support operations.
#[derive(Clone, Debug)]
pub struct AgentEndpoints {
    transport: Arc<TransportClient>,
    assistant_id: String,
}

impl AgentEndpoints {
    /// Wrap a transport client for a given assistant.
    #[must_use]
    pub fn new(transport: Arc<TransportClient>, assistant_id: impl Into<String>) -> Self {
        Self {
            transport,
            assistant_id: assistant_id.into(),
        }
    }

    /// Create a new session for this assistant.
    pub async fn create_session(&self, end_user_id: Option<&str>) -> Result<Session, AgentError> {
        let mut body = json!({ "assistantId": self.assistant_id });
        if let Some(end_user_id) = end_user_id {
            body["endUserId"] = json!(end_user_id);
        }
        self.transport
            .request(Method::POST, "v1/sessions", Some(&body))
            .await
    }

    /// Fetch an existing session.
    pub async fn fetch_session(&self, session_id: &SessionId) -> Result<Session, AgentError> {
        self.transport
            .request(Method::GET, &format!("v1/sessions/{session_id}"), None)
            .await
    }

    /// Close a session server-side.
    pub async fn close_session(&self, session_id: &SessionId) -> Result<Session, AgentError> {
        self.transport
            .request(Method::POST, &format!("v1/sessions/{session_id}/close"), None)
            .await
    }

    /// Fetch the message history of a session, oldest first.
    pub async fn fetch_history(&self, session_id: &SessionId) -> Result<Vec<Message>, AgentError> {
        self.transport
            .request(Method::GET, &format!("v1/sessions/{session_id}/messages"), None)
            .await
    }

    /// Submit a support ticket.
    pub async fn submit_support_ticket(
        &self,
        request: &SupportTicketRequest,
    ) -> Result<SupportTicket, AgentError> {
        let body = serde_json::to_value(request).map_err(|e| {
            AgentError::new(
                beacon_core::ErrorCode::InvalidConfig,
                "failed to encode support ticket",
            )
            .with_source(e)
        })?;
        self.transport
            .request(Method::POST, "v1/support/tickets", Some(&body))
            .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
