//! The single error type surfaced past the core boundary.
//!
//! Every failure path in the SDK produces exactly one [`AgentError`] with a
//! code from the closed [`ErrorCode`] set. Raw transport, decode, and
//! platform errors are caught and normalized at the lowest layer that
//! understands their meaning; they travel only as the `source` cause of an
//! `AgentError`, never as a public type.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// ErrorCode — closed code set
// ─────────────────────────────────────────────────────────────────────────────

/// Machine-readable failure classification.
///
/// The set is closed: callers can match exhaustively and the wire format
/// (`SCREAMING_SNAKE_CASE`) is stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// SDK used before configuration.
    Initialization,
    /// Invalid or expired credentials (HTTP 401/403).
    Authentication,
    /// Connectivity failure, 404, or 5xx response.
    Network,
    /// Operation exceeded its configured window.
    Timeout,
    /// HTTP 429.
    RateLimit,
    /// Malformed request or configuration (HTTP 400).
    InvalidConfig,
    /// Session lifecycle violation (e.g. concurrent turn).
    Session,
    /// Tool dispatch or execution failure.
    Tool,
    /// Voice capture, upload, or playback failure.
    Voice,
    /// Storage collaborator failure.
    Storage,
    /// Anything that could not be classified.
    Unknown,
}

impl ErrorCode {
    /// Wire-format code string (`SCREAMING_SNAKE_CASE`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialization => "INITIALIZATION",
            Self::Authentication => "AUTHENTICATION",
            Self::Network => "NETWORK",
            Self::Timeout => "TIMEOUT",
            Self::RateLimit => "RATE_LIMIT",
            Self::InvalidConfig => "INVALID_CONFIG",
            Self::Session => "SESSION",
            Self::Tool => "TOOL",
            Self::Voice => "VOICE",
            Self::Storage => "STORAGE",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parse a wire-format code string. Unrecognized codes map to `Unknown`.
    #[must_use]
    pub fn parse(code: &str) -> Self {
        match code {
            "INITIALIZATION" => Self::Initialization,
            "AUTHENTICATION" => Self::Authentication,
            "NETWORK" => Self::Network,
            "TIMEOUT" => Self::Timeout,
            "RATE_LIMIT" => Self::RateLimit,
            "INVALID_CONFIG" => Self::InvalidConfig,
            "SESSION" => Self::Session,
            "TOOL" => Self::Tool,
            "VOICE" => Self::Voice,
            "STORAGE" => Self::Storage,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AgentError
// ─────────────────────────────────────────────────────────────────────────────

/// The one error type every SDK operation can fail with.
#[derive(Debug, Error)]
#[error("[{code}] {message}")]
pub struct AgentError {
    /// Failure classification.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context for debugging (endpoint, status, attempt count).
    pub context: HashMap<String, serde_json::Value>,
    /// Original cause.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AgentError {
    /// Create an error with a code and message.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: HashMap::new(),
            source: None,
        }
    }

    /// Connectivity / server-side failure.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Network, message)
    }

    /// Timed-out operation.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    /// Session lifecycle violation.
    #[must_use]
    pub fn session(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Session, message)
    }

    /// Tool dispatch or execution failure.
    #[must_use]
    pub fn tool(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Tool, message)
    }

    /// Voice pipeline failure.
    #[must_use]
    pub fn voice(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Voice, message)
    }

    /// Attach the original cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Attach a structured context entry.
    #[must_use]
    pub fn with_context(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        let _ = self.context.insert(key.into(), value.into());
        self
    }

    /// Caller-initiated cancellation.
    ///
    /// Cancellation is not a failure: it is never published on the bus or
    /// passed to `on_error` handlers. Callers that need to distinguish it
    /// from real failures check [`AgentError::is_cancelled`].
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Unknown, "operation cancelled").with_context("cancelled", true)
    }

    /// Whether this error represents caller-initiated cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.context.get("cancelled") == Some(&serde_json::Value::Bool(true))
    }

    /// Map an HTTP status code to its error classification.
    ///
    /// 400→`InvalidConfig`, 401/403→`Authentication`, 404→`Network`
    /// ("resource not found"), 429→`RateLimit`, 5xx→`Network`.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        let code = match status {
            400 => ErrorCode::InvalidConfig,
            401 | 403 => ErrorCode::Authentication,
            404 => ErrorCode::Network,
            429 => ErrorCode::RateLimit,
            s if s >= 500 => ErrorCode::Network,
            _ => ErrorCode::Unknown,
        };
        let message = if status == 404 && message.is_empty() {
            "resource not found".to_owned()
        } else {
            message
        };
        Self::new(code, message).with_context("status", i64::from(status))
    }

    /// Whether a transparent retry is appropriate for this error.
    ///
    /// Timeouts are deliberately not retryable: the caller's window has
    /// already elapsed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.code, ErrorCode::Network | ErrorCode::RateLimit)
    }
}

impl Clone for AgentError {
    fn clone(&self) -> Self {
        // The boxed source is not Clone; the message already embeds what
        // callers need, so clones drop the cause chain.
        Self {
            code: self.code,
            message: self.message.clone(),
            context: self.context.clone(),
            source: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
