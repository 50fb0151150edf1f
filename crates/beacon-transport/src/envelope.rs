//! Response envelope parsing.
//!
//! The backend wraps JSON responses as `{success, data, error}`. A
//! `success: false` body is treated identically to a non-2xx status for
//! error-mapping purposes: the embedded code/message becomes the
//! [`AgentError`]. Non-JSON bodies pass through as raw text.

use beacon_core::{AgentError, ErrorCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// The backend response envelope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    /// Whether the operation succeeded server-side.
    pub success: bool,
    /// Payload on success.
    pub data: Option<T>,
    /// Error details on failure.
    pub error: Option<EnvelopeError>,
}

/// Embedded error of a `success: false` envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeError {
    /// Machine-readable code (matches the [`ErrorCode`] wire names).
    pub code: Option<String>,
    /// Human-readable message.
    pub message: Option<String>,
}

impl EnvelopeError {
    /// Convert into the SDK error type.
    #[must_use]
    pub fn into_agent_error(self) -> AgentError {
        let code = self
            .code
            .as_deref()
            .map_or(ErrorCode::Unknown, ErrorCode::parse);
        AgentError::new(code, self.message.unwrap_or_else(|| "request failed".into()))
    }
}

/// Parse a 2xx response body into `T`.
///
/// Resolution order:
/// 1. A well-formed envelope: `success: true` unwraps `data`,
///    `success: false` becomes the embedded error.
/// 2. A bare `T` JSON body.
/// 3. Raw-text pass-through (the body wrapped as a JSON string), so
///    `T = String` callers receive non-JSON bodies unchanged.
pub fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, AgentError> {
    if let Ok(envelope) = serde_json::from_str::<Envelope<T>>(body) {
        if !envelope.success {
            return Err(envelope
                .error
                .map_or_else(
                    || AgentError::new(ErrorCode::Unknown, "request failed"),
                    EnvelopeError::into_agent_error,
                ));
        }
        if let Some(data) = envelope.data {
            return Ok(data);
        }
        // success with no data: only valid when T tolerates null
        return serde_json::from_value(Value::Null).map_err(|e| {
            AgentError::new(ErrorCode::Unknown, "envelope missing data field").with_source(e)
        });
    }

    if let Ok(value) = serde_json::from_str::<T>(body) {
        return Ok(value);
    }

    serde_json::from_value(Value::String(body.to_owned())).map_err(|e| {
        AgentError::new(ErrorCode::Unknown, "response body did not match expected shape")
            .with_source(e)
    })
}

/// Extract the most useful error message from a non-2xx body.
///
/// Prefers the envelope's embedded message, falls back to the (truncated)
/// raw body.
#[must_use]
pub fn error_message_from_body(body: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<Envelope<Value>>(body) {
        if let Some(err) = envelope.error {
            if let Some(message) = err.message {
                return message;
            }
        }
    }
    truncate(body.trim(), 200)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_owned()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
