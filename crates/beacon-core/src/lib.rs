//! # beacon-core
//!
//! Foundation types shared by every Beacon crate.
//!
//! This crate provides the vocabulary of the agent communication layer:
//!
//! - **Branded IDs**: `SessionId`, `MessageId`, `ToolCallId` as newtypes for type safety
//! - **Conversation model**: `Message`, `Session`, `ToolCall`, `ToolResult`
//! - **Stream events**: the transient `StreamEvent` union decoded from SSE payloads
//! - **Status enums**: `ConnectionStatus` and `VoiceState`
//! - **Errors**: the single [`AgentError`] type with a closed [`ErrorCode`] set
//! - **Retry math**: `RetryConfig` and exponential backoff calculation
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod constants;
pub mod error;
pub mod ids;
pub mod logging;
pub mod model;
pub mod retry;
pub mod stream;

pub use error::{AgentError, ErrorCode};
pub use ids::{MessageId, SessionId, ToolCallId};
pub use model::{
    ConnectionStatus, DeliveryStatus, Message, Role, Session, SessionStatus, ToolCall, ToolResult,
    VoiceState,
};
pub use retry::{RetryConfig, calculate_backoff_delay, calculate_backoff_delay_with_random};
pub use stream::{StreamEvent, TurnMetadata};
