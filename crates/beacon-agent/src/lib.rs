//! # beacon-agent
//!
//! Chat turn orchestration for the agent backend.
//!
//! [`Orchestrator`] runs one turn at a time against the chat endpoint,
//! streaming by default, publishing lifecycle events on the bus, and
//! dispatching backend tool calls through the [`ToolRegistry`]. The REST
//! session and support endpoints live in [`AgentEndpoints`].

#![deny(unsafe_code)]

mod endpoints;
mod orchestrator;
mod tools;

pub use endpoints::{AgentEndpoints, SupportTicket, SupportTicketRequest};
pub use orchestrator::{ChatCallbacks, ChatOptions, Orchestrator};
pub use tools::{ToolHandler, ToolRegistry};
