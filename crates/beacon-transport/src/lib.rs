//! # beacon-transport
//!
//! Single-shot request/response HTTP client for the Beacon SDK.
//!
//! Responsibilities:
//!
//! - URL building from a configured base address
//! - `X-API-Key` and optional `Authorization: Bearer` headers
//! - Per-call timeout via cooperative cancellation (`TIMEOUT` on expiry)
//! - `{success, data, error}` envelope parsing with raw-text pass-through
//! - HTTP status → [`ErrorCode`] mapping
//! - Transparent retry of 429/5xx/connectivity failures with exponential
//!   backoff, larger base for rate limits, fixed ceiling
//!
//! The client is the sole writer of its own [`ConnectionStatus`], exposed
//! through a `tokio::sync::watch` channel.
//!
//! [`ErrorCode`]: beacon_core::ErrorCode
//! [`ConnectionStatus`]: beacon_core::ConnectionStatus

#![deny(unsafe_code)]

mod client;
mod envelope;

pub use client::{RequestOptions, TransportClient, TransportConfig};
pub use envelope::{Envelope, EnvelopeError};

/// Re-exported HTTP method type used by [`TransportClient::request`].
pub use reqwest::Method;
