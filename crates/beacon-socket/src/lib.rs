//! # beacon-socket
//!
//! Auto-reconnecting realtime WebSocket for push-style agent updates.
//!
//! One supervisor task owns the connection; callers interact through
//! [`RealtimeSocket`] and observe it via a broadcast event channel plus a
//! [`ConnectionStatus`] watch. Lost connections back off exponentially
//! (with jitter) up to a fixed attempt ceiling; caller-initiated closes
//! never retry.
//!
//! [`ConnectionStatus`]: beacon_core::ConnectionStatus

#![deny(unsafe_code)]

mod event;
mod socket;

pub use event::{SocketEvent, SocketMessage};
pub use socket::{RealtimeSocket, SocketConfig};
