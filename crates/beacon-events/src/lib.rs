//! # beacon-events
//!
//! Typed in-process publish/subscribe for the Beacon SDK.
//!
//! Every cross-component notification travels as an [`AgentEvent`] — a closed
//! tagged union, one variant per event kind — through an [`EventBus`].
//! Delivery is synchronous and in registration order: [`EventBus::publish`]
//! returns only after every subscriber has run. A panicking subscriber is
//! isolated; it cannot break delivery to the remaining subscribers or corrupt
//! later emissions.

#![deny(unsafe_code)]

mod bus;
mod event;

pub use bus::{EventBus, Subscription};
pub use event::{AgentEvent, EventKind};
