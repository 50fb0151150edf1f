//! # beacon-stream
//!
//! Server-sent-events decoding for incremental agent responses.
//!
//! Two layers:
//!
//! - [`decoder`]: push-based SSE line decoding over a rolling byte buffer.
//!   The final partial line is retained across chunk boundaries, so the
//!   frame sequence is identical for every chunking of the same bytes.
//! - [`connection`]: opens the streaming request, drives the decoder on a
//!   spawned task, and dispatches [`StreamEvent`]s to a [`StreamSink`].
//!
//! [`StreamEvent`]: beacon_core::StreamEvent

#![deny(unsafe_code)]

pub mod connection;
pub mod decoder;

pub use connection::{StreamConfig, StreamDecoder, StreamHandle, StreamSink};
pub use decoder::{SseDecoder, SseFrame};
