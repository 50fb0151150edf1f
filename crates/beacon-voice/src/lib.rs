//! # beacon-voice
//!
//! Voice session state machine: microphone capture, level metering,
//! voice turn upload, and response playback.
//!
//! Platform audio is injected through the [`AudioRecorder`] and
//! [`AudioPlayer`] capability traits; [`VoiceSessionManager`] owns the
//! [`VoiceState`] machine and publishes every transition on the bus.
//!
//! [`VoiceState`]: beacon_core::VoiceState

#![deny(unsafe_code)]

mod capture;
mod manager;

pub use capture::{AudioPlayer, AudioRecorder, NullPlayer, NullRecorder, RecordedAudio};
pub use manager::{VoiceSessionManager, VoiceTurn, normalize_level};
