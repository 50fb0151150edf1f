//! Injected audio capability traits.
//!
//! The platform supplies real microphone and speaker implementations;
//! the no-op defaults keep the session manager usable (and testable) on
//! hosts with no audio hardware.

use async_trait::async_trait;
use beacon_core::AgentError;
use bytes::Bytes;

/// Captured audio plus enough metadata to upload or replay it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedAudio {
    /// Encoded audio bytes.
    pub data: Bytes,
    /// Capture length in milliseconds.
    pub duration_ms: u64,
    /// MIME type of `data`.
    pub mime_type: String,
}

impl RecordedAudio {
    /// Wrap encoded audio bytes.
    #[must_use]
    pub fn new(data: impl Into<Bytes>, duration_ms: u64, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            duration_ms,
            mime_type: mime_type.into(),
        }
    }
}

/// Microphone capture capability.
#[async_trait]
pub trait AudioRecorder: Send + Sync {
    /// Ask the platform for microphone permission.
    ///
    /// The session manager calls this at most once and caches the answer.
    async fn request_permission(&self) -> Result<bool, AgentError>;

    /// Begin capturing audio.
    async fn start_capture(&self) -> Result<(), AgentError>;

    /// Stop capturing and hand back the recorded audio.
    async fn stop_capture(&self) -> Result<RecordedAudio, AgentError>;

    /// Most recent input level in dB full scale (at or below `0.0`).
    fn level_db(&self) -> f32;
}

/// Speaker playback capability.
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Play encoded audio, resolving when playback finishes.
    async fn play(&self, data: &[u8], mime_type: &str) -> Result<(), AgentError>;

    /// Speak text via the platform's TTS voice, resolving when done.
    async fn speak(&self, text: &str) -> Result<(), AgentError>;
}

/// Recorder that grants permission and captures silence.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullRecorder;

#[async_trait]
impl AudioRecorder for NullRecorder {
    async fn request_permission(&self) -> Result<bool, AgentError> {
        Ok(true)
    }

    async fn start_capture(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn stop_capture(&self) -> Result<RecordedAudio, AgentError> {
        Ok(RecordedAudio::new(Bytes::new(), 0, "audio/mp4"))
    }

    fn level_db(&self) -> f32 {
        f32::NEG_INFINITY
    }
}

/// Player that discards everything immediately.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullPlayer;

#[async_trait]
impl AudioPlayer for NullPlayer {
    async fn play(&self, _data: &[u8], _mime_type: &str) -> Result<(), AgentError> {
        Ok(())
    }

    async fn speak(&self, _text: &str) -> Result<(), AgentError> {
        Ok(())
    }
}
