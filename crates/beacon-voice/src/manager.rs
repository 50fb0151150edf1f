//! The voice session state machine.
//!
//! One manager instance owns the [`VoiceState`] and serializes its
//! transitions: `idle → recording → processing → playing → idle`, with
//! `error` reachable from any stage and left only through [`reset`].
//! Every state change and level sample is published on the bus.
//!
//! [`reset`]: VoiceSessionManager::reset

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use beacon_core::{AgentError, SessionId, VoiceState};
use beacon_events::{AgentEvent, EventBus};
use beacon_settings::VoiceSettings;
use beacon_transport::{Method, TransportClient};
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::capture::{AudioPlayer, AudioRecorder, RecordedAudio};

/// Outcome of one voice turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoiceTurn {
    /// What the backend heard.
    pub transcription: String,
    /// The agent's textual reply.
    pub reply: String,
}

/// Wire shape of the voice turn endpoint response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoiceTurnResponse {
    #[serde(default)]
    transcription: String,
    #[serde(default)]
    reply: String,
    /// Base64-encoded response audio, when the backend synthesized any.
    #[serde(default)]
    audio: Option<String>,
    #[serde(default)]
    audio_mime_type: Option<String>,
}

/// Governs microphone capture, level metering, upload, and playback.
pub struct VoiceSessionManager {
    state: parking_lot::Mutex<VoiceState>,
    recorder: Arc<dyn AudioRecorder>,
    player: Arc<dyn AudioPlayer>,
    transport: Arc<TransportClient>,
    bus: EventBus,
    settings: VoiceSettings,
    // permission is requested at most once; the answer is cached here
    permission: tokio::sync::Mutex<Option<bool>>,
    meter: parking_lot::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl VoiceSessionManager {
    /// Assemble a manager from its capabilities and collaborators.
    #[must_use]
    pub fn new(
        recorder: Arc<dyn AudioRecorder>,
        player: Arc<dyn AudioPlayer>,
        transport: Arc<TransportClient>,
        bus: EventBus,
        settings: VoiceSettings,
    ) -> Self {
        Self {
            state: parking_lot::Mutex::new(VoiceState::Idle),
            recorder,
            player,
            transport,
            bus,
            settings,
            permission: tokio::sync::Mutex::new(None),
            meter: parking_lot::Mutex::new(None),
        }
    }

    /// Current voice state.
    #[must_use]
    pub fn state(&self) -> VoiceState {
        *self.state.lock()
    }

    /// Begin microphone capture and periodic level metering.
    ///
    /// Legal only from `Idle` or `Error`; any other state rejects the call
    /// without touching the state machine. A permission denial or capture
    /// failure lands in `Error`.
    pub async fn start_recording(&self) -> Result<(), AgentError> {
        self.transition(&[VoiceState::Idle, VoiceState::Error], VoiceState::Recording)
            .map_err(|state| {
                AgentError::voice(format!("cannot start recording while {state:?}"))
            })?;

        if !self.ensure_permission().await? {
            return Err(self.fail(AgentError::voice("microphone permission denied")));
        }
        if let Err(e) = self.recorder.start_capture().await {
            return Err(self.fail(AgentError::voice("failed to start capture").with_source(e)));
        }

        self.start_meter();
        Ok(())
    }

    /// Stop capture and return the recorded audio.
    ///
    /// A no-op returning `None` when nothing is recording.
    pub async fn stop_recording(&self) -> Result<Option<RecordedAudio>, AgentError> {
        if self
            .transition(&[VoiceState::Recording], VoiceState::Recording)
            .is_err()
        {
            return Ok(None);
        }
        self.stop_meter();

        match self.recorder.stop_capture().await {
            Ok(audio) => {
                debug!(duration_ms = audio.duration_ms, "recording stopped");
                self.set_state(VoiceState::Idle);
                Ok(Some(audio))
            }
            Err(e) => Err(self.fail(AgentError::voice("failed to stop capture").with_source(e))),
        }
    }

    /// Upload captured audio as one voice turn and play the response.
    ///
    /// Walks `processing → playing → idle`; response audio is played as
    /// received, and a text-only reply falls back to platform TTS. Any
    /// failure lands in `Error` with one `Voice` error on the bus.
    pub async fn send_voice_message(
        &self,
        audio: &RecordedAudio,
        session_id: &SessionId,
    ) -> Result<VoiceTurn, AgentError> {
        self.transition(&[VoiceState::Idle], VoiceState::Processing)
            .map_err(|state| {
                AgentError::voice(format!("cannot send voice message while {state:?}"))
            })?;

        let body = json!({
            "sessionId": session_id,
            "audio": base64::engine::general_purpose::STANDARD.encode(&audio.data),
            "mimeType": audio.mime_type,
            "durationMs": audio.duration_ms,
        });
        let response: VoiceTurnResponse = match self
            .transport
            .request(Method::POST, "v1/voice/turns", Some(&body))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return Err(self.fail(AgentError::voice("voice turn failed").with_source(e)));
            }
        };

        if let Some(encoded) = &response.audio {
            let data = match base64::engine::general_purpose::STANDARD.decode(encoded) {
                Ok(data) => data,
                Err(e) => {
                    return Err(
                        self.fail(AgentError::voice("invalid response audio").with_source(e))
                    );
                }
            };
            let mime = response.audio_mime_type.as_deref().unwrap_or("audio/mp4");
            self.set_state(VoiceState::Playing);
            if let Err(e) = self.player.play(&data, mime).await {
                return Err(self.fail(AgentError::voice("playback failed").with_source(e)));
            }
        } else if !response.reply.is_empty() {
            // TTS fallback shares the playing semantics
            self.set_state(VoiceState::Playing);
            if let Err(e) = self.player.speak(&response.reply).await {
                return Err(self.fail(AgentError::voice("speech playback failed").with_source(e)));
            }
        }

        self.set_state(VoiceState::Idle);
        Ok(VoiceTurn {
            transcription: response.transcription,
            reply: response.reply,
        })
    }

    /// Leave the `Error` state. No-op in any other state.
    pub fn reset(&self) {
        if self.transition(&[VoiceState::Error], VoiceState::Idle).is_ok() {
            debug!("voice session reset");
        }
    }

    // ── internals ────────────────────────────────────────────────────────

    /// Atomically move to `next` when the current state is in `from`,
    /// otherwise return the offending state untouched.
    fn transition(&self, from: &[VoiceState], next: VoiceState) -> Result<(), VoiceState> {
        let mut state = self.state.lock();
        if !from.contains(&state) {
            return Err(*state);
        }
        let changed = *state != next;
        *state = next;
        drop(state);
        if changed {
            self.bus.publish(&AgentEvent::VoiceState(next));
        }
        Ok(())
    }

    fn set_state(&self, next: VoiceState) {
        let mut state = self.state.lock();
        let changed = *state != next;
        *state = next;
        drop(state);
        if changed {
            self.bus.publish(&AgentEvent::VoiceState(next));
        }
    }

    /// Route a failure into the `Error` state and publish it once.
    fn fail(&self, error: AgentError) -> AgentError {
        warn!(code = %error.code, message = %error.message, "voice session failed");
        self.stop_meter();
        self.set_state(VoiceState::Error);
        self.bus.publish(&AgentEvent::Error(error.clone()));
        error
    }

    async fn ensure_permission(&self) -> Result<bool, AgentError> {
        let mut cached = self.permission.lock().await;
        if let Some(granted) = *cached {
            return Ok(granted);
        }
        let granted = match self.recorder.request_permission().await {
            Ok(granted) => granted,
            Err(e) => {
                drop(cached);
                return Err(self.fail(AgentError::voice("permission request failed").with_source(e)));
            }
        };
        *cached = Some(granted);
        Ok(granted)
    }

    /// Sample the recorder level on a fixed interval, publishing each
    /// normalized reading until stopped.
    fn start_meter(&self) {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let recorder = self.recorder.clone();
        let bus = self.bus.clone();
        let settings = self.settings.clone();
        let task = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_millis(settings.meter_interval_ms.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = token.cancelled() => return,
                    _ = ticker.tick() => {
                        let level = normalize_level(
                            recorder.level_db(),
                            settings.min_level_db,
                            settings.max_level_db,
                        );
                        bus.publish(&AgentEvent::VoiceLevel { level });
                    }
                }
            }
        });
        if let Some((old_cancel, old_task)) = self.meter.lock().replace((cancel, task)) {
            old_cancel.cancel();
            old_task.abort();
        }
    }

    fn stop_meter(&self) {
        if let Some((cancel, task)) = self.meter.lock().take() {
            cancel.cancel();
            task.abort();
        }
    }
}

impl std::fmt::Debug for VoiceSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSessionManager")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for VoiceSessionManager {
    fn drop(&mut self) {
        self.stop_meter();
    }
}

/// Clamp a raw dB reading into the `min_db..max_db` window, normalized
/// to `0.0..=1.0`.
#[must_use]
pub fn normalize_level(db: f32, min_db: f32, max_db: f32) -> f32 {
    if max_db <= min_db {
        return 0.0;
    }
    ((db - min_db) / (max_db - min_db)).clamp(0.0, 1.0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use beacon_core::{ErrorCode, RetryConfig};
    use beacon_events::EventKind;
    use beacon_transport::TransportConfig;
    use bytes::Bytes;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FakeRecorder {
        permission: bool,
        permission_requests: AtomicU32,
        level: f32,
    }

    impl FakeRecorder {
        fn granting() -> Self {
            Self {
                permission: true,
                permission_requests: AtomicU32::new(0),
                level: -30.0,
            }
        }

        fn denying() -> Self {
            Self {
                permission: false,
                permission_requests: AtomicU32::new(0),
                level: -30.0,
            }
        }
    }

    #[async_trait]
    impl AudioRecorder for FakeRecorder {
        async fn request_permission(&self) -> Result<bool, AgentError> {
            let _ = self.permission_requests.fetch_add(1, Ordering::SeqCst);
            Ok(self.permission)
        }

        async fn start_capture(&self) -> Result<(), AgentError> {
            Ok(())
        }

        async fn stop_capture(&self) -> Result<RecordedAudio, AgentError> {
            Ok(RecordedAudio::new(
                Bytes::from_static(b"captured-pcm"),
                1_200,
                "audio/mp4",
            ))
        }

        fn level_db(&self) -> f32 {
            self.level
        }
    }

    #[derive(Default)]
    struct FakePlayer {
        played: Mutex<Vec<Vec<u8>>>,
        spoken: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AudioPlayer for FakePlayer {
        async fn play(&self, data: &[u8], _mime_type: &str) -> Result<(), AgentError> {
            self.played.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn speak(&self, text: &str) -> Result<(), AgentError> {
            self.spoken.lock().unwrap().push(text.to_owned());
            Ok(())
        }
    }

    fn transport(server: &MockServer) -> Arc<TransportClient> {
        Arc::new(
            TransportClient::new(TransportConfig {
                base_url: format!("{}/", server.uri()),
                api_key: "k".into(),
                retry: RetryConfig {
                    max_retries: 0,
                    base_delay_ms: 1,
                    rate_limit_base_delay_ms: 1,
                    max_delay_ms: 10,
                    jitter_factor: 0.0,
                },
                ..TransportConfig::default()
            })
            .unwrap(),
        )
    }

    fn manager(
        server: &MockServer,
        recorder: Arc<dyn AudioRecorder>,
        player: Arc<dyn AudioPlayer>,
        bus: EventBus,
    ) -> VoiceSessionManager {
        VoiceSessionManager::new(
            recorder,
            player,
            transport(server),
            bus,
            VoiceSettings {
                meter_interval_ms: 10,
                ..VoiceSettings::default()
            },
        )
    }

    /// Record voice state transitions in delivery order.
    fn record_states(bus: &EventBus) -> (Arc<Mutex<Vec<VoiceState>>>, beacon_events::Subscription) {
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = states.clone();
        let sub = bus.subscribe(EventKind::VoiceState, move |event| {
            if let AgentEvent::VoiceState(state) = event {
                sink.lock().unwrap().push(*state);
            }
        });
        (states, sub)
    }

    #[test]
    fn normalize_clamps_the_dynamic_range_window() {
        assert_eq!(normalize_level(-60.0, -60.0, 0.0), 0.0);
        assert_eq!(normalize_level(0.0, -60.0, 0.0), 1.0);
        assert!((normalize_level(-30.0, -60.0, 0.0) - 0.5).abs() < 1e-6);
        assert_eq!(normalize_level(-90.0, -60.0, 0.0), 0.0);
        assert_eq!(normalize_level(12.0, -60.0, 0.0), 1.0);
        assert_eq!(normalize_level(f32::NEG_INFINITY, -60.0, 0.0), 0.0);
        // degenerate window
        assert_eq!(normalize_level(-10.0, 0.0, 0.0), 0.0);
    }

    #[tokio::test]
    async fn record_stop_roundtrip_returns_audio_and_walks_states() {
        let server = MockServer::start().await;
        let bus = EventBus::new();
        let (states, _sub) = record_states(&bus);
        let manager = manager(
            &server,
            Arc::new(FakeRecorder::granting()),
            Arc::new(FakePlayer::default()),
            bus,
        );

        manager.start_recording().await.unwrap();
        assert_eq!(manager.state(), VoiceState::Recording);

        let audio = manager.stop_recording().await.unwrap().unwrap();
        assert_eq!(audio.data.as_ref(), b"captured-pcm");
        assert_eq!(audio.duration_ms, 1_200);
        assert_eq!(manager.state(), VoiceState::Idle);
        assert_eq!(
            *states.lock().unwrap(),
            vec![VoiceState::Recording, VoiceState::Idle]
        );
    }

    #[tokio::test]
    async fn stop_when_not_recording_is_a_silent_no_op() {
        let server = MockServer::start().await;
        let bus = EventBus::new();
        let (states, _sub) = record_states(&bus);
        let manager = manager(
            &server,
            Arc::new(FakeRecorder::granting()),
            Arc::new(FakePlayer::default()),
            bus,
        );

        assert!(manager.stop_recording().await.unwrap().is_none());
        assert_eq!(manager.state(), VoiceState::Idle);
        assert!(states.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn permission_is_requested_once_and_cached() {
        let server = MockServer::start().await;
        let recorder = Arc::new(FakeRecorder::granting());
        let manager = manager(
            &server,
            recorder.clone(),
            Arc::new(FakePlayer::default()),
            EventBus::new(),
        );

        for _ in 0..3 {
            manager.start_recording().await.unwrap();
            let _ = manager.stop_recording().await.unwrap();
        }
        assert_eq!(recorder.permission_requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn permission_denial_lands_in_error_until_reset() {
        let server = MockServer::start().await;
        let bus = EventBus::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let _sub = bus.subscribe(EventKind::Error, move |event| {
            if let AgentEvent::Error(e) = event {
                sink.lock().unwrap().push(e.clone());
            }
        });
        let manager = manager(
            &server,
            Arc::new(FakeRecorder::denying()),
            Arc::new(FakePlayer::default()),
            bus,
        );

        let err = manager.start_recording().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Voice);
        assert_eq!(manager.state(), VoiceState::Error);
        assert_eq!(errors.lock().unwrap().len(), 1);

        manager.reset();
        assert_eq!(manager.state(), VoiceState::Idle);
    }

    #[tokio::test]
    async fn reset_outside_error_changes_nothing() {
        let server = MockServer::start().await;
        let bus = EventBus::new();
        let (states, _sub) = record_states(&bus);
        let manager = manager(
            &server,
            Arc::new(FakeRecorder::granting()),
            Arc::new(FakePlayer::default()),
            bus,
        );

        manager.reset();
        assert_eq!(manager.state(), VoiceState::Idle);
        assert!(states.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn meter_publishes_normalized_levels_while_recording() {
        let server = MockServer::start().await;
        let bus = EventBus::new();
        let levels = Arc::new(Mutex::new(Vec::new()));
        let sink = levels.clone();
        let _sub = bus.subscribe(EventKind::VoiceLevel, move |event| {
            if let AgentEvent::VoiceLevel { level } = event {
                sink.lock().unwrap().push(*level);
            }
        });
        let manager = manager(
            &server,
            Arc::new(FakeRecorder::granting()),
            Arc::new(FakePlayer::default()),
            bus,
        );

        manager.start_recording().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let _ = manager.stop_recording().await.unwrap();

        let sampled = levels.lock().unwrap().clone();
        assert!(!sampled.is_empty());
        // -30 dB in a -60..0 window
        for level in &sampled {
            assert!((level - 0.5).abs() < 1e-6);
        }

        let count_at_stop = sampled.len();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(levels.lock().unwrap().len(), count_at_stop, "meter stopped");
    }

    fn voice_turn_ok(audio: Option<&[u8]>) -> ResponseTemplate {
        let mut data = serde_json::json!({
            "transcription": "where is my order",
            "reply": "It shipped yesterday.",
        });
        if let Some(bytes) = audio {
            data["audio"] =
                serde_json::json!(base64::engine::general_purpose::STANDARD.encode(bytes));
            data["audioMimeType"] = serde_json::json!("audio/mp4");
        }
        ResponseTemplate::new(200)
            .set_body_json(serde_json::json!({"success": true, "data": data}))
    }

    #[tokio::test]
    async fn voice_turn_plays_response_audio_then_returns_to_idle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/voice/turns"))
            .respond_with(voice_turn_ok(Some(b"response-audio")))
            .mount(&server)
            .await;

        let bus = EventBus::new();
        let (states, _sub) = record_states(&bus);
        let player = Arc::new(FakePlayer::default());
        let manager = manager(&server, Arc::new(FakeRecorder::granting()), player.clone(), bus);

        let audio = RecordedAudio::new(Bytes::from_static(b"captured"), 900, "audio/mp4");
        let turn = manager
            .send_voice_message(&audio, &SessionId::from("sess-1"))
            .await
            .unwrap();

        assert_eq!(turn.transcription, "where is my order");
        assert_eq!(turn.reply, "It shipped yesterday.");
        assert_eq!(manager.state(), VoiceState::Idle);
        assert_eq!(
            *states.lock().unwrap(),
            vec![VoiceState::Processing, VoiceState::Playing, VoiceState::Idle]
        );
        assert_eq!(
            *player.played.lock().unwrap(),
            vec![b"response-audio".to_vec()]
        );
        assert!(player.spoken.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn text_only_reply_falls_back_to_tts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/voice/turns"))
            .respond_with(voice_turn_ok(None))
            .mount(&server)
            .await;

        let bus = EventBus::new();
        let (states, _sub) = record_states(&bus);
        let player = Arc::new(FakePlayer::default());
        let manager = manager(&server, Arc::new(FakeRecorder::granting()), player.clone(), bus);

        let audio = RecordedAudio::new(Bytes::from_static(b"captured"), 900, "audio/mp4");
        let _ = manager
            .send_voice_message(&audio, &SessionId::from("sess-1"))
            .await
            .unwrap();

        assert!(player.played.lock().unwrap().is_empty());
        assert_eq!(
            *player.spoken.lock().unwrap(),
            vec!["It shipped yesterday.".to_owned()]
        );
        assert_eq!(
            *states.lock().unwrap(),
            vec![VoiceState::Processing, VoiceState::Playing, VoiceState::Idle]
        );
    }

    #[tokio::test]
    async fn upload_failure_lands_in_error_with_one_voice_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/voice/turns"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let bus = EventBus::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let _sub = bus.subscribe(EventKind::Error, move |event| {
            if let AgentEvent::Error(e) = event {
                sink.lock().unwrap().push(e.clone());
            }
        });
        let manager = manager(
            &server,
            Arc::new(FakeRecorder::granting()),
            Arc::new(FakePlayer::default()),
            bus,
        );

        let audio = RecordedAudio::new(Bytes::from_static(b"captured"), 900, "audio/mp4");
        let err = manager
            .send_voice_message(&audio, &SessionId::from("sess-1"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Voice);
        assert_eq!(manager.state(), VoiceState::Error);
        assert_eq!(errors.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn start_recording_during_processing_is_rejected_without_state_change() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/voice/turns"))
            .respond_with(voice_turn_ok(None).set_delay(Duration::from_millis(300)))
            .mount(&server)
            .await;

        let manager = Arc::new(manager(
            &server,
            Arc::new(FakeRecorder::granting()),
            Arc::new(FakePlayer::default()),
            EventBus::new(),
        ));

        let turn = {
            let manager = manager.clone();
            tokio::spawn(async move {
                let audio = RecordedAudio::new(Bytes::from_static(b"captured"), 900, "audio/mp4");
                manager
                    .send_voice_message(&audio, &SessionId::from("sess-1"))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.state(), VoiceState::Processing);

        let err = manager.start_recording().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Voice);
        assert_eq!(manager.state(), VoiceState::Processing);

        turn.await.unwrap().unwrap();
        assert_eq!(manager.state(), VoiceState::Idle);
    }
}
