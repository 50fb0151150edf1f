//! Settings type definitions with serde defaults.

use beacon_core::RetryConfig;
use beacon_core::constants::{
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_PING_INTERVAL_MS, DEFAULT_REQUEST_TIMEOUT_MS,
    DEFAULT_STREAM_TIMEOUT_MS,
};
use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconSettings {
    /// HTTP API configuration.
    #[serde(default)]
    pub api: ApiSettings,
    /// Retry/backoff tuning shared by the transport.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Realtime socket configuration.
    #[serde(default)]
    pub socket: SocketSettings,
    /// Voice capture tuning.
    #[serde(default)]
    pub voice: VoiceSettings,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// HTTP API configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSettings {
    /// Base URL of the agent backend.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// API key sent as `X-API-Key`.
    #[serde(default)]
    pub api_key: String,
    /// Optional bearer token for `Authorization`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Single-shot request timeout in ms.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Streaming read timeout in ms.
    #[serde(default = "default_stream_timeout_ms")]
    pub stream_timeout_ms: u64,
}

fn default_base_url() -> String {
    "https://api.beacon.dev".to_owned()
}
fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}
fn default_stream_timeout_ms() -> u64 {
    DEFAULT_STREAM_TIMEOUT_MS
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            auth_token: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            stream_timeout_ms: DEFAULT_STREAM_TIMEOUT_MS,
        }
    }
}

/// Realtime socket configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketSettings {
    /// WebSocket base URL.
    #[serde(default = "default_socket_url")]
    pub url: String,
    /// Whether to reconnect automatically after a non-caller close.
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    /// Reconnect attempt ceiling.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Liveness ping interval in ms.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
}

fn default_socket_url() -> String {
    "wss://realtime.beacon.dev".to_owned()
}
fn default_true() -> bool {
    true
}
fn default_max_reconnect_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}
fn default_ping_interval_ms() -> u64 {
    DEFAULT_PING_INTERVAL_MS
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            url: default_socket_url(),
            auto_reconnect: true,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
        }
    }
}

/// Voice capture tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSettings {
    /// Level meter sampling interval in ms.
    #[serde(default = "default_meter_interval_ms")]
    pub meter_interval_ms: u64,
    /// Bottom of the metering dynamic-range window in dB.
    #[serde(default = "default_min_level_db")]
    pub min_level_db: f32,
    /// Top of the metering dynamic-range window in dB.
    #[serde(default)]
    pub max_level_db: f32,
}

fn default_meter_interval_ms() -> u64 {
    100
}
fn default_min_level_db() -> f32 {
    -60.0
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            meter_interval_ms: 100,
            min_level_db: -60.0,
            max_level_db: 0.0,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingSettings {
    /// Minimum level for the tracing subscriber.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_owned()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
