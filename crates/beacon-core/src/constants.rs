//! Default tuning constants for the communication layer.

/// Default single-shot request timeout (30 s).
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Default streaming read timeout (120 s).
pub const DEFAULT_STREAM_TIMEOUT_MS: u64 = 120_000;

/// Default maximum retry attempts for a single request.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base backoff delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Default base backoff delay after a 429, in milliseconds.
pub const DEFAULT_RATE_LIMIT_BASE_DELAY_MS: u64 = 5000;

/// Default backoff cap in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Default maximum socket reconnect attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Socket liveness ping interval in milliseconds (30 s).
pub const DEFAULT_PING_INTERVAL_MS: u64 = 30_000;
