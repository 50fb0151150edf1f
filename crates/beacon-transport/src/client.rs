//! The retrying HTTP client.

use std::time::Duration;

use beacon_core::constants::DEFAULT_REQUEST_TIMEOUT_MS;
use beacon_core::retry::parse_retry_after_header;
use beacon_core::{
    AgentError, ConnectionStatus, ErrorCode, RetryConfig, calculate_backoff_delay,
};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::envelope;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Transport configuration.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Base URL of the agent backend.
    pub base_url: String,
    /// API key sent as `X-API-Key` on every request.
    pub api_key: String,
    /// Optional bearer token for `Authorization`.
    pub auth_token: Option<String>,
    /// Default per-request timeout in ms.
    pub request_timeout_ms: u64,
    /// Retry/backoff tuning.
    pub retry: RetryConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.beacon.dev".to_owned(),
            api_key: String::new(),
            auth_token: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            retry: RetryConfig::default(),
        }
    }
}

/// Per-call options.
#[derive(Debug, Default)]
pub struct RequestOptions {
    /// Override the default timeout for this call.
    pub timeout_ms: Option<u64>,
    /// Cooperative cancellation. Cancelling stops retries; the resulting
    /// error is flagged via [`AgentError::is_cancelled`] and must not be
    /// reported through error channels.
    pub cancel: Option<CancellationToken>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Request/response HTTP client with typed errors and transparent retry.
pub struct TransportClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    auth_token: parking_lot::RwLock<Option<String>>,
    request_timeout_ms: u64,
    retry: RetryConfig,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl TransportClient {
    /// Build a client from configuration.
    ///
    /// Fails with `INVALID_CONFIG` if the base URL does not parse.
    pub fn new(config: TransportConfig) -> Result<Self, AgentError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            AgentError::new(ErrorCode::InvalidConfig, format!("invalid base URL: {e}"))
                .with_context("baseUrl", config.base_url.clone())
        })?;

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AgentError::new(ErrorCode::Initialization, "failed to build HTTP client").with_source(e))?;

        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);

        Ok(Self {
            http,
            base_url,
            api_key: config.api_key,
            auth_token: parking_lot::RwLock::new(config.auth_token),
            request_timeout_ms: config.request_timeout_ms,
            retry: config.retry,
            status_tx,
        })
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    /// Watch channel for status changes. The transport is the sole writer.
    #[must_use]
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Replace the bearer token used for subsequent requests.
    pub fn set_auth_token(&self, token: Option<String>) {
        *self.auth_token.write() = token;
    }

    /// Current bearer token, if any.
    #[must_use]
    pub fn auth_token(&self) -> Option<String> {
        self.auth_token.read().clone()
    }

    /// Resolve a path against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, AgentError> {
        self.base_url.join(path).map_err(|e| {
            AgentError::new(ErrorCode::InvalidConfig, format!("invalid request path {path:?}"))
                .with_source(e)
        })
    }

    /// Issue a request with default options.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, AgentError> {
        self.request_with(method, path, body, RequestOptions::default())
            .await
    }

    /// Issue a request with per-call options.
    ///
    /// Retries 429/5xx responses and connectivity failures with exponential
    /// backoff up to the configured ceiling. Timeouts and other 4xx
    /// responses fail immediately. The attempt counter is per call; every
    /// call starts fresh.
    pub async fn request_with<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        options: RequestOptions,
    ) -> Result<T, AgentError> {
        let url = self.endpoint(path)?;
        let timeout_ms = options.timeout_ms.unwrap_or(self.request_timeout_ms);
        let cancel = options.cancel.unwrap_or_default();

        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::cancelled());
            }

            match self.attempt_once(&method, &url, body, timeout_ms, &cancel).await {
                Ok(text) => {
                    self.set_status(ConnectionStatus::Connected);
                    return match envelope::parse_body::<T>(&text) {
                        Ok(value) => Ok(value),
                        // success:false envelope — same mapping rules as a
                        // non-2xx status, including retry eligibility
                        Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                            attempt += 1;
                            self.backoff(&err, attempt, None, &cancel).await?;
                            continue;
                        }
                        Err(err) => Err(err),
                    };
                }
                Err((err, retry_after_ms)) => {
                    if err.is_cancelled() {
                        return Err(err);
                    }
                    if err.is_retryable() && attempt < self.retry.max_retries {
                        attempt += 1;
                        self.backoff(&err, attempt, retry_after_ms, &cancel).await?;
                        continue;
                    }
                    if err.code == ErrorCode::Network {
                        self.set_status(ConnectionStatus::Error);
                    }
                    return Err(err.with_context("attempts", i64::from(attempt + 1)));
                }
            }
        }
    }

    /// One send/receive cycle. Returns the body text of a 2xx response, or
    /// the mapped error plus any `Retry-After` hint.
    async fn attempt_once(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&Value>,
        timeout_ms: u64,
        cancel: &CancellationToken,
    ) -> Result<String, (AgentError, Option<u64>)> {
        if self.status() == ConnectionStatus::Disconnected {
            self.set_status(ConnectionStatus::Connecting);
        }

        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .header("X-API-Key", &self.api_key);
        if let Some(token) = self.auth_token.read().as_deref() {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let send = request.send();
        let response = tokio::select! {
            () = cancel.cancelled() => return Err((AgentError::cancelled(), None)),
            result = tokio::time::timeout(Duration::from_millis(timeout_ms), send) => {
                match result {
                    Err(_) => {
                        return Err((
                            AgentError::timeout(format!("request timed out after {timeout_ms}ms"))
                                .with_context("url", url.as_str()),
                            None,
                        ));
                    }
                    Ok(Err(e)) => {
                        // reqwest's own timeout also surfaces here
                        let err = if e.is_timeout() {
                            AgentError::timeout("request timed out").with_source(e)
                        } else {
                            AgentError::network("request failed to reach the server")
                                .with_source(e)
                        };
                        return Err((err.with_context("url", url.as_str()), None));
                    }
                    Ok(Ok(response)) => response,
                }
            }
        };

        let status = response.status();
        let retry_after_ms = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after_header);

        let text = response.text().await.map_err(|e| {
            (
                AgentError::network("failed to read response body").with_source(e),
                None,
            )
        })?;

        if status.is_success() {
            return Ok(text);
        }

        let message = envelope::error_message_from_body(&text);
        debug!(%status, %url, "request failed");
        Err((
            AgentError::from_status(status.as_u16(), message).with_context("url", url.as_str()),
            (status == StatusCode::TOO_MANY_REQUESTS).then_some(retry_after_ms).flatten(),
        ))
    }

    /// Sleep out the backoff window before the next attempt.
    ///
    /// Rate-limited failures back off from their larger base; a server
    /// `Retry-After` hint wins when it is longer.
    async fn backoff(
        &self,
        err: &AgentError,
        attempt: u32,
        retry_after_ms: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        let base = if err.code == ErrorCode::RateLimit {
            self.retry.rate_limit_base_delay_ms
        } else {
            self.retry.base_delay_ms
        };
        let backoff_ms = calculate_backoff_delay(attempt, base, self.retry.max_delay_ms);
        let delay_ms = retry_after_ms.map_or(backoff_ms, |ra| backoff_ms.max(ra));

        metrics::counter!("transport_retries_total", "code" => err.code.as_str()).increment(1);
        warn!(
            code = err.code.as_str(),
            attempt,
            max = self.retry.max_retries,
            delay_ms,
            "retrying request"
        );

        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(delay_ms)) => Ok(()),
            () = cancel.cancelled() => Err(AgentError::cancelled()),
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

impl std::fmt::Debug for TransportClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportClient")
            .field("base_url", &self.base_url.as_str())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay_ms: 1,
            rate_limit_base_delay_ms: 1,
            max_delay_ms: 10,
            jitter_factor: 0.0,
        }
    }

    fn test_client(server: &MockServer) -> TransportClient {
        TransportClient::new(TransportConfig {
            base_url: server.uri(),
            api_key: "test-key".into(),
            auth_token: Some("test-token".into()),
            request_timeout_ms: 5_000,
            retry: fast_retry(),
        })
        .unwrap()
    }

    #[test]
    fn invalid_base_url_is_invalid_config() {
        let err = TransportClient::new(TransportConfig {
            base_url: "not a url".into(),
            ..TransportConfig::default()
        })
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidConfig);
    }

    #[test]
    fn endpoint_joins_paths() {
        let client = TransportClient::new(TransportConfig {
            base_url: "https://api.example.test".into(),
            ..TransportConfig::default()
        })
        .unwrap();
        let url = client.endpoint("v1/sessions").unwrap();
        assert_eq!(url.as_str(), "https://api.example.test/v1/sessions");
    }

    #[test]
    fn initial_status_is_disconnected() {
        let client = TransportClient::new(TransportConfig::default()).unwrap();
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn auth_token_is_replaceable() {
        let client = TransportClient::new(TransportConfig::default()).unwrap();
        assert!(client.auth_token().is_none());
        client.set_auth_token(Some("tok".into()));
        assert_eq!(client.auth_token().as_deref(), Some("tok"));
        client.set_auth_token(None);
        assert!(client.auth_token().is_none());
    }

    #[tokio::test]
    async fn success_sends_auth_headers_and_unwraps_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/ping"))
            .and(header("X-API-Key", "test-key"))
            .and(header("Authorization", "Bearer test-token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({
                    "success": true,
                    "data": {"pong": true}
                })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let value: Value = client.request(Method::GET, "/v1/ping", None).await.unwrap();
        assert_eq!(value, json!({"pong": true}));
        assert_eq!(client.status(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn persistent_503_exhausts_retries_then_fails_network() {
        let server = MockServer::start().await;
        // 1 initial attempt + max_retries retries
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .expect(4)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client
            .request::<Value>(Method::POST, "/v1/chat", Some(&json!({"text": "hi"})))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Network);
        assert_eq!(err.context["attempts"], json!(4));
        assert_eq!(client.status(), ConnectionStatus::Error);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let value: Value = client.request(Method::GET, "/v1/flaky", None).await.unwrap();
        assert_eq!(value, json!({"ok": true}));
        assert_eq!(client.status(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn status_mapping_from_responses() {
        let server = MockServer::start().await;
        for (status, code) in [
            (400_u16, ErrorCode::InvalidConfig),
            (401, ErrorCode::Authentication),
            (403, ErrorCode::Authentication),
            (404, ErrorCode::Network),
        ] {
            let route = format!("/v1/s{status}");
            Mock::given(method("GET"))
                .and(path(route.as_str()))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;
            let client = test_client(&server);
            let err = client.request::<Value>(Method::GET, &route, None).await.unwrap_err();
            assert_eq!(err.code, code, "status {status}");
        }
    }

    #[tokio::test]
    async fn not_found_gets_default_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client
            .request::<Value>(Method::GET, "/v1/missing", None)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Network);
        assert_eq!(err.message, "resource not found");
    }

    #[tokio::test]
    async fn rate_limit_retries_then_surfaces_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/limited"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "success": false,
                "error": {"code": "RATE_LIMIT", "message": "slow down"}
            })))
            .expect(4)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client
            .request::<Value>(Method::GET, "/v1/limited", None)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::RateLimit);
        assert_eq!(err.message, "slow down");
    }

    #[tokio::test]
    async fn client_error_does_not_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/bad"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client
            .request::<Value>(Method::POST, "/v1/bad", Some(&json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidConfig);
    }

    #[tokio::test]
    async fn envelope_failure_body_on_200_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/soft-fail"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "error": {"code": "SESSION", "message": "session expired"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client
            .request::<Value>(Method::GET, "/v1/soft-fail", None)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Session);
        assert_eq!(err.message, "session expired");
    }

    #[tokio::test]
    async fn raw_text_body_passes_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/text"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let text: String = client.request(Method::GET, "/v1/text", None).await.unwrap();
        assert_eq!(text, "OK");
    }

    #[tokio::test]
    async fn slow_response_times_out_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/slow"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(Duration::from_millis(500)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client
            .request_with::<Value>(
                Method::GET,
                "/v1/slow",
                None,
                RequestOptions {
                    timeout_ms: Some(50),
                    cancel: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_and_is_flagged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/never"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let client = test_client(&server);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let err = client
            .request_with::<Value>(
                Method::GET,
                "/v1/never",
                None,
                RequestOptions {
                    timeout_ms: None,
                    cancel: Some(cancel),
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn unreachable_server_maps_to_network() {
        // Port from the dynamic range with nothing listening.
        let client = TransportClient::new(TransportConfig {
            base_url: "http://127.0.0.1:1".into(),
            api_key: "k".into(),
            auth_token: None,
            request_timeout_ms: 2_000,
            retry: RetryConfig {
                max_retries: 0,
                ..fast_retry()
            },
        })
        .unwrap();
        let err = client.request::<Value>(Method::GET, "/x", None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Network);
        assert!(err.source.is_some());
    }
}
