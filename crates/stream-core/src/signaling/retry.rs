//! Retrying HTTP client for the signaling service
//!
//! Outbound calls go through an [`HttpTransport`]; [`RetryingClient`] wraps it
//! with bounded exponential backoff. Only connection-level failures are retried;
//! a response carrying an error status is a completed request and is handed
//! back as-is for the caller to interpret.
//!
//! # Backoff Strategy
//!
//! The delay before retry `n` (1-based) is
//!
//! ```text
//! min(base_delay * 2^n + jitter, max_delay)      jitter ∈ [0, max_jitter)
//! ```
//!
//! With the defaults (250 ms base, 1 s jitter, 4 s cap, 3 retries) that is
//! `min(2^n / 4 + rand[0,1), 4)` seconds, and a request is attempted at most
//! four times before [`StreamError::RetriesExhausted`] is returned.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::error::{StreamError, StreamResult};

/// A fully described outbound request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// A completed response, whatever its status
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> StreamResult<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Turn a non-success response into [`StreamError::HttpStatus`]
    pub fn error_for_status(self) -> StreamResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(StreamError::HttpStatus {
                status: self.status,
                body: self.body,
            })
        }
    }
}

/// Executes one request attempt.
///
/// Implementations must report failures to complete the request as
/// [`StreamError::NetworkError`] and return every received response as `Ok`.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &HttpRequest) -> StreamResult<HttpResponse>;
}

/// [`HttpTransport`] backed by `reqwest`
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &HttpRequest) -> StreamResult<HttpResponse> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| StreamError::network_error(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| StreamError::network_error(e.to_string()))?;

        Ok(HttpResponse { status, body })
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Multiplied by `2^n` for retry `n`
    pub base_delay: Duration,
    /// Upper bound for a single delay, jitter included
    pub max_delay: Duration,
    /// Random jitter added on top of the exponential part
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Total attempts including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry `retry` given a jitter fraction in `[0, 1)`
    pub fn backoff(&self, retry: u32, jitter_fraction: f64) -> Duration {
        let exponential = self.base_delay.as_secs_f64() * 2f64.powi(retry.min(31) as i32);
        let jitter = self.max_jitter.as_secs_f64() * jitter_fraction.clamp(0.0, 1.0);
        let capped = (exponential + jitter).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Delay before retry `retry` with fresh random jitter
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff(retry, rand::random::<f64>())
    }
}

/// HTTP client that absorbs transient connection failures
#[derive(Clone)]
pub struct RetryingClient {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(transport: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send with the retry budget of the configured policy.
    ///
    /// Fails only once every attempt failed at the connection level, with
    /// [`StreamError::RetriesExhausted`] wrapping the last failure.
    pub async fn send(&self, request: &HttpRequest) -> StreamResult<HttpResponse> {
        let mut attempt: u32 = 1;

        loop {
            debug!(
                method = %request.method,
                url = %request.url,
                attempt = attempt,
                max_attempts = self.policy.max_attempts(),
                "Sending signaling request"
            );

            match self.transport.execute(request).await {
                Ok(response) => {
                    if attempt > 1 {
                        debug!(url = %request.url, attempt = attempt, "Request succeeded after retries");
                    }
                    return Ok(response);
                }
                Err(e) if e.is_recoverable() && attempt <= self.policy.max_retries => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        url = %request.url,
                        attempt = attempt,
                        max_retries = self.policy.max_retries,
                        error = %e,
                        next_delay_ms = delay.as_millis() as u64,
                        "Request failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_recoverable() => {
                    error!(url = %request.url, attempts = attempt, error = %e, "Max retries exceeded");
                    return Err(StreamError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send exactly once, bypassing the retry budget
    pub async fn send_once(&self, request: &HttpRequest) -> StreamResult<HttpResponse> {
        debug!(method = %request.method, url = %request.url, "Sending signaling request (single attempt)");
        self.transport.execute(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingHttp;
    use tokio::time::Instant;

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.backoff(1, 0.0), Duration::from_millis(500));
        assert_eq!(policy.backoff(2, 0.0), Duration::from_secs(1));
        assert_eq!(policy.backoff(3, 0.0), Duration::from_secs(2));
        assert_eq!(policy.backoff(4, 0.5), Duration::from_secs(4));
        assert_eq!(policy.backoff(10, 0.0), Duration::from_secs(4));
        assert!(policy.delay_for(1) < Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_transport_is_attempted_four_times() {
        let http = Arc::new(RecordingHttp::new());
        http.fail_connections(usize::MAX);
        let client = RetryingClient::new(http.clone(), RetryPolicy::default());

        let started = Instant::now();
        let err = client
            .send(&HttpRequest::new(Method::POST, "http://service/talks/streams"))
            .await
            .unwrap_err();

        assert_eq!(http.attempts(), 4);
        match err {
            StreamError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, StreamError::NetworkError { .. }));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert!(started.elapsed() <= Duration::from_secs(12) + Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_recovers() {
        let http = Arc::new(RecordingHttp::new());
        http.fail_connections(2);
        let client = RetryingClient::new(http.clone(), RetryPolicy::default());

        let response = client
            .send(&HttpRequest::new(Method::POST, "http://service/talks/streams"))
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(http.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn error_status_is_returned_without_retry() {
        let http = Arc::new(RecordingHttp::new());
        http.respond_with_status(500, r#"{"kind":"InternalServerError"}"#);
        let client = RetryingClient::new(http.clone(), RetryPolicy::default());

        let response = client
            .send(&HttpRequest::new(Method::POST, "http://service/talks/streams"))
            .await
            .unwrap();

        assert_eq!(response.status, 500);
        assert_eq!(http.attempts(), 1);
        assert!(response.error_for_status().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn send_once_does_not_retry() {
        let http = Arc::new(RecordingHttp::new());
        http.fail_connections(1);
        let client = RetryingClient::new(http.clone(), RetryPolicy::default());

        let err = client
            .send_once(&HttpRequest::new(Method::DELETE, "http://service/talks/streams/s1"))
            .await
            .unwrap_err();

        assert!(err.is_recoverable());
        assert_eq!(http.attempts(), 1);
    }
}
