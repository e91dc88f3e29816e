//! Resilient outbound HTTP client
//!
//! Wraps reqwest with two composed guards: an exponential-backoff retry loop
//! and a circuit breaker around the whole loop, so a full retry sequence
//! counts as a single outcome against the breaker. Either guard can be
//! disabled at startup.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use super::circuit::CircuitBreaker;
use crate::metrics::Metrics;

/// Errors surfaced by the LLM transport
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM triage is not enabled")]
    Disabled,
    #[error("circuit breaker is open")]
    CircuitOpen,
    #[error("request timed out")]
    Timeout,
    #[error("authentication rejected (HTTP {0})")]
    Auth(u16),
    #[error("rate limited")]
    RateLimited,
    #[error("server error (HTTP {0})")]
    Server(u16),
    #[error("HTTP error {0}")]
    Http(u16),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("invalid response: {0}")]
    Parse(String),
}

impl LlmError {
    /// Label used for the error metrics counter
    pub fn metric_kind(&self) -> &'static str {
        match self {
            LlmError::Disabled => "disabled",
            LlmError::CircuitOpen => "circuit_open",
            LlmError::Timeout => "timeout",
            LlmError::Auth(_) => "auth",
            LlmError::RateLimited => "rate_limit",
            LlmError::Server(_) => "server_error",
            LlmError::Http(_) => "http_error",
            LlmError::Connection(_) => "connection",
            LlmError::Parse(_) => "parse",
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Connection(err.to_string())
        }
    }
}

/// Retry tuning
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Additional attempts after the first; 0 disables retrying
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(5),
        }
    }
}

/// HTTP client with retry and circuit breaking
pub struct ResilientClient {
    http: reqwest::Client,
    breaker: Option<CircuitBreaker>,
    retry: RetryConfig,
    metrics: Arc<Metrics>,
}

impl ResilientClient {
    pub fn new(
        timeout: Duration,
        retry: RetryConfig,
        breaker: Option<CircuitBreaker>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("iocwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            http,
            breaker,
            retry,
            metrics,
        }
    }

    /// Builder for a POST request against the wrapped client.
    pub fn post(&self, url: &str) -> reqwest::RequestBuilder {
        self.http.post(url)
    }

    /// Execute a request through both guards.
    pub async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response, LlmError> {
        let Some(breaker) = &self.breaker else {
            return self.execute_with_retry(request).await;
        };

        if !breaker.try_acquire() {
            self.metrics.record_error("circuit_open");
            return Err(LlmError::CircuitOpen);
        }

        match self.execute_with_retry(request).await {
            Ok(resp) => {
                breaker.record_success();
                Ok(resp)
            }
            Err(e) => {
                breaker.record_failure();
                Err(e)
            }
        }
    }

    async fn execute_with_retry(
        &self,
        request: reqwest::Request,
    ) -> Result<reqwest::Response, LlmError> {
        let mut interval = self.retry.initial_interval;
        let mut attempt: u32 = 0;

        loop {
            // Clone per attempt so the body is rewound
            let req = request
                .try_clone()
                .ok_or_else(|| LlmError::Parse("request body is not replayable".to_string()))?;

            let outcome = match self.http.execute(req).await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if resp.status().is_success() {
                        return Ok(resp);
                    }
                    let err = classify_status(status);
                    let retryable = matches!(status, 429 | 500 | 502 | 503 | 504);
                    (err, retryable)
                }
                Err(e) => {
                    let retryable = e.is_timeout() || e.is_connect();
                    (LlmError::from(e), retryable)
                }
            };

            let (err, retryable) = outcome;
            self.metrics.record_error(err.metric_kind());

            if !retryable || attempt >= self.retry.max_retries {
                return Err(err);
            }

            attempt += 1;
            debug!(
                "retrying LLM request after {:?} (attempt {}/{}): {}",
                interval, attempt, self.retry.max_retries, err
            );
            tokio::time::sleep(interval).await;
            interval = next_interval(interval, self.retry.max_interval);
        }
    }
}

fn classify_status(status: u16) -> LlmError {
    match status {
        401 | 403 => LlmError::Auth(status),
        429 => LlmError::RateLimited,
        500 | 502 | 503 | 504 => LlmError::Server(status),
        other => {
            warn!("LLM API returned HTTP {}", other);
            LlmError::Http(other)
        }
    }
}

fn next_interval(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}
