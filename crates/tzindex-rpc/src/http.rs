//! REST client backed by `reqwest`, with retry and a circuit breaker.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;
use crate::policy::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig, RetryPolicy};
use crate::transport::{take_line, HealthStatus, JsonStream, RestTransport};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Per-request timeout. Streams are not subject to it.
    #[serde(with = "crate::policy::duration_ms")]
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            request_timeout: Duration::from_secs(30),
            user_agent: concat!("tzindex/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

pub struct HttpClient {
    url: String,
    http: reqwest::Client,
    retry: RetryPolicy,
    circuit: CircuitBreaker,
    request_timeout: Duration,
}

impl HttpClient {
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, TransportError> {
        let url = url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TransportError::Other(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            circuit: CircuitBreaker::new(&url, config.circuit_breaker),
            retry: RetryPolicy::new(config.retry),
            request_timeout: config.request_timeout,
            http,
            url,
        })
    }

    pub fn with_defaults(url: impl Into<String>) -> Result<Self, TransportError> {
        Self::new(url, HttpClientConfig::default())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url, path.trim_start_matches('/'))
    }

    async fn open(
        &self,
        path: &str,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, TransportError> {
        let timeout_ms = timeout.map(|t| t.as_millis() as u64).unwrap_or(0);
        let mut req = self.http.get(self.endpoint(path));
        if let Some(t) = timeout {
            req = req.timeout(t);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, timeout_ms))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(TransportError::NotFound {
                path: path.to_string(),
            });
        }
        let body = resp.text().await.unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            path: path.to_string(),
            body,
        })
    }

    async fn get_once(&self, path: &str) -> Result<Value, TransportError> {
        let resp = self.open(path, Some(self.request_timeout)).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(e, self.request_timeout.as_millis() as u64))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Run `f` under the breaker, retrying transient failures.
    async fn with_retry<T, F, Fut>(&self, path: &str, f: F) -> Result<T, TransportError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, TransportError>>,
    {
        self.circuit.check()?;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match f().await {
                Ok(v) => {
                    self.circuit.record_success();
                    return Ok(v);
                }
                Err(e) if e.is_retryable() => {
                    self.circuit.record_failure();
                    let Some(delay) = self.retry.next_delay(attempt) else {
                        tracing::error!(attempt, error = %e, path, "node request failed, retries exhausted");
                        return Err(e);
                    };
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        path,
                        "retrying node request"
                    );
                    tokio::time::sleep(delay).await;
                    self.circuit.check()?;
                }
                Err(e) => {
                    // a 404 or bad payload still proves the node is reachable
                    self.circuit.record_success();
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl RestTransport for HttpClient {
    async fn get(&self, path: &str) -> Result<Value, TransportError> {
        self.with_retry(path, || self.get_once(path)).await
    }

    async fn stream(&self, path: &str) -> Result<JsonStream, TransportError> {
        let resp = self.with_retry(path, || self.open(path, None)).await?;
        let body = resp.bytes_stream().boxed();
        let lines = futures::stream::unfold(
            (body, Vec::<u8>::new(), false),
            |(mut body, mut buf, done)| async move {
                if done {
                    return None;
                }
                loop {
                    if let Some(line) = take_line(&mut buf) {
                        let item = serde_json::from_slice(&line).map_err(TransportError::from);
                        return Some((item, (body, buf, false)));
                    }
                    match body.next().await {
                        Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                        Some(Err(e)) => {
                            return Some((Err(TransportError::Http(e.to_string())), (body, buf, true)))
                        }
                        None if buf.iter().all(u8::is_ascii_whitespace) => return None,
                        None => {
                            let rest = std::mem::take(&mut buf);
                            let item = serde_json::from_slice(&rest).map_err(TransportError::from);
                            return Some((item, (body, buf, true)));
                        }
                    }
                }
            },
        );
        Ok(lines.boxed())
    }

    fn health(&self) -> HealthStatus {
        match self.circuit.state() {
            CircuitState::Open => HealthStatus::Unhealthy,
            CircuitState::HalfOpen => HealthStatus::Degraded,
            CircuitState::Closed => HealthStatus::Healthy,
        }
    }

    fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_paths() {
        let c = HttpClient::with_defaults("http://127.0.0.1:8732/").unwrap();
        assert_eq!(c.url(), "http://127.0.0.1:8732");
        assert_eq!(
            c.endpoint("/chains/main/blocks/head"),
            "http://127.0.0.1:8732/chains/main/blocks/head"
        );
        assert_eq!(c.health(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn unreachable_node_fails_after_retries() {
        let mut config = HttpClientConfig::default();
        config.retry.max_retries = 1;
        config.retry.initial_backoff = Duration::from_millis(1);
        config.request_timeout = Duration::from_millis(500);
        // port 9 (discard) is closed on test hosts
        let c = HttpClient::new("http://127.0.0.1:9", config).unwrap();
        let err = c.get("version").await.unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }
}
