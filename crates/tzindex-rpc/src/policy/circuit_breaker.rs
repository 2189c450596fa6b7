//! Closed / open / half-open breaker in front of the node.
//!
//! - `Closed` → `Open` after `failure_threshold` consecutive failures
//! - `Open` → `HalfOpen` once `open_duration` has passed
//! - `HalfOpen` → `Closed` after `success_threshold` trial request successes
//! - `HalfOpen` → `Open` on any failed trial request

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(with = "super::duration_ms")]
    pub open_duration: Duration,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 8,
            open_duration: Duration::from_secs(10),
            success_threshold: 1,
        }
    }
}

struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
    trips: u64,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    url: Arc<str>,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    pub fn new(url: &str, config: CircuitBreakerConfig) -> Self {
        Self {
            url: Arc::from(url),
            config,
            inner: Arc::new(Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
                trips: 0,
            })),
        }
    }

    /// Current state; an expired `Open` becomes `HalfOpen` here.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == CircuitState::Open
            && inner
                .opened_at
                .is_some_and(|t| t.elapsed() >= self.config.open_duration)
        {
            inner.state = CircuitState::HalfOpen;
            inner.successes = 0;
            tracing::info!(url = %self.url, "node circuit half-open, probing");
        }
        inner.state
    }

    /// Fails fast while the circuit is open.
    pub fn check(&self) -> Result<(), TransportError> {
        match self.state() {
            CircuitState::Open => Err(TransportError::CircuitOpen {
                url: self.url.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Number of times the breaker has opened.
    pub fn trips(&self) -> u64 {
        self.inner.lock().unwrap().trips
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.opened_at = None;
                    tracing::info!(url = %self.url, "node circuit closed");
                }
            }
            CircuitState::Closed => inner.failures = 0,
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.trips += 1;
                    tracing::warn!(url = %self.url, failures = inner.failures, "node circuit open");
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.successes = 0;
                inner.trips += 1;
                tracing::warn!(url = %self.url, "trial request failed, circuit open");
            }
            CircuitState::Open => {}
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("url", &self.url)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, open: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "http://node",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                open_duration: open,
                success_threshold: 1,
            },
        )
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let c = breaker(3, Duration::from_secs(60));
        c.record_failure();
        c.record_failure();
        c.record_success();
        c.record_failure();
        c.record_failure();
        assert_eq!(c.state(), CircuitState::Closed);
        c.record_failure();
        assert_eq!(c.state(), CircuitState::Open);
        assert!(matches!(c.check(), Err(TransportError::CircuitOpen { .. })));
        assert_eq!(c.trips(), 1);
    }

    #[test]
    fn half_open_trial_outcomes() {
        let c = breaker(1, Duration::ZERO);
        c.record_failure();
        assert_eq!(c.state(), CircuitState::HalfOpen);
        c.record_failure();
        assert_eq!(c.trips(), 2);
        assert_eq!(c.state(), CircuitState::HalfOpen);
        c.record_success();
        assert_eq!(c.state(), CircuitState::Closed);
        assert!(c.check().is_ok());
    }
}
