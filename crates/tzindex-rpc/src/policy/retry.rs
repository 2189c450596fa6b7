//! Exponential backoff with a cap and jitter.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    #[serde(with = "super::duration_ms")]
    pub initial_backoff: Duration,
    #[serde(with = "super::duration_ms")]
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Spread delays by up to `±jitter_fraction * delay`.
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(15),
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

/// Stateless policy: maps an attempt number to a delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before the `attempt`-th retry (1-based), or `None` once
    /// retries are exhausted.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_retries {
            return None;
        }
        let c = &self.config;
        let base = c.initial_backoff.as_millis() as f64 * c.multiplier.powi(attempt as i32 - 1);
        let capped = base.min(c.max_backoff.as_millis() as f64);
        let spread = capped * c.jitter_fraction * (2.0 * unit_noise() - 1.0);
        Some(Duration::from_millis((capped + spread).max(0.0) as u64))
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.config.max_retries
    }
}

/// Cheap noise in [0, 1) from the clock's sub-second nanos.
fn unit_noise() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    f64::from(nanos % 1_000_000) / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32, max_backoff_ms: u64, jitter: f64) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(max_backoff_ms),
            multiplier: 2.0,
            jitter_fraction: jitter,
        })
    }

    #[test]
    fn doubles_until_exhausted() {
        let p = policy(3, 30_000, 0.0);
        assert_eq!(p.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(p.next_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(p.next_delay(3), Some(Duration::from_millis(400)));
        assert_eq!(p.next_delay(4), None);
        assert_eq!(p.next_delay(0), None);
    }

    #[test]
    fn capped_and_jittered() {
        let p = policy(10, 500, 0.0);
        assert_eq!(p.next_delay(8), Some(Duration::from_millis(500)));

        let p = policy(10, 500, 0.2);
        let d = p.next_delay(8).unwrap();
        assert!(d >= Duration::from_millis(400) && d <= Duration::from_millis(600), "{d:?}");
    }

    #[test]
    fn config_from_json() {
        let c: RetryConfig =
            serde_json::from_str(r#"{"max_retries":2,"initial_backoff":50}"#).unwrap();
        assert_eq!(c.max_retries, 2);
        assert_eq!(c.initial_backoff, Duration::from_millis(50));
        assert_eq!(c.max_backoff, RetryConfig::default().max_backoff);
        assert!(RetryPolicy::new(c.clone()).should_retry(2));
        assert!(!RetryPolicy::new(c).should_retry(3));
    }
}
