//! The `RestTransport` trait: GET requests and chunked JSON streams against
//! a node's REST interface.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::TransportError;

/// Stream of JSON documents from a chunked response.
pub type JsonStream = BoxStream<'static, Result<Value, TransportError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    /// Probing after an outage.
    Degraded,
    /// Circuit open.
    Unhealthy,
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Object safe so it can be shared as `Arc<dyn RestTransport>`.
#[async_trait]
pub trait RestTransport: Send + Sync + 'static {
    /// GET `path` (relative to the node URL) and parse the body as JSON.
    async fn get(&self, path: &str) -> Result<Value, TransportError>;

    /// GET `path` and yield one JSON document per line of the response.
    async fn stream(&self, path: &str) -> Result<JsonStream, TransportError>;

    fn health(&self) -> HealthStatus {
        HealthStatus::Unknown
    }

    fn url(&self) -> &str;
}

/// Split complete newline-terminated documents off the front of `buf`.
pub(crate) fn take_line(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    loop {
        let pos = buf.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = buf.drain(..=pos).collect();
        if !line.iter().all(u8::is_ascii_whitespace) {
            return Some(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_lines_only() {
        let mut buf = b"{\"a\":1}\n\n{\"b\":".to_vec();
        assert_eq!(take_line(&mut buf).unwrap(), b"{\"a\":1}\n");
        assert!(take_line(&mut buf).is_none());
        buf.extend_from_slice(b"2}\n");
        assert_eq!(take_line(&mut buf).unwrap(), b"{\"b\":2}\n");
        assert!(buf.is_empty());
    }
}
