//! Crawler runtime state.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrawlerState {
    /// Not yet started.
    Idle,
    /// Catching up to the node head.
    Syncing,
    /// Following the node head.
    Synced,
    /// Disconnecting stale blocks after a fork.
    RollingBack,
    /// Draining in-flight work.
    Stopping,
    Stopped,
    /// Halted on a fatal error.
    Failed,
}

impl CrawlerState {
    /// Returns `true` while blocks are being fetched and applied.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Syncing | Self::Synced | Self::RollingBack)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl std::fmt::Display for CrawlerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Syncing => write!(f, "syncing"),
            Self::Synced => write!(f, "synced"),
            Self::RollingBack => write!(f, "rolling-back"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_states() {
        assert!(CrawlerState::Syncing.is_running());
        assert!(CrawlerState::RollingBack.is_running());
        assert!(!CrawlerState::Idle.is_running());
        assert!(CrawlerState::Failed.is_terminal());
        assert_eq!(CrawlerState::RollingBack.to_string(), "rolling-back");
    }
}
