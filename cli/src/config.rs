//! Config file loading and tracing initialisation.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tzindex_crawler::CrawlerConfig;

/// Top-level config file for the `tzindex` binary.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Node RPC endpoint. The `--rpc` flag wins over this.
    #[serde(default)]
    pub rpc: Option<String>,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
}

impl AppConfig {
    /// Read a JSON config file. A missing path yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file '{}'", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file '{}'", path.display()))
    }
}

/// Log level per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: crate name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs instead of human-readable text
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Filter directives, e.g. `info,tzindex_crawler=debug`.
    pub fn directives(&self) -> String {
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();
        let mut directives = self.level.clone();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Initialise tracing once at startup. `RUST_LOG` overrides the config.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directives()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn directives_include_components() {
        let mut log = LogConfig::default();
        log.components.insert("tzindex-crawler".into(), "debug".into());
        log.components.insert("tzindex-rpc".into(), "warn".into());
        assert_eq!(log.directives(), "info,tzindex_crawler=debug,tzindex_rpc=warn");
    }

    #[test]
    fn missing_path_gives_defaults() {
        let cfg = AppConfig::load(None).unwrap();
        assert!(cfg.rpc.is_none());
        assert_eq!(cfg.log.level, "info");
        assert_eq!(cfg.crawler.queue, 16);
    }

    #[test]
    fn loads_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "rpc": "http://127.0.0.1:8732",
                "log": {{ "level": "debug", "json": true }},
                "crawler": {{ "queue": 4, "stop_block": 100, "poll_interval": 250 }}
            }}"#
        )
        .unwrap();

        let cfg = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.rpc.as_deref(), Some("http://127.0.0.1:8732"));
        assert_eq!(cfg.log.level, "debug");
        assert!(cfg.log.json);
        assert_eq!(cfg.crawler.queue, 4);
        assert_eq!(cfg.crawler.stop_block, Some(100));
        assert_eq!(cfg.crawler.poll_interval.as_millis(), 250);
        assert!(cfg.crawler.enable_monitor);
    }

    #[test]
    fn malformed_file_names_the_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = AppConfig::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("parsing config file"));
    }
}
