//! Configuration management.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default streaming record separator (NUL).
pub const DEFAULT_RECORD_SEPARATOR: &str = "\u{0000}";

/// Default streaming line feed.
pub const DEFAULT_LINE_FEED: &str = "\n";

/// Network timeouts and retry bounds for the dispatch pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds.
    pub read_timeout_secs: u64,
    /// Maximum number of attempts per request while the server asks for a retry.
    pub retry_times: u32,
    /// Wait between attempts when the server gives no `Retry-After`.
    pub retry_interval_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            read_timeout_secs: 5,
            retry_times: 3,
            retry_interval_secs: 5,
        }
    }
}

/// Characters negotiated for streamed responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub record_separator: Option<String>,
    pub line_feed: Option<String>,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            record_separator: Some(DEFAULT_RECORD_SEPARATOR.to_string()),
            line_feed: Some(DEFAULT_LINE_FEED.to_string()),
        }
    }
}

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            network: NetworkConfig::default(),
            streaming: StreamingConfig::default(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults.
    /// Environment variables win over file values.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.network.retry_times == 0 {
            return Err(CoreError::Config(
                "network.retry_times must be at least 1".to_string(),
            ));
        }
        if self.network.connect_timeout_secs == 0 || self.network.read_timeout_secs == 0 {
            return Err(CoreError::Config(
                "network timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("EDGE_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Some(retry_times) = parse_env("EDGE_RETRY_TIMES") {
            self.network.retry_times = retry_times;
        }
        if let Some(secs) = parse_env("EDGE_CONNECT_TIMEOUT_SECS") {
            self.network.connect_timeout_secs = secs;
        }
        if let Some(secs) = parse_env("EDGE_READ_TIMEOUT_SECS") {
            self.network.read_timeout_secs = secs;
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<T>().ok())
}
