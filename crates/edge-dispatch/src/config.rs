//! Dispatch configuration.

use edge_core::Config;
use std::time::Duration;

/// Runtime knobs for the hit processor and transport.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// Time allowed to read the response.
    pub read_timeout: Duration,
    /// Total transport attempts per hit, including the first.
    pub retry_times: u32,
    /// Delay between attempts when the server sends no Retry-After.
    pub retry_interval: Duration,
    /// Streaming record separator; streaming needs both characters.
    pub record_separator: Option<String>,
    /// Streaming line feed.
    pub line_feed: Option<String>,
    /// Name of the durable hit queue.
    pub queue_name: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for DispatchConfig {
    fn from(config: &Config) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.network.connect_timeout_secs),
            read_timeout: Duration::from_secs(config.network.read_timeout_secs),
            retry_times: config.network.retry_times.max(1),
            retry_interval: Duration::from_secs(config.network.retry_interval_secs),
            record_separator: config.streaming.record_separator.clone(),
            line_feed: config.streaming.line_feed.clone(),
            queue_name: "edge".to_string(),
        }
    }
}
