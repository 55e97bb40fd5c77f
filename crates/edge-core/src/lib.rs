//! Core types, configuration, and utilities shared by the edge dispatch crates.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, NetworkConfig, StreamingConfig, DEFAULT_LINE_FEED, DEFAULT_LOG_LEVEL,
    DEFAULT_RECORD_SEPARATOR,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_at, init_logging_for_service, parse_level};
pub use paths::Paths;
