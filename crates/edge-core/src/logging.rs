//! Logging initialization.
//!
//! Thin wrappers over the observability crate so binaries only pick a
//! service name and a level.

/// Initialize logging for the default `edge-dispatch` service.
///
/// ```ignore
/// init_logging("info");
/// tracing::info!("pipeline started");
/// ```
pub fn init_logging(level: &str) {
    init_logging_for_service("edge-dispatch", level);
}

/// Initialize logging with a custom service name.
pub fn init_logging_for_service(service_name: &str, level: &str) {
    observability::init_with_config(observability::LogConfig {
        service_name: service_name.into(),
        default_level: parse_level(level).to_string().to_lowercase(),
        also_stderr: true,
        ..Default::default()
    });
}

/// Initialize logging into `paths.log_file()` instead of the default location.
pub fn init_logging_at(service_name: &str, level: &str, paths: &crate::Paths) {
    observability::init_with_config(observability::LogConfig {
        service_name: service_name.into(),
        default_level: parse_level(level).to_string().to_lowercase(),
        log_path: Some(paths.log_file()),
        also_stderr: true,
    });
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
