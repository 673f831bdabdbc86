//! Structured logging setup for the KMS bridge service

use kmsbridge_config::LogFormat;
use tracing_subscriber::{
    filter::Directive,
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// HTTP stack targets kept at warn unless `RUST_LOG` says otherwise
const QUIET_TARGETS: [&str; 3] = ["hyper=warn", "axum=warn", "tower=warn"];

/// Initialize logging in the configured format
pub fn init(service_name: &str, default_level: &str, format: LogFormat) {
    match format {
        LogFormat::Json => init_logging(service_name, default_level),
        LogFormat::Console => init_console_logging(service_name, default_level),
    }
}

/// Build the event filter: `RUST_LOG` wins, otherwise the configured level
/// with the HTTP stack quieted.
pub fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        QUIET_TARGETS
            .iter()
            .filter_map(|target| target.parse::<Directive>().ok())
            .fold(EnvFilter::new(default_level), EnvFilter::add_directive)
    })
}

/// Initialize JSON logging for production
///
/// Each line carries target, file, line and the current request span, so
/// request ids follow every event emitted while handling a request.
pub fn init_logging(service_name: &str, default_level: &str) {
    tracing_subscriber::registry()
        .with(build_filter(default_level))
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_current_span(true)
                .with_span_list(false),
        )
        .init();

    tracing::info!(service = service_name, "Logging initialized");
}

/// Initialize human readable logging (for development)
pub fn init_console_logging(service_name: &str, default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(default_level))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(service = service_name, "Console logging initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_targets_are_valid_directives() {
        for target in QUIET_TARGETS {
            assert!(target.parse::<Directive>().is_ok(), "{target}");
        }
    }

    #[test]
    fn test_filter_includes_default_level() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let filter = build_filter("debug").to_string();
        assert!(filter.contains("debug"));
        assert!(filter.contains("hyper=warn"));
    }
}
