//! # sessync-logging
//!
//! Structured logging with `tracing`.
//!
//! - [`init_subscriber`] installs the global subscriber from [`LoggingSettings`]
//! - [`capture_logs`] installs a thread-local capture layer for test assertions

#![deny(unsafe_code)]

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

use sessync_settings::LoggingSettings;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured level. Output goes to stderr, either
/// compact text or JSON lines. Subsequent calls are no-ops.
pub fn init_subscriber(settings: &LoggingSettings) {
    let filter = build_filter(&settings.level);

    // try_init fails when a global subscriber is already set
    if settings.json {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init();
    }
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        init_subscriber(&LoggingSettings::default());
        init_subscriber(&LoggingSettings {
            level: "debug".into(),
            json: true,
        });
    }

    #[test]
    fn invalid_level_falls_back() {
        let filter = build_filter("[[[not a directive");
        assert!(!filter.to_string().is_empty());
    }
}
