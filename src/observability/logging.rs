//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global `tracing` subscriber once at startup
//! - Pick human-readable or JSON output from configuration
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level when set
//! - Session log lines from tracked tasks use the `monitor_hub::session` target,
//!   so they can be filtered independently

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::ObservabilityConfig;

/// Default directives when `RUST_LOG` is not set.
fn default_directives(level: &str) -> String {
    format!("monitor_hub={level},monitor_hub::session={level},tower_http=info")
}

/// Install the global subscriber. Returns `false` if one was already installed.
pub fn init_logging(config: &ObservabilityConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.log_level)));

    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true);
    let layer = if config.json_logs {
        layer.json().flatten_event(true).boxed()
    } else {
        layer.boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_parse() {
        let directives = default_directives("debug");
        assert!(directives.contains("monitor_hub=debug"));
        assert!(EnvFilter::try_new(directives).is_ok());
    }
}
