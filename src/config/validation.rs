//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacities > 0, intervals > 0, sample rate in [0, 1])
//! - Validate addresses and the audit endpoint URL
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function: `HubConfig → Result<(), Vec<ValidationError>>`

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::HubConfig;

/// A single semantic problem, keyed by the dotted field path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &HubConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("'{}' is not a socket address", config.server.bind_address),
        ));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new("server.request_timeout_secs", "must be greater than 0"));
    }
    let prefix = config.server.route_prefix.trim_end_matches('/');
    if !prefix.starts_with('/') || prefix.len() < 2 {
        errors.push(ValidationError::new("server.route_prefix", "must start with '/' and be non-root"));
    }

    let monitor = &config.monitor;
    if monitor.history_task_limit == 0 {
        errors.push(ValidationError::new("monitor.history_task_limit", "must be greater than 0"));
    }
    if monitor.history_request_limit == 0 {
        errors.push(ValidationError::new("monitor.history_request_limit", "must be greater than 0"));
    }
    if !(0.0..=1.0).contains(&monitor.sample_rate) {
        errors.push(ValidationError::new("monitor.sample_rate", "must be between 0.0 and 1.0"));
    }
    for (field, value) in [
        ("monitor.heartbeat_interval_secs", monitor.heartbeat_interval_secs),
        ("monitor.history_retention_secs", monitor.history_retention_secs),
        ("monitor.cleanup_interval_secs", monitor.cleanup_interval_secs),
        ("monitor.stats_interval_ms", monitor.stats_interval_ms),
        ("monitor.log_sync_interval_ms", monitor.log_sync_interval_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    let realtime = &config.realtime;
    if realtime.queue_capacity == 0 {
        errors.push(ValidationError::new("realtime.queue_capacity", "must be greater than 0"));
    }
    if realtime.keepalive_interval_secs == 0 {
        errors.push(ValidationError::new("realtime.keepalive_interval_secs", "must be greater than 0"));
    }
    if realtime.idle_timeout_secs <= realtime.keepalive_interval_secs {
        errors.push(ValidationError::new(
            "realtime.idle_timeout_secs",
            "must be longer than the keep-alive interval",
        ));
    }
    if realtime.max_message_bytes == 0 {
        errors.push(ValidationError::new("realtime.max_message_bytes", "must be greater than 0"));
    }

    if config.audit.enabled {
        match url::Url::parse(&config.audit.endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(ValidationError::new(
                "audit.endpoint",
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new("audit.endpoint", e.to_string())),
        }
        if config.audit.timeout_secs == 0 {
            errors.push(ValidationError::new("audit.timeout_secs", "must be greater than 0"));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
