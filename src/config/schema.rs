//! Configuration schema definitions.
//!
//! Every section defaults field-by-field, so a minimal (or empty) TOML file
//! yields a working hub.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the monitoring hub service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HubConfig {
    /// HTTP listener for the query surface.
    pub server: ServerConfig,

    /// History capacities, sampling and background intervals.
    pub monitor: MonitorConfig,

    /// Push-connection limits.
    pub realtime: RealtimeConfig,

    /// Optional long-retention search backend.
    pub audit: AuditConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:9100").
    pub bind_address: String,

    /// Per-request timeout for the query surface.
    pub request_timeout_secs: u64,

    /// Path prefix for the monitoring routes.
    pub route_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:9100".to_string(),
            request_timeout_secs: 30,
            route_prefix: "/debug".to_string(),
        }
    }
}

/// Tracking behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Ring buffer capacity for finished tasks.
    pub history_task_limit: usize,

    /// Ring buffer capacity for finished requests.
    pub history_request_limit: usize,

    /// Start the stats broadcaster and accept push connections.
    pub enable_realtime: bool,

    /// Interval advertised to clients for heartbeats.
    pub heartbeat_interval_secs: u64,

    /// Refresh process CPU/memory figures on stats reads.
    pub enable_performance_monitor: bool,

    /// Fraction of inbound requests traced by the middleware (0.0 - 1.0).
    pub sample_rate: f64,

    /// Finished entries older than this are swept from history.
    pub history_retention_secs: u64,

    /// How often the history sweep runs.
    pub cleanup_interval_secs: u64,

    /// Stats broadcast period.
    pub stats_interval_ms: u64,

    /// How often a running task's session logs are copied into its trace.
    pub log_sync_interval_ms: u64,

    /// Capture a call stack when a task starts and when it fails.
    pub capture_stacks: bool,

    /// How many recent history entries request search scans.
    pub search_history_window: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            history_task_limit: 200,
            history_request_limit: 100,
            enable_realtime: true,
            heartbeat_interval_secs: 30,
            enable_performance_monitor: true,
            sample_rate: 1.0,
            history_retention_secs: 1800,
            cleanup_interval_secs: 300,
            stats_interval_ms: 1000,
            log_sync_interval_ms: 2000,
            capture_stacks: true,
            search_history_window: 1000,
        }
    }
}

impl MonitorConfig {
    pub fn history_retention(&self) -> Duration {
        Duration::from_secs(self.history_retention_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    pub fn log_sync_interval(&self) -> Duration {
        Duration::from_millis(self.log_sync_interval_ms)
    }
}

/// Push-connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Outbound queue capacity per subscriber.
    pub queue_capacity: usize,

    /// Keep-alive ping period.
    pub keepalive_interval_secs: u64,

    /// A connection with no inbound frame for this long is closed.
    pub idle_timeout_secs: u64,

    /// Largest accepted inbound control message.
    pub max_message_bytes: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            keepalive_interval_secs: 54,
            idle_timeout_secs: 60,
            max_message_bytes: 4096,
        }
    }
}

impl RealtimeConfig {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// External audit backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,

    /// Absolute http(s) URL accepting a JSON search query.
    pub endpoint: String,

    pub timeout_secs: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            timeout_secs: 5,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` overrides it.
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json_logs: bool,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9101".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: HubConfig = toml::from_str("").unwrap();
        assert_eq!(config.monitor.history_task_limit, 200);
        assert_eq!(config.monitor.history_request_limit, 100);
        assert_eq!(config.realtime.queue_capacity, 256);
        assert_eq!(config.server.route_prefix, "/debug");
        assert!(!config.audit.enabled);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: HubConfig = toml::from_str(
            r#"
            [monitor]
            history_task_limit = 5
            sample_rate = 0.25
            "#,
        )
        .unwrap();
        assert_eq!(config.monitor.history_task_limit, 5);
        assert_eq!(config.monitor.sample_rate, 0.25);
        assert_eq!(config.monitor.cleanup_interval(), Duration::from_secs(300));
    }
}
