//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize logging and metrics
//! - Build and start the monitor hub
//! - Bind the listener last
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::{load_config, ConfigError, HubConfig};
use crate::error::MonitorError;
use crate::hub::MonitorHub;
use crate::observability::{logging, metrics};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to initialise monitor hub: {0}")]
    Hub(#[from] MonitorError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// Everything a binary needs to start serving.
pub struct Bootstrap {
    pub config: HubConfig,
    pub hub: Arc<MonitorHub>,
    pub listener: TcpListener,
}

/// Load the config file, or defaults when `path` is `None`.
pub fn resolve_config(path: Option<&Path>) -> Result<HubConfig, StartupError> {
    match path {
        Some(path) => Ok(load_config(path)?),
        None => Ok(HubConfig::default()),
    }
}

/// Initialize subsystems in order and bind the listener.
pub async fn bootstrap(config: HubConfig) -> Result<Bootstrap, StartupError> {
    if !logging::init_logging(&config.observability) {
        tracing::debug!("Global subscriber already installed");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let hub = MonitorHub::init(&config)?;

    let listener = TcpListener::bind(&config.server.bind_address)
        .await
        .map_err(|source| StartupError::Bind {
            address: config.server.bind_address.clone(),
            source,
        })?;

    tracing::info!(
        bind_address = %config.server.bind_address,
        route_prefix = %config.server.route_prefix,
        audit = config.audit.enabled,
        "Configuration loaded"
    );

    Ok(Bootstrap {
        config,
        hub,
        listener,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bootstrap_binds_ephemeral_port() {
        let mut config = HubConfig::default();
        config.server.bind_address = "127.0.0.1:0".into();

        let boot = bootstrap(config).await.unwrap();
        assert_ne!(boot.listener.local_addr().unwrap().port(), 0);
        assert_eq!(boot.hub.subscribers().len(), 0);
    }

    #[test]
    fn test_missing_config_file_is_fatal() {
        let err = resolve_config(Some(Path::new("/nonexistent/monitor.toml"))).unwrap_err();
        assert!(matches!(err, StartupError::Config(_)));
    }
}
