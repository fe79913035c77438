//! HTTP server setup for the monitoring surface.
//!
//! # Responsibilities
//! - Mount the query handlers and the push endpoint under the route prefix
//! - Wrap application routes with the request-tracing middleware
//! - Apply timeout and trace layers
//! - Serve with connect info and graceful shutdown

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::{HubConfig, ServerConfig};
use crate::http::{handlers, websocket};
use crate::hub::MonitorHub;
use crate::realtime::DisconnectReason;
use crate::requests::{trace_requests, TracingState};

/// Serves the query surface, the push endpoint and any attached application routes.
pub struct MonitorServer {
    hub: Arc<MonitorHub>,
    config: ServerConfig,
    app: Router,
}

impl MonitorServer {
    pub fn new(config: &HubConfig, hub: Arc<MonitorHub>) -> Self {
        Self {
            hub,
            config: config.server.clone(),
            app: Router::new(),
        }
    }

    /// Attach application routes. They are traced by the request middleware.
    pub fn with_app(mut self, app: Router) -> Self {
        self.app = self.app.merge(app);
        self
    }

    pub fn hub(&self) -> &Arc<MonitorHub> {
        &self.hub
    }

    /// Route prefix without a trailing slash.
    pub fn prefix(&self) -> &str {
        self.config.route_prefix.trim_end_matches('/')
    }

    /// Build the full router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        let prefix = self.prefix().to_string();
        let monitoring = Self::monitoring_routes().with_state(self.hub.clone());
        let tracing_state = TracingState {
            hub: self.hub.clone(),
            skip_prefix: prefix.clone(),
        };

        Router::new()
            .nest(&prefix, monitoring)
            .merge(self.app.clone())
            .layer(middleware::from_fn_with_state(tracing_state, trace_requests))
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.request_timeout_secs)))
            .layer(TraceLayer::new_for_http())
    }

    fn monitoring_routes() -> Router<Arc<MonitorHub>> {
        Router::new()
            .route("/tasks", get(handlers::list_tasks))
            .route("/tasks/active", get(handlers::active_tasks))
            .route("/tasks/history", get(handlers::task_history))
            .route("/task/{id}", get(handlers::get_task))
            .route("/requests", get(handlers::list_requests))
            .route("/requests/active", get(handlers::active_requests))
            .route("/requests/history", get(handlers::request_history))
            .route("/requests/search", post(handlers::search_requests))
            .route("/request/{id}", get(handlers::get_request))
            .route("/stats", get(handlers::stats))
            .route("/stats/reset", post(handlers::reset_stats))
            .route("/info", get(handlers::info))
            .route("/connections", get(handlers::connections))
            .route("/monitor", get(handlers::monitor))
            .route("/ws", get(websocket::ws_handler))
    }

    /// Serve until `shutdown` resolves, then close every subscriber and drain.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, prefix = %self.prefix(), "Monitor server starting");

        let hub = self.hub.clone();
        let signal = async move {
            shutdown.await;
            hub.subscribers().disconnect_all(DisconnectReason::Shutdown);
        };

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await?;

        tracing::info!("Monitor server stopped");
        Ok(())
    }
}
