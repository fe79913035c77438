//! Monitor hub service.
//!
//! Serves the monitoring surface and a small demo surface whose requests and
//! spawned jobs are tracked end to end.
//!
//! ```text
//!   client ──▶ /jobs/{name} ──request middleware──▶ TaskSupervisor::spawn
//!                                   │                        │
//!                                   ▼                        ▼
//!                               MonitorHub ◀──────── lifecycle companion
//!                                   │
//!   operator ◀── /debug/* query surface, /debug/ws push ──┘
//! ```

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use monitor_hub::hub::MonitorHub;
use monitor_hub::lifecycle::{bootstrap, resolve_config, signals, Shutdown};
use monitor_hub::requests::REQUEST_ID_HEADER;
use monitor_hub::tracking::{TaskContext, TaskSpec};
use monitor_hub::MonitorServer;

#[derive(Parser)]
#[command(name = "monitor-hub")]
#[command(about = "Runtime observability hub for tasks and requests")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct JobParams {
    #[serde(default = "default_job_ms")]
    duration_ms: u64,
    #[serde(default)]
    fail: bool,
    /// Run inline and return the final trace instead of a task id.
    #[serde(default)]
    wait: bool,
}

fn default_job_ms() -> u64 {
    250
}

async fn run_job(
    State(hub): State<Arc<MonitorHub>>,
    Path(name): Path<String>,
    Query(params): Query<JobParams>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let mut spec = TaskSpec::new(name).tag("source", "demo");
    if let Some(request_id) = headers.get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()) {
        spec = spec.request_id(request_id);
    }

    let JobParams {
        duration_ms,
        fail,
        wait,
    } = params;
    let work = move |ctx: TaskContext| async move {
        ctx.logger().info(format!("job {} started", ctx.name()));
        tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        if fail {
            ctx.logger().error("job asked to fail");
            panic!("job {} failed on request", ctx.name());
        }
        ctx.logger().info("job finished");
    };

    let supervisor = hub.supervisor();
    if wait {
        let trace = supervisor.run(spec, work).await;
        return (
            StatusCode::OK,
            Json(serde_json::to_value(trace).unwrap_or_default()),
        );
    }
    let handle = supervisor.spawn(spec, work);
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "task_id": handle.id() })),
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = resolve_config(args.config.as_deref())?;
    let boot = bootstrap(config).await?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "monitor-hub starting");

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    let demo = Router::new()
        .route("/jobs/{name}", post(run_job))
        .with_state(boot.hub.clone());

    let server = MonitorServer::new(&boot.config, boot.hub.clone()).with_app(demo);
    let signal = {
        let shutdown = shutdown.clone();
        async move { shutdown.wait().await }
    };
    server.run(boot.listener, signal).await?;

    tracing::info!("monitor-hub stopped");
    Ok(())
}
