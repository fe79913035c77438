//! Metrics collection and exposition.
//!
//! # Metrics
//! - `monitor_tasks_started_total` (counter)
//! - `monitor_tasks_finished_total{outcome}` (counter): completed / failed
//! - `monitor_active_tasks` (gauge)
//! - `monitor_requests_total{status}` (counter)
//! - `monitor_request_duration_ms` (histogram)
//! - `monitor_active_requests` (gauge)
//! - `monitor_subscribers` (gauge)
//! - `monitor_subscribers_connected_total` (counter)
//! - `monitor_subscribers_disconnected_total{reason}` (counter)
//! - `monitor_history_evicted_total{category}` (counter): ring buffer evictions
//! - `monitor_history_swept_total{category}` (counter): age-based removals
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until a
//!   recorder is installed, so library users pay nothing by default
//! - The Prometheus exporter is opt-in via configuration

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::tracking::TraceStatus;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_task_started(active: usize) {
    counter!("monitor_tasks_started_total").increment(1);
    gauge!("monitor_active_tasks").set(active as f64);
}

pub fn record_task_finished(status: TraceStatus, active: usize) {
    counter!("monitor_tasks_finished_total", "outcome" => status.as_str()).increment(1);
    gauge!("monitor_active_tasks").set(active as f64);
}

pub fn record_request_started(active: usize) {
    gauge!("monitor_active_requests").set(active as f64);
}

pub fn record_request_finished(status: TraceStatus, duration_ms: u64, active: usize) {
    counter!("monitor_requests_total", "status" => status.as_str()).increment(1);
    histogram!("monitor_request_duration_ms").record(duration_ms as f64);
    gauge!("monitor_active_requests").set(active as f64);
}

pub fn record_subscriber_connected(total: usize) {
    counter!("monitor_subscribers_connected_total").increment(1);
    gauge!("monitor_subscribers").set(total as f64);
}

pub fn record_subscriber_disconnected(reason: &'static str, total: usize) {
    counter!("monitor_subscribers_disconnected_total", "reason" => reason).increment(1);
    gauge!("monitor_subscribers").set(total as f64);
}

pub fn record_history_evicted(category: &'static str) {
    counter!("monitor_history_evicted_total", "category" => category).increment(1);
}

pub fn record_history_swept(category: &'static str, count: usize) {
    counter!("monitor_history_swept_total", "category" => category).increment(count as u64);
}
