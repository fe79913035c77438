//! Monitoring hub: the composition root.
//!
//! # Responsibilities
//! - Own the active task/request sets, both history buffers and the history index
//! - Own the stats aggregator and the subscriber registry
//! - Run the stats broadcaster and the history sweep
//! - Answer every read on the query surface
//!
//! # Data Flow
//! ```text
//! TaskSupervisor ──register/complete──┐
//! request middleware ──register/report┤
//!                                     ▼
//!        active maps ──finish──▶ history index + ring buffers
//!              │                        ▲
//!              └──broadcast_*──▶ subscribers      cleanup sweep (age)
//! ```
//!
//! # Design Decisions
//! - An explicit `Arc<MonitorHub>` passed to collaborators, no global instance
//! - Background loops hold a `Weak` handle and stop when the hub is dropped
//! - Ring buffers evict by capacity; the sweep evicts by age from both the
//!   index and the buffers

mod background;
mod broadcast;
pub mod system;

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use crate::collections::{ConcurrentMap, RingBuffer};
use crate::config::{HubConfig, MonitorConfig, RealtimeConfig};
use crate::error::MonitorResult;
use crate::observability::metrics;
use crate::realtime::SubscriberRegistry;
use crate::requests::{AuditBackend, HttpAuditBackend, RequestTrace};
use crate::tracking::{unix_millis, StatsAggregator, TaskRecord, TaskSupervisor, TaskTrace};

pub use system::{MonitorStats, SystemStats};
use system::SystemProbe;

/// Default number of history entries returned when the caller gives no limit.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Summary of the hub's configuration and live counts.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringInfo {
    pub realtime_enabled: bool,
    pub performance_monitor_enabled: bool,
    pub audit_enabled: bool,
    pub history_task_limit: usize,
    pub history_request_limit: usize,
    pub heartbeat_interval_secs: u64,
    pub sample_rate: f64,
    pub subscribers: usize,
    pub active_tasks: usize,
    pub active_requests: usize,
    pub history_tasks: usize,
    pub history_requests: usize,
    pub uptime_secs: u64,
}

/// Entries removed by one history sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub tasks: usize,
    pub requests: usize,
}

pub struct MonitorHub {
    config: MonitorConfig,
    realtime: RealtimeConfig,

    active_tasks: ConcurrentMap<String, Arc<TaskRecord>>,
    task_history: RingBuffer<TaskTrace>,
    task_index: ConcurrentMap<String, TaskTrace>,

    pub(crate) active_requests: ConcurrentMap<String, Arc<Mutex<RequestTrace>>>,
    pub(crate) request_history: RingBuffer<RequestTrace>,
    pub(crate) request_index: ConcurrentMap<String, RequestTrace>,

    stats: StatsAggregator,
    subscribers: SubscriberRegistry,
    pub(crate) audit: Option<Arc<dyn AuditBackend>>,
    probe: Mutex<SystemProbe>,
    started: Instant,
}

impl MonitorHub {
    /// Build a hub without background loops. See [`start`](Self::start).
    pub fn new(config: MonitorConfig, realtime: RealtimeConfig) -> Self {
        Self {
            task_history: RingBuffer::new(config.history_task_limit),
            request_history: RingBuffer::new(config.history_request_limit),
            active_tasks: ConcurrentMap::new(),
            task_index: ConcurrentMap::new(),
            active_requests: ConcurrentMap::new(),
            request_index: ConcurrentMap::new(),
            stats: StatsAggregator::new(),
            subscribers: SubscriberRegistry::new(),
            audit: None,
            probe: Mutex::new(SystemProbe::new()),
            started: Instant::now(),
            config,
            realtime,
        }
    }

    /// Attach a long-retention search backend.
    pub fn with_audit_backend(mut self, backend: Arc<dyn AuditBackend>) -> Self {
        self.audit = Some(backend);
        self
    }

    /// Share the hub and start its background loops. Must run inside a tokio runtime.
    pub fn start(self) -> Arc<Self> {
        let hub = Arc::new(self);
        background::spawn(&hub);
        info!(
            history_task_limit = hub.config.history_task_limit,
            history_request_limit = hub.config.history_request_limit,
            realtime = hub.config.enable_realtime,
            sample_rate = hub.config.sample_rate,
            "Monitor hub started"
        );
        hub
    }

    /// Build from full configuration (audit backend included) and start.
    pub fn init(config: &HubConfig) -> MonitorResult<Arc<Self>> {
        let mut hub = Self::new(config.monitor.clone(), config.realtime.clone());
        if config.audit.enabled {
            hub = hub.with_audit_backend(Arc::new(HttpAuditBackend::new(&config.audit)?));
        }
        Ok(hub.start())
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn realtime_config(&self) -> &RealtimeConfig {
        &self.realtime
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    pub fn subscribers(&self) -> &SubscriberRegistry {
        &self.subscribers
    }

    /// Entry point for running tracked work.
    pub fn supervisor(self: &Arc<Self>) -> TaskSupervisor {
        TaskSupervisor::new(self.clone())
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    // ---- task lifecycle (driven by TaskSupervisor) ----

    pub(crate) fn register_task(&self, record: Arc<TaskRecord>) {
        let snapshot = record.snapshot();
        self.active_tasks.put(record.id().to_string(), record);
        self.stats.record_task(1, 0, 0);
        metrics::record_task_started(self.active_tasks.len());
        tracing::debug!(task_id = %snapshot.id, task = %snapshot.name, "Task started");
        self.broadcast_task_update(&snapshot);
    }

    pub(crate) fn complete_task(&self, record: &TaskRecord) {
        let snapshot = record.snapshot();
        if self.active_tasks.delete(&snapshot.id).is_none() {
            return;
        }
        self.push_task_history(snapshot.clone());
        metrics::record_task_finished(snapshot.status, self.active_tasks.len());
        tracing::debug!(
            task_id = %snapshot.id,
            task = %snapshot.name,
            status = %snapshot.status,
            duration_ms = snapshot.duration_ms().unwrap_or_default(),
            "Task finished"
        );
        self.broadcast_task_update(&snapshot);
    }

    fn push_task_history(&self, trace: TaskTrace) {
        self.task_index.put(trace.id.clone(), trace.clone());
        if self.task_history.add(trace).is_some() {
            metrics::record_history_evicted("tasks");
        }
    }

    pub(crate) fn push_request_history(&self, trace: RequestTrace) -> bool {
        if !self
            .request_index
            .put_if_absent(trace.request_id.clone(), trace.clone())
        {
            return false;
        }
        if self.request_history.add(trace).is_some() {
            metrics::record_history_evicted("requests");
        }
        true
    }

    // ---- reads ----

    /// Running tasks, oldest first.
    pub fn get_active_tasks(&self) -> Vec<TaskTrace> {
        let mut traces: Vec<_> = self
            .active_tasks
            .values()
            .iter()
            .map(|record| record.snapshot())
            .collect();
        traces.sort_by_key(|t| t.start_time);
        traces
    }

    /// The most recent finished tasks, oldest of the window first.
    ///
    /// `None` or zero means [`DEFAULT_HISTORY_LIMIT`]; the window never exceeds capacity.
    pub fn get_history_tasks(&self, limit: Option<usize>) -> Vec<TaskTrace> {
        self.task_history
            .get_recent(self.history_window(limit, self.task_history.capacity()))
    }

    pub fn get_history_requests(&self, limit: Option<usize>) -> Vec<RequestTrace> {
        self.request_history
            .get_recent(self.history_window(limit, self.request_history.capacity()))
    }

    fn history_window(&self, limit: Option<usize>, capacity: usize) -> usize {
        match limit {
            Some(n) if n > 0 => n.min(capacity),
            _ => DEFAULT_HISTORY_LIMIT.min(capacity),
        }
    }

    /// Every known task: active ones plus the whole history index, newest first.
    pub fn get_all_traces(&self) -> Vec<TaskTrace> {
        let mut traces = self.get_active_tasks();
        traces.extend(self.task_index.values());
        traces.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        traces
    }

    /// Look a task up in the active set (syncing its logs first), then in history.
    pub fn get_task(&self, id: &str) -> Option<TaskTrace> {
        let key = id.to_string();
        if let Some(record) = self.active_tasks.get(&key) {
            record.sync_logs();
            return Some(record.snapshot());
        }
        self.task_index.get(&key)
    }

    pub fn get_active_requests(&self) -> Vec<RequestTrace> {
        let mut traces: Vec<_> = self
            .active_requests
            .values()
            .iter()
            .map(|trace| trace.lock().clone())
            .collect();
        traces.sort_by_key(|t| t.start_time);
        traces
    }

    pub fn get_request(&self, id: &str) -> Option<RequestTrace> {
        let key = id.to_string();
        if let Some(trace) = self.active_requests.get(&key) {
            return Some(trace.lock().clone());
        }
        self.request_index.get(&key)
    }

    /// Fresh copy of all counters plus process figures.
    pub fn get_current_stats(&self) -> MonitorStats {
        let (memory_bytes, cpu_usage) = if self.config.enable_performance_monitor {
            self.probe.lock().sample()
        } else {
            (0, 0.0)
        };

        MonitorStats {
            task_stats: self.stats.task_stats(),
            request_stats: self.stats.request_stats(),
            system_stats: SystemStats {
                memory_bytes,
                cpu_usage,
                active_tasks: self.active_tasks.len(),
                active_requests: self.active_requests.len(),
                subscribers: self.subscribers.len(),
                runtime_workers: system::runtime_workers(),
                uptime_secs: self.uptime().as_secs(),
            },
            last_update: unix_millis(),
        }
    }

    pub fn monitoring_info(&self) -> MonitoringInfo {
        MonitoringInfo {
            realtime_enabled: self.config.enable_realtime,
            performance_monitor_enabled: self.config.enable_performance_monitor,
            audit_enabled: self.audit.is_some(),
            history_task_limit: self.config.history_task_limit,
            history_request_limit: self.config.history_request_limit,
            heartbeat_interval_secs: self.config.heartbeat_interval_secs,
            sample_rate: self.config.sample_rate,
            subscribers: self.subscribers.len(),
            active_tasks: self.active_tasks.len(),
            active_requests: self.active_requests.len(),
            history_tasks: self.task_history.size(),
            history_requests: self.request_history.size(),
            uptime_secs: self.uptime().as_secs(),
        }
    }

    pub fn reset_task_stats(&self) {
        self.stats.reset_task_stats();
        info!("Task statistics reset");
    }

    /// Remove finished entries whose end time is older than `max_age`.
    ///
    /// Only history is touched; active entries are never swept.
    pub fn cleanup_history(&self, max_age: Duration) -> SweepReport {
        let cutoff = unix_millis().saturating_sub(max_age.as_millis() as u64);

        let task_expired = |t: &TaskTrace| t.end_time.unwrap_or(t.start_time) < cutoff;
        let request_expired = |r: &RequestTrace| r.end_time.unwrap_or(r.start_time) < cutoff;

        let tasks = self.task_index.remove_where(|_, t| task_expired(t)).len();
        self.task_history.retain(|t| !task_expired(t));
        let requests = self.request_index.remove_where(|_, r| request_expired(r)).len();
        self.request_history.retain(|r| !request_expired(r));

        if tasks > 0 {
            metrics::record_history_swept("tasks", tasks);
        }
        if requests > 0 {
            metrics::record_history_swept("requests", requests);
        }
        SweepReport { tasks, requests }
    }
}
