//! Aggregate counters for tasks and requests.
//!
//! # Design Decisions
//! - One coarse lock over both counter groups; every update is a few integer ops
//! - Readers get value copies, never references into the live counters
//! - Counters never go negative; `current_active` is clamped at zero

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::tracking::trace::unix_millis;

/// Task lifecycle counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub total_started: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub current_active: u64,
    pub peak_active: u64,
    pub last_reset_time: u64,
}

/// Request lifecycle counters and latency figures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestStats {
    pub total_requests: u64,
    pub active_requests: u64,
    pub completed_requests: u64,
    pub failed_requests: u64,
    pub average_latency_ms: f64,
    pub peak_latency_ms: u64,
    #[serde(skip)]
    total_latency_ms: u64,
}

impl RequestStats {
    fn finished(&self) -> u64 {
        self.completed_requests + self.failed_requests
    }
}

#[derive(Default)]
struct Counters {
    tasks: TaskStats,
    requests: RequestStats,
}

/// Thread-safe counter store shared by the task and request trackers.
pub struct StatsAggregator {
    counters: RwLock<Counters>,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAggregator {
    pub fn new() -> Self {
        let mut counters = Counters::default();
        counters.tasks.last_reset_time = unix_millis();
        Self {
            counters: RwLock::new(counters),
        }
    }

    /// Apply task counter deltas in one step.
    ///
    /// `current_active` rises with `started` and falls with each terminal event.
    pub fn record_task(&self, started: u64, completed: u64, failed: u64) {
        let mut counters = self.counters.write();
        let tasks = &mut counters.tasks;

        tasks.total_started += started;
        tasks.total_completed += completed;
        tasks.total_failed += failed;
        tasks.current_active = (tasks.current_active + started).saturating_sub(completed + failed);
        tasks.peak_active = tasks.peak_active.max(tasks.current_active);
    }

    /// A request entered the system. `active` is false for requests that arrive already finished.
    pub fn request_started(&self, active: bool) {
        let mut counters = self.counters.write();
        counters.requests.total_requests += 1;
        if active {
            counters.requests.active_requests += 1;
        }
    }

    /// A request reached a terminal state.
    pub fn request_finished(&self, failed: bool, duration_ms: u64, was_active: bool) {
        let mut counters = self.counters.write();
        let requests = &mut counters.requests;

        if was_active {
            requests.active_requests = requests.active_requests.saturating_sub(1);
        }
        if failed {
            requests.failed_requests += 1;
        } else {
            requests.completed_requests += 1;
        }

        requests.total_latency_ms += duration_ms;
        requests.peak_latency_ms = requests.peak_latency_ms.max(duration_ms);
        requests.average_latency_ms = requests.total_latency_ms as f64 / requests.finished() as f64;
    }

    pub fn task_stats(&self) -> TaskStats {
        self.counters.read().tasks
    }

    pub fn request_stats(&self) -> RequestStats {
        self.counters.read().requests
    }

    /// Zero the task counters. Live tasks are carried over as started so that
    /// `current_active == total_started - total_completed - total_failed` still holds.
    pub fn reset_task_stats(&self) {
        let mut counters = self.counters.write();
        let active = counters.tasks.current_active;
        counters.tasks = TaskStats {
            total_started: active,
            current_active: active,
            peak_active: active,
            last_reset_time: unix_millis(),
            ..TaskStats::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_counters() {
        let stats = StatsAggregator::new();
        stats.record_task(1, 0, 0);
        stats.record_task(1, 0, 0);
        stats.record_task(1, 0, 0);
        stats.record_task(0, 1, 0);
        stats.record_task(0, 0, 1);

        let snapshot = stats.task_stats();
        assert_eq!(snapshot.total_started, 3);
        assert_eq!(snapshot.total_completed, 1);
        assert_eq!(snapshot.total_failed, 1);
        assert_eq!(snapshot.current_active, 1);
        assert_eq!(snapshot.peak_active, 3);
    }

    #[test]
    fn test_active_never_negative() {
        let stats = StatsAggregator::new();
        stats.record_task(0, 2, 1);
        assert_eq!(stats.task_stats().current_active, 0);

        stats.request_finished(false, 5, true);
        assert_eq!(stats.request_stats().active_requests, 0);
    }

    #[test]
    fn test_request_latency() {
        let stats = StatsAggregator::new();
        stats.request_started(true);
        stats.request_started(true);
        stats.request_finished(false, 10, true);
        stats.request_finished(true, 30, true);

        let snapshot = stats.request_stats();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.active_requests, 0);
        assert_eq!(snapshot.completed_requests, 1);
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.peak_latency_ms, 30);
        assert!((snapshot.average_latency_ms - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reset_keeps_live_count() {
        let stats = StatsAggregator::new();
        stats.record_task(4, 1, 1);
        stats.reset_task_stats();

        let snapshot = stats.task_stats();
        assert_eq!(snapshot.total_started, 2);
        assert_eq!(snapshot.total_failed, 0);
        assert_eq!(snapshot.current_active, 2);

        stats.record_task(1, 2, 0);
        let snapshot = stats.task_stats();
        assert_eq!(snapshot.total_started, 3);
        assert_eq!(snapshot.current_active, 1);
        assert_eq!(
            snapshot.current_active,
            snapshot.total_started - snapshot.total_completed - snapshot.total_failed
        );
    }
}
