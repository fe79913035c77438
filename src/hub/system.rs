//! Process-level figures and the stats snapshot handed to readers.

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::tracking::{RequestStats, TaskStats};

/// Process and runtime figures recomputed on every stats read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub memory_bytes: u64,
    pub cpu_usage: f64,
    pub active_tasks: usize,
    pub active_requests: usize,
    pub subscribers: usize,
    pub runtime_workers: usize,
    pub uptime_secs: u64,
}

/// Immutable copy of all counters at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStats {
    pub task_stats: TaskStats,
    pub request_stats: RequestStats,
    pub system_stats: SystemStats,
    pub last_update: u64,
}

/// Reads memory and CPU for the current process.
pub struct SystemProbe {
    system: System,
    pid: Option<Pid>,
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    /// Refresh and return `(memory_bytes, cpu_usage_percent)`.
    pub fn sample(&mut self) -> (u64, f64) {
        let Some(pid) = self.pid else {
            return (0, 0.0);
        };
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        self.system
            .process(pid)
            .map(|process| (process.memory(), f64::from(process.cpu_usage())))
            .unwrap_or((0, 0.0))
    }
}

/// Worker threads of the current tokio runtime, if any.
pub fn runtime_workers() -> usize {
    tokio::runtime::Handle::try_current()
        .map(|handle| handle.metrics().num_workers())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_reports_memory() {
        let mut probe = SystemProbe::new();
        let (memory, cpu) = probe.sample();
        assert!(memory > 0);
        assert!(cpu >= 0.0);
    }
}
