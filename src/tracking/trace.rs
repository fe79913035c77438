//! Task trace model.
//!
//! A `TaskRecord` is the live, shared record owned by the tracker while the
//! task runs. `TaskTrace` is the immutable snapshot that is handed out to
//! readers and moved into history.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::tracking::session::{LogItem, SessionLogger};

/// Milliseconds since the unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Lifecycle status shared by task and request traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    /// A task that is executing.
    Running,
    /// A request that has been registered but not answered.
    Active,
    /// Finished normally.
    Completed,
    /// Finished with an error or panic.
    Failed,
}

impl TraceStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TraceStatus::Completed | TraceStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TraceStatus::Running => "running",
            TraceStatus::Active => "active",
            TraceStatus::Completed => "completed",
            TraceStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a tracked task ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure { message: String, stack: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Immutable snapshot of a task trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTrace {
    pub id: String,
    pub name: String,
    pub status: TraceStatus,
    pub start_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    pub stack: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub session_logs: Vec<LogItem>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_log_sync: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub tags: BTreeMap<String, String>,
    pub last_heartbeat: u64,
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub memory_usage: u64,
}

impl TaskTrace {
    /// Wall-clock duration, if the task has ended.
    pub fn duration_ms(&self) -> Option<u64> {
        self.end_time.map(|end| end.saturating_sub(self.start_time))
    }
}

/// What a caller asks to run: a name plus optional correlation data.
#[derive(Debug, Clone, Default)]
pub struct TaskSpec {
    pub name: String,
    pub request_id: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Associate the task with an inbound request.
    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

impl From<&str> for TaskSpec {
    fn from(name: &str) -> Self {
        TaskSpec::new(name)
    }
}

impl From<String> for TaskSpec {
    fn from(name: String) -> Self {
        TaskSpec::new(name)
    }
}

struct TaskState {
    status: TraceStatus,
    end_time: Option<u64>,
    stack: String,
    error: String,
    outcome: Option<Outcome>,
    session_logs: Vec<LogItem>,
    last_log_sync: Option<u64>,
    last_heartbeat: u64,
    cpu_usage: f64,
    memory_usage: u64,
}

/// Live record of a running task. Mutable fields sit behind a lock scoped to this task.
pub struct TaskRecord {
    id: String,
    name: String,
    request_id: Option<String>,
    tags: BTreeMap<String, String>,
    start_time: u64,
    session: SessionLogger,
    state: RwLock<TaskState>,
}

impl TaskRecord {
    pub fn new(id: String, spec: TaskSpec, stack: String, session: SessionLogger) -> Self {
        let now = unix_millis();
        Self {
            id,
            name: spec.name,
            request_id: spec.request_id,
            tags: spec.tags,
            start_time: now,
            session,
            state: RwLock::new(TaskState {
                status: TraceStatus::Running,
                end_time: None,
                stack,
                error: String::new(),
                outcome: None,
                session_logs: Vec::new(),
                last_log_sync: None,
                last_heartbeat: now,
                cpu_usage: 0.0,
                memory_usage: 0,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn session(&self) -> &SessionLogger {
        &self.session
    }

    pub fn status(&self) -> TraceStatus {
        self.state.read().status
    }

    /// Move to a terminal status. Status and end time change together, exactly once.
    ///
    /// Returns `false` if the record was already terminal.
    pub fn finish(&self, outcome: Outcome) -> bool {
        let mut state = self.state.write();
        if state.status.is_terminal() {
            return false;
        }

        let now = unix_millis();
        match &outcome {
            Outcome::Success => state.status = TraceStatus::Completed,
            Outcome::Failure { message, stack } => {
                state.status = TraceStatus::Failed;
                state.error = message.clone();
                if !stack.is_empty() {
                    state.stack = stack.clone();
                }
            }
        }
        state.end_time = Some(now);
        state.last_heartbeat = now;
        state.outcome = Some(outcome);
        true
    }

    /// Copy log lines produced since the last sync. Returns `true` if anything was copied.
    pub fn sync_logs(&self) -> bool {
        let known = self.state.read().session_logs.len();
        let fresh = self.session.items_since(known);
        if fresh.is_empty() {
            return false;
        }

        let mut state = self.state.write();
        // Another sync may have raced us; only append what is still missing.
        let known_now = state.session_logs.len();
        let skip = known_now.saturating_sub(known);
        if skip >= fresh.len() {
            return false;
        }
        state.session_logs.extend(fresh.into_iter().skip(skip));
        let now = unix_millis();
        state.last_log_sync = Some(now);
        state.last_heartbeat = now;
        true
    }

    pub fn report_usage(&self, cpu_usage: f64, memory_usage: u64) {
        let mut state = self.state.write();
        state.cpu_usage = cpu_usage;
        state.memory_usage = memory_usage;
        state.last_heartbeat = unix_millis();
    }

    pub fn snapshot(&self) -> TaskTrace {
        let state = self.state.read();
        TaskTrace {
            id: self.id.clone(),
            name: self.name.clone(),
            status: state.status,
            start_time: self.start_time,
            end_time: state.end_time,
            stack: state.stack.clone(),
            error: state.error.clone(),
            outcome: state.outcome.clone(),
            session_logs: state.session_logs.clone(),
            last_log_sync: state.last_log_sync,
            request_id: self.request_id.clone(),
            tags: self.tags.clone(),
            last_heartbeat: state.last_heartbeat,
            cpu_usage: state.cpu_usage,
            memory_usage: state.memory_usage,
        }
    }
}
