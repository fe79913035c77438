//! Per-task session logging.
//!
//! Every line goes to `tracing` like any other log event and is also kept in
//! an append-only buffer so the task's trace can show what it logged.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::Location;
use std::sync::Arc;

use crate::tracking::trace::unix_millis;

/// Severity of a session log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One structured log line captured during execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogItem {
    pub time: u64,
    pub level: LogLevel,
    pub caller: String,
    pub message: String,
}

/// Logger handed to tracked work through its context.
#[derive(Clone)]
pub struct SessionLogger {
    scope: Arc<str>,
    items: Arc<Mutex<Vec<LogItem>>>,
}

impl SessionLogger {
    /// Create a logger whose events carry `scope` (the task or request id).
    pub fn new(scope: impl AsRef<str>) -> Self {
        Self {
            scope: Arc::from(scope.as_ref()),
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[track_caller]
    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message.into());
    }

    #[track_caller]
    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message.into());
    }

    #[track_caller]
    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message.into());
    }

    #[track_caller]
    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message.into());
    }

    #[track_caller]
    fn log(&self, level: LogLevel, message: String) {
        let location = Location::caller();
        let caller = format!("{}:{}", location.file(), location.line());
        let scope = &*self.scope;

        match level {
            LogLevel::Debug => tracing::debug!(target: "monitor_hub::session", scope, caller = %caller, "{}", message),
            LogLevel::Info => tracing::info!(target: "monitor_hub::session", scope, caller = %caller, "{}", message),
            LogLevel::Warn => tracing::warn!(target: "monitor_hub::session", scope, caller = %caller, "{}", message),
            LogLevel::Error => tracing::error!(target: "monitor_hub::session", scope, caller = %caller, "{}", message),
        }

        self.items.lock().push(LogItem {
            time: unix_millis(),
            level,
            caller,
            message,
        });
    }

    /// Lines appended after the first `known` ones.
    pub fn items_since(&self, known: usize) -> Vec<LogItem> {
        let items = self.items.lock();
        items.get(known..).map(<[LogItem]>::to_vec).unwrap_or_default()
    }

    pub fn items(&self) -> Vec<LogItem> {
        self.items.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Lines joined as `level message` rows, for request traces that store logs as text.
    pub fn render(&self) -> String {
        self.items
            .lock()
            .iter()
            .map(|item| format!("[{:?}] {}", item.level, item.message))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
