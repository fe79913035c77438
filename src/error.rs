//! Error taxonomy for the monitoring subsystem.
//!
//! # Categories
//! - Task failures: recorded on the trace; only surfaced by `try_run`
//! - Control messages: logged, the connection stays up
//! - Transport / backpressure: the subscriber is torn down
//! - Audit backend: returned next to the in-memory results, never instead of them
//! - Configuration: see `config::loader::ConfigError`, fatal at startup only

use thiserror::Error;

/// Errors produced by the monitoring hub and its collaborators.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// A tracked task returned an error through `try_run`.
    #[error("Task {name} ({id}) failed: {message}")]
    TaskFailed {
        id: String,
        name: String,
        message: String,
    },

    /// A tracked task panicked.
    #[error("Task {name} ({id}) panicked: {message}")]
    TaskPanicked {
        id: String,
        name: String,
        message: String,
    },

    /// The detached task could not be joined (runtime shut down or aborted).
    #[error("Task join error: {0}")]
    Join(String),

    /// The subscriber has already been disconnected.
    #[error("Subscriber {0} is closed")]
    SubscriberClosed(String),

    /// The subscriber's outbound queue was full.
    #[error("Subscriber {0} outbound queue overflow")]
    QueueOverflow(String),

    /// A control message from a subscriber could not be understood.
    #[error("Malformed control message: {0}")]
    MalformedMessage(String),

    /// The external audit backend is not configured.
    #[error("Audit backend is disabled")]
    AuditDisabled,

    /// The external audit backend failed.
    #[error("Audit backend error: {0}")]
    Audit(String),

    /// Serialization of an outbound payload failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for MonitorError {
    fn from(err: reqwest::Error) -> Self {
        MonitorError::Audit(err.to_string())
    }
}

/// Result type for monitoring operations.
pub type MonitorResult<T> = Result<T, MonitorError>;
