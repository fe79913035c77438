//! Task lifecycle tracking.
//!
//! # Data Flow
//! ```text
//! caller ── run/spawn/try_run ──▶ TaskSupervisor
//!                                   │ TaskRecord (live, per-task lock)
//!                                   ▼
//!                      MonitorHub active set ──finish──▶ history (index + ring buffer)
//!                                   │
//!                         StatsAggregator counters
//! ```
//!
//! # Design Decisions
//! - Work receives a `TaskContext`; its `SessionLogger` lines are copied onto the trace
//! - Traces are handed out as `TaskTrace` snapshots, never as references to live state

pub mod session;
pub mod stack;
pub mod stats;
pub mod supervisor;
pub mod trace;

pub use session::{LogItem, LogLevel, SessionLogger};
pub use stats::{RequestStats, StatsAggregator, TaskStats};
pub use supervisor::{TaskContext, TaskHandle, TaskSupervisor};
pub use trace::{unix_millis, Outcome, TaskRecord, TaskSpec, TaskTrace, TraceStatus};
