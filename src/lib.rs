//! In-process runtime observability hub.
//!
//! Tracks every spawned unit of work and inbound request from start to
//! finish, keeps bounded history, aggregates statistics and pushes filtered
//! live updates to connected subscribers.

pub mod collections;
pub mod config;
pub mod error;
pub mod http;
pub mod hub;
pub mod lifecycle;
pub mod observability;
pub mod realtime;
pub mod requests;
pub mod tracking;

pub use config::HubConfig;
pub use error::{MonitorError, MonitorResult};
pub use http::MonitorServer;
pub use hub::MonitorHub;
pub use lifecycle::Shutdown;
pub use tracking::{TaskContext, TaskSpec, TaskSupervisor, TaskTrace};
