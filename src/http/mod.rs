//! Operator-facing HTTP surface.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, timeout + trace layers)
//!     → request-tracing middleware (application routes only)
//!     → handlers.rs (query reads on the hub)
//!     → websocket.rs (upgrade into the push protocol)
//! ```

pub mod handlers;
pub mod server;
pub mod websocket;

pub use server::MonitorServer;
