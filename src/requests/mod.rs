//! Inbound request tracing.
//!
//! # Data Flow
//! ```text
//! middleware ──register_request──▶ active map
//!     │                               │ handle_report / update_request
//!     └──handle_report(map)───────────▼
//!                        finalize (claim by removal) ──▶ history index + ring buffer
//! search_requests ──▶ active + recent history (+ audit backend)
//! ```

pub mod middleware;
pub mod search;
mod tracer;
pub mod trace;

pub use middleware::{trace_requests, TracingState, REQUEST_ID_HEADER};
pub use search::{AuditBackend, HttpAuditBackend, RequestSearchQuery, SearchOutcome};
pub use trace::{
    limit_string, parse_latency_ms, RequestSummary, RequestTrace, RequestUpdate,
    MAX_CALL_STACK_SIZE, MAX_FIELD_SIZE,
};
