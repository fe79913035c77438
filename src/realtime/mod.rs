//! Real-time fan-out to subscriber connections.
//!
//! # Data Flow
//! ```text
//! MonitorHub::broadcast_* ──filter match──▶ Subscriber::push (try_send)
//!                                              │ full → disconnect
//!                                              ▼
//!                                       connection write loop ──▶ socket
//! socket ──▶ connection read loop ──▶ filter patch / ping / get_stats
//! ```
//!
//! # Design Decisions
//! - Pushes never block the broadcaster; slow clients are dropped
//! - One serialized envelope is shared (`Arc`) across all matching subscribers
//! - Malformed control messages never close a connection

pub mod connection;
pub mod filter;
pub mod message;
pub mod subscriber;

pub use filter::{FilterPatch, SubscriptionFilter};
pub use message::{ControlMessage, Envelope, MessageType};
pub use subscriber::{DisconnectReason, Subscriber, SubscriberInfo, SubscriberRegistry};
