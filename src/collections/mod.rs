//! Shared-state containers used by the hub.
//!
//! # Data Flow
//! ```text
//! trackers ──put/delete──▶ ConcurrentMap (active sets, history index, subscribers)
//!          ──add─────────▶ RingBuffer   (bounded recent history per category)
//! ```

pub mod concurrent_map;
pub mod ring_buffer;

pub use concurrent_map::ConcurrentMap;
pub use ring_buffer::RingBuffer;
