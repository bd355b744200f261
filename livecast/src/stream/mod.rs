//! Stream domain: registry, per-stream state, and the subscriber bus.

pub mod entity;
pub mod frame;
pub mod registry;
pub mod subscriber;

pub use entity::{Stream, StreamSnapshot, StreamStatus};
pub use frame::ControlFrame;
pub use registry::StreamRegistry;
pub use subscriber::SubscriberHandle;
