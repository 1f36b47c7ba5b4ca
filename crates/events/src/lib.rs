//! Evalhub event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`JobEvent`]: the envelope for job lifecycle events.

pub mod bus;

pub use bus::{EventBus, JobEvent};
