//! Evalhub core domain.
//!
//! Job model, lifecycle state machine, error kinds and the execution
//! backend capability. Pure types and functions with no internal crate
//! dependencies, shared by the store, backend and API crates.

pub mod backend;
pub mod error;
pub mod job;
pub mod job_events;
pub mod lifecycle;
pub mod status;
pub mod types;
