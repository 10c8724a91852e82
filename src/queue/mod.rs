//! Queue Manager (spec.md §4.B): admission control and dispatch ordering.
//! Owns no durable state itself — `sequence`/`status` columns in the Job
//! Store are authoritative; this component is the in-process coordinator
//! that turns "a queued job exists" into "a worker is running it" while
//! respecting the concurrency cap and the hard admission ceiling.

pub mod manager;

pub use manager::{DispatchError, QueueManager, QueueStats};
