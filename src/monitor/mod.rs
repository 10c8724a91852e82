//! Progress & Recovery Monitor (spec.md §4.D): a periodic sweep independent
//! of submission traffic that enforces invariants the fast path may have
//! missed — stuck jobs, expired results, orphaned push subscriptions.

pub mod service;

pub use service::{Monitor, MonitorDeps, OrphanReaper, SweepReport};
