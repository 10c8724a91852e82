//! Push Channel Manager (spec.md §4.E): per-job WebSocket fan-out with a
//! bounded per-connection outbound queue, heartbeat, and origin validation.
//! Implements the `PushNotifier` and `OrphanReaper` traits the orchestrator
//! and monitor depend on, closing the loop without either module knowing
//! this module exists.

pub mod connection;
pub mod manager;
pub mod message;
pub mod origin;
pub mod route;

pub use connection::{ConnectionDeps, ConnectionHandle};
pub use manager::{spawn, PushManagerHandle};
pub use message::{ClientMessage, ServerMessage};
pub use origin::OriginAllowlist;
