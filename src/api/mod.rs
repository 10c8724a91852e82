//! The REST + push HTTP surface (spec.md §6): route handlers are thin —
//! validation and state transitions live in `services` and the modules it
//! wires together.

pub mod error;
pub mod routes;
pub mod server;

pub use server::{build_router, serve, AppState};
