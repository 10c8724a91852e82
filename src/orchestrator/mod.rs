//! Conversion Orchestrator (spec.md §4.C): runs one claimed job end to end
//! against the external processor.

pub mod blob;
pub mod progress;
pub mod worker;

pub use blob::{BlobStore, MockBlobStore};
pub use progress::{map_stage_progress, CallbackRegistry, NoopNotifier, PushNotifier};
pub use worker::{run_job, WorkerDeps};
