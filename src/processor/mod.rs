//! The external conversion processor's client boundary (spec.md §4.C).
//!
//! The orchestrator never talks to the platform (YouTube, TikTok, ...)
//! directly — it delegates extraction and conversion to this processor over
//! HTTP and classifies whatever comes back through a single `classify`
//! function, so every call site shares one error taxonomy.

pub mod classify;
pub mod client;

pub use classify::{classify, RawFailure};
pub use client::{
    ConvertAccepted, ConvertRequest, ExtractedMetadata, HttpProcessorClient, ProcessorClient, ProcessorEvent,
    ProcessorErrorBody,
};
