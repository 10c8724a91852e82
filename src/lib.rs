//! Orchestration core for a media-conversion service: admission control,
//! scheduling, progress tracking and push delivery around an external
//! conversion processor that does the actual media work.

pub mod api;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod orchestrator;
pub mod processor;
pub mod push;
pub mod queue;
pub mod services;
pub mod utils;

pub use error::{Error, Result};
