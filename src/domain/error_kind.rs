//! Error taxonomy and retry policy (spec.md §4.C, §7, §9).
//!
//! `ErrorKind` is the single closed set of "kinds, not types" the spec calls
//! for; `classify` (in `processor::classify`) is the one place that produces
//! a `JobError` from a raw failure. Every retry decision in the orchestrator
//! goes through `ErrorKind::retry_policy`, grounded on the teacher's
//! single-reusable-backoff-value design note (spec.md §9).

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidUrl,
    UnsupportedPlatform,
    UnsupportedFormat,
    VideoTooLong,
    VideoNotFound,
    PlatformBotBlocked,
    RateLimited,
    NetworkTimeout,
    ProcessorUnavailable,
    StorageWriteFailed,
    StorageReadFailed,
    CapacityExceeded,
    Timeout,
    StuckRecoveryFailed,
    Cancelled,
    Internal,
}

/// A reusable exponential-backoff shape, instantiated per error kind
/// (and, separately, per push connection for reconnect guidance).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retryable: bool,
    pub max_attempts: u32,
    pub initial: Duration,
    pub cap: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    const fn fatal() -> Self {
        Self {
            retryable: false,
            max_attempts: 0,
            initial: Duration::from_secs(0),
            cap: Duration::from_secs(0),
            multiplier: 1.0,
        }
    }

    const fn new(max_attempts: u32, initial_secs: u64, cap_secs: u64, multiplier: f64) -> Self {
        Self {
            retryable: true,
            max_attempts,
            initial: Duration::from_secs(initial_secs),
            cap: Duration::from_secs(cap_secs),
            multiplier,
        }
    }

    /// Backoff delay before attempt number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_secs(0);
        }
        let factor = self.multiplier.powi((attempt - 1) as i32);
        let millis = (self.initial.as_millis() as f64 * factor).min(self.cap.as_millis() as f64);
        Duration::from_millis(millis.max(0.0) as u64)
    }
}

impl ErrorKind {
    /// The per-stage retry table from spec.md §4.C.
    pub const fn retry_policy(&self) -> RetryPolicy {
        match self {
            ErrorKind::PlatformBotBlocked => RetryPolicy::new(3, 5, 60, 4.0),
            ErrorKind::NetworkTimeout => RetryPolicy::new(3, 2, 30, 4.0),
            ErrorKind::ProcessorUnavailable => RetryPolicy::new(5, 1, 20, 2.5),
            ErrorKind::RateLimited => RetryPolicy::new(4, 10, 40, 2.0),
            ErrorKind::StorageWriteFailed => RetryPolicy::new(3, 1, 8, 3.0),
            ErrorKind::Internal => RetryPolicy::new(2, 2, 8, 2.0),
            ErrorKind::InvalidUrl
            | ErrorKind::UnsupportedPlatform
            | ErrorKind::UnsupportedFormat
            | ErrorKind::VideoTooLong
            | ErrorKind::VideoNotFound
            | ErrorKind::StorageReadFailed
            | ErrorKind::CapacityExceeded
            | ErrorKind::Timeout
            | ErrorKind::StuckRecoveryFailed
            | ErrorKind::Cancelled => RetryPolicy::fatal(),
        }
    }

    /// Whether a client should expect this error to resolve on its own
    /// (retry the request / wait) — distinct from [`ErrorKind::retry_policy`],
    /// which governs only the orchestrator's internal per-stage retry loop.
    /// `CapacityExceeded` and `Timeout` never go through that loop (the
    /// former is rejected at admission before a job exists, the latter is
    /// assigned directly by the queue reaper) but both are still transient
    /// from the caller's point of view, so they're carved out here.
    pub fn retryable(&self) -> bool {
        match self {
            ErrorKind::CapacityExceeded | ErrorKind::Timeout => true,
            _ => self.retry_policy().retryable,
        }
    }

    /// A short, stable-across-runs human-readable hint, per spec.md §7.
    pub fn suggestion(&self) -> &'static str {
        match self {
            ErrorKind::InvalidUrl => "Check that the URL is well-formed and points to a video.",
            ErrorKind::UnsupportedPlatform => {
                "This source platform isn't supported yet; try a supported platform."
            }
            ErrorKind::UnsupportedFormat => "Choose one of the supported output formats.",
            ErrorKind::VideoTooLong => "Choose a shorter video or a lower quality setting.",
            ErrorKind::VideoNotFound => "The video may be private, deleted, or region-locked.",
            ErrorKind::PlatformBotBlocked => {
                "The source platform is rate-limiting automated access; retrying shortly."
            }
            ErrorKind::RateLimited => "Too many requests right now; retrying automatically.",
            ErrorKind::NetworkTimeout => "A network call timed out; retrying automatically.",
            ErrorKind::ProcessorUnavailable => {
                "The conversion service is temporarily unavailable; retrying automatically."
            }
            ErrorKind::StorageWriteFailed => "A storage write failed; retrying automatically.",
            ErrorKind::StorageReadFailed => "The stored output could not be read.",
            ErrorKind::CapacityExceeded => "The queue is full; try again in a moment.",
            ErrorKind::Timeout => "The job took too long and was stopped.",
            ErrorKind::StuckRecoveryFailed => "Automatic recovery attempts were exhausted.",
            ErrorKind::Cancelled => "The job was cancelled.",
            ErrorKind::Internal => "Service temporarily unavailable.",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ErrorKind::InvalidUrl => "The provided URL is not valid.",
            ErrorKind::UnsupportedPlatform => "This source platform is not supported.",
            ErrorKind::UnsupportedFormat => "The requested output format is not supported.",
            ErrorKind::VideoTooLong => "The video exceeds the maximum allowed duration.",
            ErrorKind::VideoNotFound => "The video could not be found.",
            ErrorKind::PlatformBotBlocked => "The source platform blocked automated access.",
            ErrorKind::RateLimited => "The request was rate-limited.",
            ErrorKind::NetworkTimeout => "A network request timed out.",
            ErrorKind::ProcessorUnavailable => "The conversion processor is unavailable.",
            ErrorKind::StorageWriteFailed => "Writing the converted output failed.",
            ErrorKind::StorageReadFailed => "Reading the converted output failed.",
            ErrorKind::CapacityExceeded => "The service is at capacity.",
            ErrorKind::Timeout => "The job exceeded its processing time budget.",
            ErrorKind::StuckRecoveryFailed => "The job could not be recovered after getting stuck.",
            ErrorKind::Cancelled => "The job was cancelled.",
            ErrorKind::Internal => "An internal error occurred.",
        }
    }
}

/// Structured error recorded on a job (spec.md §3, §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl JobError {
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: kind.message().to_string(),
            retryable: kind.retryable(),
            suggestion: Some(kind.suggestion().to_string()),
        }
    }

    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.retryable(),
            suggestion: Some(kind.suggestion().to_string()),
        }
    }
}
