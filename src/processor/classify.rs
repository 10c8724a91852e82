//! The single error-classification function (spec.md §4.C, §9): every raw
//! processor failure, at every stage, funnels through `classify` to become a
//! `JobError`. No call site is allowed to hand-roll its own mapping.

use std::fmt;
use std::time::Duration;

use crate::domain::{ErrorKind, JobError, Stage};

use super::client::ProcessorErrorBody;

/// A raw failure from a `ProcessorClient` call, before classification.
#[derive(Debug)]
pub enum RawFailure {
    Transport(reqwest::Error),
    Http {
        status: u16,
        body: Option<ProcessorErrorBody>,
        /// Parsed `Retry-After` response header, when the processor sent one.
        retry_after: Option<Duration>,
    },
}

impl RawFailure {
    /// The delay the processor itself asked for, if any (spec.md §4.C:
    /// `RATE_LIMITED` should wait `Retry-After` when supplied).
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RawFailure::Http { retry_after, .. } => *retry_after,
            RawFailure::Transport(_) => None,
        }
    }
}

impl fmt::Display for RawFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawFailure::Transport(e) => write!(f, "transport error: {e}"),
            RawFailure::Http { status, body, .. } => match body {
                Some(b) => write!(f, "processor returned {status} ({}): {}", b.code, b.message),
                None => write!(f, "processor returned {status}"),
            },
        }
    }
}

/// Map a raw failure observed while running `stage` into a `JobError`.
/// `stage` disambiguates cases where the same HTTP status means different
/// things at different points in the pipeline (e.g. a 404 while extracting
/// metadata means "video not found"; the processor never returns 404 once a
/// conversion job id has been assigned).
pub fn classify(stage: Stage, failure: &RawFailure) -> JobError {
    let kind = match failure {
        RawFailure::Transport(e) if e.is_timeout() => ErrorKind::NetworkTimeout,
        RawFailure::Transport(e) if e.is_connect() => ErrorKind::ProcessorUnavailable,
        RawFailure::Transport(_) => ErrorKind::ProcessorUnavailable,
        RawFailure::Http { status, body, .. } => classify_http(stage, *status, body.as_ref()),
    };
    JobError::with_message(kind, failure.to_string())
}

fn classify_http(stage: Stage, status: u16, body: Option<&ProcessorErrorBody>) -> ErrorKind {
    let code = body.map(|b| b.code.as_str()).unwrap_or("");

    match (status, code) {
        (403, "bot_detected") | (403, "blocked") => ErrorKind::PlatformBotBlocked,
        (429, _) => ErrorKind::RateLimited,
        (404, _) if stage == Stage::ExtractMetadata => ErrorKind::VideoNotFound,
        (413, _) | (_, "video_too_long") => ErrorKind::VideoTooLong,
        (422, "unsupported_format") => ErrorKind::UnsupportedFormat,
        (422, "unsupported_platform") => ErrorKind::UnsupportedPlatform,
        (502, _) | (503, _) | (504, _) => ErrorKind::ProcessorUnavailable,
        (s, _) if s >= 500 => ErrorKind::Internal,
        _ => ErrorKind::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(code: &str) -> ProcessorErrorBody {
        ProcessorErrorBody {
            code: code.to_string(),
            message: "processor message".to_string(),
        }
    }

    #[test]
    fn bot_block_classifies_as_retryable_platform_bot_blocked() {
        let failure = RawFailure::Http {
            status: 403,
            body: Some(body("bot_detected")),
            retry_after: None,
        };
        let err = classify(Stage::Download, &failure);
        assert_eq!(err.kind, ErrorKind::PlatformBotBlocked);
        assert!(err.retryable);
    }

    #[test]
    fn not_found_during_extraction_is_video_not_found() {
        let failure = RawFailure::Http { status: 404, body: None, retry_after: None };
        let err = classify(Stage::ExtractMetadata, &failure);
        assert_eq!(err.kind, ErrorKind::VideoNotFound);
        assert!(!err.retryable);
    }

    #[test]
    fn rate_limited_is_retryable() {
        let failure = RawFailure::Http { status: 429, body: None, retry_after: None };
        let err = classify(Stage::Transcode, &failure);
        assert_eq!(err.kind, ErrorKind::RateLimited);
        assert!(err.retryable);
    }

    #[test]
    fn rate_limited_carries_through_retry_after() {
        let failure = RawFailure::Http {
            status: 429,
            body: None,
            retry_after: Some(Duration::from_secs(17)),
        };
        assert_eq!(failure.retry_after(), Some(Duration::from_secs(17)));
        assert_eq!(classify(Stage::Transcode, &failure).kind, ErrorKind::RateLimited);
    }

    #[test]
    fn unsupported_format_is_fatal() {
        let failure = RawFailure::Http {
            status: 422,
            body: Some(body("unsupported_format")),
            retry_after: None,
        };
        let err = classify(Stage::ExtractMetadata, &failure);
        assert_eq!(err.kind, ErrorKind::UnsupportedFormat);
        assert!(!err.retryable);
    }

    #[test]
    fn server_errors_map_to_processor_unavailable_or_internal() {
        let unavailable = RawFailure::Http { status: 503, body: None, retry_after: None };
        assert_eq!(classify(Stage::Upload, &unavailable).kind, ErrorKind::ProcessorUnavailable);

        let internal = RawFailure::Http { status: 500, body: None, retry_after: None };
        assert_eq!(classify(Stage::Upload, &internal).kind, ErrorKind::Internal);
    }
}
