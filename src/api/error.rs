//! The JSON error envelope every REST response uses (spec.md §6):
//! `{type, message, retryable, suggestion?}`, wrapped as `error` in the
//! route's own response shape. This is distinct from `domain::JobError`,
//! which the push channel serializes as-is (field `kind`, per spec.md §7) —
//! `ErrorBody` exists specifically to rename that discriminant for the
//! REST surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::{ErrorKind, JobError};
use crate::error::Error;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl From<&JobError> for ErrorBody {
    fn from(e: &JobError) -> Self {
        Self {
            kind: e.kind,
            message: e.message.clone(),
            retryable: e.retryable,
            suggestion: e.suggestion.clone(),
        }
    }
}

/// Error type returned by API handlers; carries the HTTP status alongside
/// the `JobError`-shaped body the spec requires on every error response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: JobError,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status,
            body: JobError::with_message(kind, message),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, ErrorKind::InvalidUrl, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, ErrorKind::Internal, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct Envelope {
            success: bool,
            error: ErrorBody,
        }
        let envelope = Envelope { success: false, error: ErrorBody::from(&self.body) };
        (self.status, Json(envelope)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { entity_type, id } => {
                ApiError::new(StatusCode::NOT_FOUND, ErrorKind::Internal, format!("{entity_type} '{id}' not found"))
            }
            Error::Validation(msg) => {
                let kind = if msg.contains("format") {
                    ErrorKind::UnsupportedFormat
                } else if msg.contains("platform") {
                    ErrorKind::UnsupportedPlatform
                } else {
                    ErrorKind::InvalidUrl
                };
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, kind, msg)
            }
            Error::CapacityExceeded => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::CapacityExceeded,
                ErrorKind::CapacityExceeded.message(),
            ),
            Error::Conflict { id, expected } => ApiError::new(
                StatusCode::CONFLICT,
                ErrorKind::Internal,
                format!("job {id} was not in expected state {expected}"),
            ),
            other => {
                tracing::error!(error = %other, "unhandled error surfaced to API layer");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Internal, ErrorKind::Internal.message())
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_exceeded_maps_to_503_and_is_retryable() {
        let api_err: ApiError = Error::CapacityExceeded.into();
        assert_eq!(api_err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(api_err.body.kind, ErrorKind::CapacityExceeded);
        assert!(api_err.body.retryable);

        let body = ErrorBody::from(&api_err.body);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["type"], "CAPACITY_EXCEEDED");
        assert_eq!(json["retryable"], true);
        assert!(json.get("kind").is_none());
    }

    #[test]
    fn not_found_maps_to_404() {
        let api_err: ApiError = Error::not_found("job", "abc").into();
        assert_eq!(api_err.status, StatusCode::NOT_FOUND);
    }
}
