pub mod codes;
pub mod handlers;

pub use codes::ErrorCode;

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Standard error response structure returned for all façade error responses.
///
/// - `code`: integer error code for logging/monitoring
/// - `error`: machine-readable error identifier
/// - `message`: human-readable, sanitized error message
/// - `details`: optional structured detail (e.g. validation field errors)
#[derive(Serialize)]
pub struct ErrorResponse {
    pub code: i32,
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Strip control characters and cap the length of a string before it is
/// written to a log line. Every `AppError` variant here can carry
/// user-supplied content (a validation message built from a request field,
/// an upstream body fragment) by the time it reaches `tracing::*!`, so this
/// runs on every message logged below rather than trusting the caller to
/// have sanitized it already. Mirrors `job_core::error::sanitize_error_message`;
/// duplicated rather than shared because `axum-helpers` has no dependency on
/// the job-processing domain crate.
fn sanitize_for_log(message: &str) -> String {
    const MAX_LEN: usize = 500;
    let cleaned: String = message
        .chars()
        .filter(|c| !c.is_control() || *c == ' ')
        .collect();
    if cleaned.chars().count() > MAX_LEN {
        cleaned.chars().take(MAX_LEN).collect::<String>() + "…"
    } else {
        cleaned
    }
}

/// Domain-level error surfaced by the job service façade.
///
/// Variants map onto the stable error taxonomy (`invalid_input`,
/// `ownership_violation`/`not_found`, `admission_refused`,
/// `upstream_semantic_error`, `store_unavailable`, `internal`) and onto the
/// coarse client-visible statuses the façade promises: validation → 400,
/// ownership/unknown → 404, admission/store outage → 503 with retry-after,
/// upstream-semantic → 502, everything else → 500.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Covers both "truly absent" and "exists but not owned by caller" —
    /// the two are indistinguishable by design (ownership isolation).
    #[error("not found")]
    NotFound,

    /// The degradation controller refused admission of new work.
    #[error("admission refused: {reason}")]
    AdmissionRefused {
        reason: String,
        retry_after_secs: u64,
    },

    /// The job store backend is unavailable.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// An upstream AI service returned a non-retryable semantic error.
    #[error("upstream semantic error: {0}")]
    UpstreamSemanticError(String),

    #[error("JSON extraction error: {0}")]
    JsonExtractorRejection(#[from] JsonRejection),

    #[error("invalid UUID: {0}")]
    UuidError(#[from] uuid::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, details, code, retry_after) = match self {
            AppError::Validation(msg) => {
                tracing::info!(
                    error_code = ErrorCode::ValidationError.code(),
                    "{}",
                    sanitize_for_log(&msg)
                );
                (StatusCode::BAD_REQUEST, msg, None, ErrorCode::ValidationError, None)
            }
            AppError::NotFound => {
                tracing::info!(error_code = ErrorCode::NotFound.code(), "not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorCode::NotFound.default_message().to_string(),
                    None,
                    ErrorCode::NotFound,
                    None,
                )
            }
            AppError::AdmissionRefused {
                reason,
                retry_after_secs,
            } => {
                tracing::warn!(
                    error_code = ErrorCode::ServiceUnavailable.code(),
                    retry_after_secs,
                    "admission refused: {}",
                    sanitize_for_log(&reason)
                );
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    reason,
                    None,
                    ErrorCode::ServiceUnavailable,
                    Some(retry_after_secs),
                )
            }
            AppError::StoreUnavailable(msg) => {
                tracing::error!(
                    error_code = ErrorCode::ServiceUnavailable.code(),
                    "store unavailable: {}",
                    sanitize_for_log(&msg)
                );
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorCode::ServiceUnavailable.default_message().to_string(),
                    None,
                    ErrorCode::ServiceUnavailable,
                    Some(5),
                )
            }
            AppError::UpstreamSemanticError(msg) => {
                tracing::warn!(
                    error_code = ErrorCode::UpstreamSemanticError.code(),
                    "{}",
                    sanitize_for_log(&msg)
                );
                (
                    StatusCode::BAD_GATEWAY,
                    msg,
                    None,
                    ErrorCode::UpstreamSemanticError,
                    None,
                )
            }
            AppError::JsonExtractorRejection(e) => {
                tracing::warn!(
                    error_code = ErrorCode::JsonExtraction.code(),
                    "JSON extraction error: {}",
                    sanitize_for_log(&format!("{e:?}"))
                );
                (e.status(), e.body_text(), None, ErrorCode::JsonExtraction, None)
            }
            AppError::UuidError(e) => {
                tracing::warn!(
                    error_code = ErrorCode::InvalidUuid.code(),
                    "{}",
                    sanitize_for_log(&e.to_string())
                );
                (
                    StatusCode::BAD_REQUEST,
                    ErrorCode::InvalidUuid.default_message().to_string(),
                    None,
                    ErrorCode::InvalidUuid,
                    None,
                )
            }
            AppError::Internal(msg) => {
                tracing::error!(
                    error_code = ErrorCode::InternalError.code(),
                    "{}",
                    sanitize_for_log(&msg)
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::InternalError.default_message().to_string(),
                    None,
                    ErrorCode::InternalError,
                    None,
                )
            }
        };

        let body = Json(ErrorResponse {
            code: code.code(),
            error: code.as_str().to_string(),
            message,
            details,
        });

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                let mut headers = HeaderMap::new();
                headers.insert("Retry-After", value);
                response.headers_mut().extend(headers);
            }
        }
        response
    }
}

/// Helper to build an ad-hoc error response outside the `AppError` enum.
pub fn error_response(status: StatusCode, message: String, error_code: ErrorCode) -> Response {
    let body = Json(ErrorResponse {
        code: error_code.code(),
        error: error_code.as_str().to_string(),
        message,
        details: None,
    });

    (status, body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_for_log_strips_control_characters() {
        let dirty = "unsupported content type: audio/evil\r\nSet-Cookie: x=1\x07";
        let cleaned = sanitize_for_log(dirty);
        assert!(!cleaned.contains('\r'));
        assert!(!cleaned.contains('\n'));
        assert!(!cleaned.contains('\x07'));
        assert!(cleaned.contains("audio/evil"));
    }

    #[test]
    fn sanitize_for_log_truncates_long_messages() {
        let long = "a".repeat(1000);
        let cleaned = sanitize_for_log(&long);
        assert!(cleaned.chars().count() < 1000);
        assert!(cleaned.ends_with('…'));
    }
}
