//! # Axum Helpers
//!
//! A small collection of utilities for the façade's HTTP-facing surface:
//!
//! - **Error Handling**: structured error responses with proper HTTP status
//!   codes, matching the error taxonomy used across logs and metrics
//! - **Extractors**: `UuidPath` and `ValidatedJson` for common request shapes
//!
//! Authentication, sessions, CORS, and CSRF middleware are intentionally not
//! part of this crate — the HTTP/auth surface is an external collaborator.
//! The admin/health/metrics surface this system actually serves lives in
//! `job_core::health` (queue stats and worker registry are domain-specific
//! enough that a generic health handler here would just be a second,
//! unwired surface).

pub mod errors;
pub mod extractors;

pub use errors::{AppError, ErrorCode, ErrorResponse};
pub use extractors::{UuidPath, ValidatedJson};
