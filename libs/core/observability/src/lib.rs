//! Generic axum HTTP observability glue.
//!
//! This crate provides:
//! - Axum middleware for automatic request metrics
//!
//! Metric registration and the Prometheus exporter itself live in
//! `job_core::metrics` — this crate only supplies the HTTP layer that
//! feeds counters into that recorder.
//!
//! # Example
//!
//! ```rust,ignore
//! use axum::{Router, middleware};
//! use observability::metrics_middleware;
//!
//! let app = Router::new()
//!     .route("/", get(handler))
//!     .layer(middleware::from_fn(metrics_middleware));
//! ```

pub mod middleware;

pub use middleware::metrics_middleware;

// Re-export metrics macros for convenience so callers don't need a direct
// dependency on the `metrics` crate just to record a counter.
pub use metrics::{counter, gauge, histogram};
