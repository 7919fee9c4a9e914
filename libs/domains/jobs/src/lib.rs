//! Jobs Domain
//!
//! The Job Service façade (§4.G): the HTTP-facing boundary between a
//! client and the asynchronous job-processing subsystem. Everything else
//! — the durable store, retry policy, worker health registry, and
//! degradation monitor — lives in `job-core`; everything that turns a job
//! into a finished SOAP note lives in `soap-workers`. This crate only
//! validates requests, checks admission, and translates between the job
//! record and the client-facing DTOs.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │   Service   │  ← Validation, admission, ownership checks
//! └──────┬──────┘
//!        │
//! ┌──────▼──────┐
//! │   Models    │  ← Request/response DTOs
//! └─────────────┘
//! ```

pub mod error;
pub mod models;
pub mod service;

pub use error::{store_error, JobResult};
pub use models::{
    AudioLimits, CreateJobRequest, JobListQuery, JobStatusResponse, QueueStatsResponse,
    MAX_LIST_PAGE_SIZE,
};
pub use service::JobService;
