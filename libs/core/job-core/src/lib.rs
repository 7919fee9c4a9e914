//! Core job-processing primitives shared by every worker pool and the
//! job-service façade: the job entity and its state machine, the durable
//! job store, the retry policy engine, resilience patterns for upstream
//! calls, the worker health registry, the degradation controller, metrics,
//! and the admin/health HTTP surface.

pub mod config;
pub mod degradation;
pub mod error;
pub mod health;
pub mod health_registry;
pub mod job;
pub mod metrics;
pub mod resilience;
pub mod store;

pub use config::JobCoreConfig;
pub use degradation::{
    AdmissionDecision, DegradationController, DegradationLevel, DegradationThresholds,
    ProbeOutcome, SystemHealthMonitor,
};
pub use error::{ErrorCategory, RetryDecision, RetryPolicyConfig, RetryPolicyEngine};
pub use health_registry::{HealthRegistry, HealthRegistryConfig, WorkerDescriptor};
pub use job::{Job, JobState, JobType, DEFAULT_MAX_ATTEMPTS};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, RateLimiter, ResilienceError, ResilienceLayer};
pub use store::{InMemoryJobStore, JobStore, QueueStats, RedisJobStore, SingleQueueStats, StoreError};
