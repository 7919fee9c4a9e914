//! Prometheus metrics for the job processing subsystem.
//!
//! Owns the single global Prometheus recorder for the whole service — the
//! generic `observability` crate's axum middleware feeds request counters
//! into this same recorder rather than installing its own.
//!
//! ## Available metrics
//!
//! - `job_submitted_total` - counter of jobs admitted, by job type
//! - `job_completed_total` - counter of terminal outcomes, by job type and state
//! - `job_processing_duration_seconds` - histogram of time in `processing`
//! - `job_queue_depth` - gauge of ready (non-delayed) queue length
//! - `job_delayed_depth` - gauge of delayed/retry-scheduled queue length
//! - `job_retries_total` - counter of retry attempts, by error category
//! - `worker_active_count` - gauge of healthy workers per pool
//! - `degradation_level` - gauge, 0=normal .. 3=critical

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

use crate::degradation::DegradationLevel;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub mod names {
    pub const JOB_SUBMITTED: &str = "job_submitted_total";
    pub const JOB_COMPLETED: &str = "job_completed_total";
    pub const JOB_DURATION: &str = "job_processing_duration_seconds";
    pub const QUEUE_DEPTH: &str = "job_queue_depth";
    pub const DELAYED_DEPTH: &str = "job_delayed_depth";
    pub const RETRIES: &str = "job_retries_total";
    pub const WORKER_ACTIVE_COUNT: &str = "worker_active_count";
    pub const DEGRADATION_LEVEL: &str = "degradation_level";
}

/// Install the global Prometheus recorder. Idempotent — safe to call from
/// every binary's startup path.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

pub fn record_job_submitted(job_type: &str) {
    counter!(names::JOB_SUBMITTED, "job_type" => job_type.to_string()).increment(1);
}

pub fn record_job_completed(job_type: &str, state: &str) {
    counter!(
        names::JOB_COMPLETED,
        "job_type" => job_type.to_string(),
        "state" => state.to_string()
    )
    .increment(1);
}

pub fn record_job_duration(job_type: &str, duration: Duration) {
    histogram!(names::JOB_DURATION, "job_type" => job_type.to_string())
        .record(duration.as_secs_f64());
}

pub fn set_queue_depth(queue_name: &str, depth: f64) {
    gauge!(names::QUEUE_DEPTH, "queue" => queue_name.to_string()).set(depth);
}

pub fn set_delayed_depth(queue_name: &str, depth: f64) {
    gauge!(names::DELAYED_DEPTH, "queue" => queue_name.to_string()).set(depth);
}

pub fn record_retry(job_type: &str, category: &str) {
    counter!(
        names::RETRIES,
        "job_type" => job_type.to_string(),
        "category" => category.to_string()
    )
    .increment(1);
}

pub fn set_worker_active_count(pool: &str, count: f64) {
    gauge!(names::WORKER_ACTIVE_COUNT, "pool" => pool.to_string()).set(count);
}

pub fn set_degradation_level(level: DegradationLevel) {
    let value = match level {
        DegradationLevel::Normal => 0.0,
        DegradationLevel::Minor => 1.0,
        DegradationLevel::Major => 2.0,
        DegradationLevel::Critical => 3.0,
    };
    gauge!(names::DEGRADATION_LEVEL).set(value);
}

/// Times a job's processing span and records the duration on drop (or on
/// an explicit `stop()`).
pub struct JobTimer {
    job_type: String,
    start: std::time::Instant,
}

impl JobTimer {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            start: std::time::Instant::now(),
        }
    }

    pub fn stop(self) {
        record_job_duration(&self.job_type, self.start.elapsed());
    }
}

impl Drop for JobTimer {
    fn drop(&mut self) {
        record_job_duration(&self.job_type, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_timer_records_elapsed_on_drop() {
        let timer = JobTimer::new("text_to_soap");
        std::thread::sleep(std::time::Duration::from_millis(5));
        drop(timer);
    }
}
