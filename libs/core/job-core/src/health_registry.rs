//! Worker Health Registry (§4.C): tracks liveness and failure streaks for
//! every worker instance in the pool, independent of any particular job.
//!
//! This is an in-process registry — unlike the job store it does not need
//! to survive a restart, since workers re-register on startup.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A worker's health record (§3: WorkerDescriptor).
#[derive(Debug, Clone, Serialize)]
pub struct WorkerDescriptor {
    pub worker_id: String,
    pub pool: String,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub jobs_processed: u64,
    /// Deactivation is irreversible; a deactivated worker must restart with
    /// a fresh id to rejoin the pool.
    pub active: bool,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl WorkerDescriptor {
    fn new(worker_id: String, pool: String) -> Self {
        let now = Utc::now();
        Self {
            worker_id,
            pool,
            registered_at: now,
            last_heartbeat_at: now,
            consecutive_failures: 0,
            jobs_processed: 0,
            active: true,
            deactivated_at: None,
        }
    }
}

/// Whether a worker is stale: no heartbeat within `2 * dispatch_interval +
/// slack` (§4.C).
fn is_stale(worker: &WorkerDescriptor, staleness_threshold: chrono::Duration) -> bool {
    Utc::now() - worker.last_heartbeat_at > staleness_threshold
}

#[derive(Debug, Clone)]
pub struct HealthRegistryConfig {
    /// Consecutive job failures before a worker is auto-deactivated.
    pub consecutive_failure_limit: u32,
    /// How long a worker can go without a heartbeat before it's considered
    /// stale (and excluded from `active_count`/dispatch eligibility).
    pub staleness_threshold: chrono::Duration,
}

impl Default for HealthRegistryConfig {
    fn default() -> Self {
        Self {
            consecutive_failure_limit: 5,
            staleness_threshold: chrono::Duration::milliseconds(2 * 30_000 + 5_000),
        }
    }
}

/// The Worker Health Registry (§4.C).
pub struct HealthRegistry {
    workers: RwLock<HashMap<String, WorkerDescriptor>>,
    config: HealthRegistryConfig,
}

impl HealthRegistry {
    pub fn new(config: HealthRegistryConfig) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn register(&self, worker_id: impl Into<String>, pool: impl Into<String>) {
        let worker_id = worker_id.into();
        let descriptor = WorkerDescriptor::new(worker_id.clone(), pool.into());
        self.workers.write().unwrap().insert(worker_id, descriptor);
    }

    /// Record a liveness signal. No-op if the worker was already
    /// deactivated — deactivation is terminal.
    pub fn heartbeat(&self, worker_id: &str) {
        if let Some(w) = self.workers.write().unwrap().get_mut(worker_id) {
            if w.active {
                w.last_heartbeat_at = Utc::now();
            }
        }
    }

    /// Record the outcome of a job this worker just finished. A success
    /// resets the consecutive-failure streak; a failure increments it and
    /// auto-deactivates the worker once it crosses the configured limit.
    pub fn record_job(&self, worker_id: &str, succeeded: bool) {
        let mut workers = self.workers.write().unwrap();
        let Some(w) = workers.get_mut(worker_id) else {
            return;
        };
        if !w.active {
            return;
        }

        w.jobs_processed += 1;
        if succeeded {
            w.consecutive_failures = 0;
        } else {
            w.consecutive_failures += 1;
            if w.consecutive_failures >= self.config.consecutive_failure_limit {
                w.active = false;
                w.deactivated_at = Some(Utc::now());
            }
        }
    }

    /// Deactivate a worker directly (e.g. on graceful shutdown or an
    /// operator request). Irreversible.
    pub fn deactivate(&self, worker_id: &str) {
        if let Some(w) = self.workers.write().unwrap().get_mut(worker_id) {
            if w.active {
                w.active = false;
                w.deactivated_at = Some(Utc::now());
            }
        }
    }

    /// A worker is healthy if it's active and has sent a heartbeat within
    /// the staleness window.
    pub fn is_healthy(&self, worker_id: &str) -> bool {
        self.workers
            .read()
            .unwrap()
            .get(worker_id)
            .map(|w| w.active && !is_stale(w, self.config.staleness_threshold))
            .unwrap_or(false)
    }

    pub fn active_count(&self, pool: &str) -> usize {
        self.workers
            .read()
            .unwrap()
            .values()
            .filter(|w| w.pool == pool && w.active && !is_stale(w, self.config.staleness_threshold))
            .count()
    }

    pub fn snapshot(&self) -> Vec<WorkerDescriptor> {
        self.workers.read().unwrap().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_limit(limit: u32) -> HealthRegistry {
        HealthRegistry::new(HealthRegistryConfig {
            consecutive_failure_limit: limit,
            ..HealthRegistryConfig::default()
        })
    }

    #[test]
    fn registered_worker_starts_healthy() {
        let registry = registry_with_limit(5);
        registry.register("w1", "text_processing");
        assert!(registry.is_healthy("w1"));
        assert_eq!(registry.active_count("text_processing"), 1);
    }

    #[test]
    fn consecutive_failures_deactivate_worker() {
        let registry = registry_with_limit(3);
        registry.register("w1", "text_processing");

        registry.record_job("w1", false);
        registry.record_job("w1", false);
        assert!(registry.is_healthy("w1"));

        registry.record_job("w1", false);
        assert!(!registry.is_healthy("w1"));
        assert_eq!(registry.active_count("text_processing"), 0);
    }

    #[test]
    fn success_resets_failure_streak() {
        let registry = registry_with_limit(3);
        registry.register("w1", "text_processing");

        registry.record_job("w1", false);
        registry.record_job("w1", false);
        registry.record_job("w1", true);
        registry.record_job("w1", false);
        registry.record_job("w1", false);

        assert!(registry.is_healthy("w1"));
    }

    #[test]
    fn deactivation_is_irreversible() {
        let registry = registry_with_limit(5);
        registry.register("w1", "text_processing");
        registry.deactivate("w1");
        registry.heartbeat("w1");

        assert!(!registry.is_healthy("w1"));
    }

    #[test]
    fn stale_heartbeat_counts_as_unhealthy() {
        let registry = HealthRegistry::new(HealthRegistryConfig {
            consecutive_failure_limit: 5,
            staleness_threshold: chrono::Duration::milliseconds(0),
        });
        registry.register("w1", "text_processing");
        // staleness_threshold of 0 means any elapsed time counts as stale.
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(!registry.is_healthy("w1"));
    }
}
