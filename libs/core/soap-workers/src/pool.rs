//! The Worker Pool Scheduler (§4.F): owns a fixed-size set of managed
//! workers per queue, dispatches them on a fixed interval, runs a separate
//! housekeeping tick (promoting due delayed jobs, pruning old terminal
//! jobs, replacing unhealthy workers), and shuts down cooperatively.
//!
//! The dispatch/shutdown shape follows the usual cooperative-shutdown
//! pattern for polling loops in this codebase: a `tokio::sync::watch`
//! shutdown signal raced against a sleep inside `tokio::select!`, with
//! in-flight work drained under a grace period — generalized here to many
//! independently-ticking worker loops instead of one.

use std::sync::Arc;
use std::time::Duration;

use job_core::{HealthRegistry, JobStore};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::worker::ManagedWorker;

/// A worker constructor, called once per worker (including replacements for
/// workers the housekeeping tick tears down). Takes the fresh worker id the
/// scheduler assigned it.
pub type WorkerFactory = Arc<dyn Fn(String) -> Arc<dyn ManagedWorker> + Send + Sync>;

#[derive(Clone)]
struct PoolSpec {
    pool_name: String,
    queue_name: String,
    size: usize,
    factory: WorkerFactory,
}

/// A handle identifying one configured pool, returned by `add_pool` for
/// logging/introspection.
#[derive(Debug, Clone)]
pub struct PoolHandle {
    pub pool_name: String,
    pub queue_name: String,
    pub size: usize,
}

#[derive(Debug, Clone)]
pub struct WorkerPoolSchedulerConfig {
    /// How often each worker polls its queue (§4.F, e.g. 500ms).
    pub dispatch_interval: Duration,
    /// How often the housekeeping tick runs `promote_due`, `cleanup_terminal`,
    /// and checks worker health.
    pub housekeeping_interval: Duration,
    /// How long a terminal job is kept before `cleanup_terminal` removes it.
    pub terminal_retention: chrono::Duration,
    /// How long to wait for in-flight ticks to finish on shutdown before
    /// aborting them.
    pub shutdown_grace: Duration,
}

impl Default for WorkerPoolSchedulerConfig {
    fn default() -> Self {
        Self {
            dispatch_interval: Duration::from_millis(500),
            housekeeping_interval: Duration::from_secs(5),
            terminal_retention: chrono::Duration::days(7),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("store error: {0}")]
    Store(#[from] job_core::StoreError),
}

/// The Worker Pool Scheduler (§4.F). One instance owns every pool in the
/// job-worker process; `run` blocks until `shutdown` fires and every
/// dispatch/housekeeping task has wound down (or the grace period elapses).
pub struct WorkerPoolScheduler {
    store: Arc<dyn JobStore>,
    health_registry: Arc<HealthRegistry>,
    config: WorkerPoolSchedulerConfig,
    pools: Vec<PoolSpec>,
}

impl WorkerPoolScheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        health_registry: Arc<HealthRegistry>,
        config: WorkerPoolSchedulerConfig,
    ) -> Self {
        Self {
            store,
            health_registry,
            config,
            pools: Vec::new(),
        }
    }

    /// Register a pool of `size` workers, all on `queue_name`, built by
    /// `factory`. Must be called before `run`.
    pub fn add_pool(
        &mut self,
        pool_name: impl Into<String>,
        queue_name: impl Into<String>,
        size: usize,
        factory: WorkerFactory,
    ) -> PoolHandle {
        let pool_name = pool_name.into();
        let queue_name = queue_name.into();
        self.pools.push(PoolSpec {
            pool_name: pool_name.clone(),
            queue_name: queue_name.clone(),
            size,
            factory,
        });
        PoolHandle {
            pool_name,
            queue_name,
            size,
        }
    }

    /// Run every configured pool plus the housekeeping tick until
    /// `shutdown` fires, then wait out `shutdown_grace` for in-flight ticks
    /// to finish before aborting whatever remains.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), PoolError> {
        let tasks: Arc<Mutex<JoinSet<()>>> = Arc::new(Mutex::new(JoinSet::new()));

        for pool in &self.pools {
            for _ in 0..pool.size {
                self.spawn_worker(pool, tasks.clone(), shutdown.clone()).await;
            }
        }
        self.spawn_housekeeping(tasks.clone(), shutdown.clone()).await;

        let mut shutdown_rx = shutdown;
        while !*shutdown_rx.borrow() {
            if shutdown_rx.changed().await.is_err() {
                break;
            }
        }

        info!("worker pool scheduler shutting down, draining in-flight ticks");
        let mut tasks = tasks.lock().await;
        let drain = tokio::time::timeout(self.config.shutdown_grace, async {
            while tasks.join_next().await.is_some() {}
        });
        if drain.await.is_err() {
            warn!("shutdown grace period elapsed, aborting remaining worker tasks");
            tasks.abort_all();
        }

        Ok(())
    }

    async fn spawn_worker(&self, pool: &PoolSpec, tasks: Arc<Mutex<JoinSet<()>>>, shutdown: watch::Receiver<bool>) {
        let worker_id = format!("{}-{}", pool.pool_name, Uuid::now_v7());
        self.health_registry.register(&worker_id, &pool.pool_name);
        let worker = (pool.factory)(worker_id.clone());
        let health_registry = self.health_registry.clone();
        let interval = self.config.dispatch_interval;

        let mut tasks = tasks.lock().await;
        tasks.spawn(run_worker_loop(worker, health_registry, interval, shutdown));
    }

    async fn spawn_housekeeping(&self, tasks: Arc<Mutex<JoinSet<()>>>, shutdown: watch::Receiver<bool>) {
        let store = self.store.clone();
        let health_registry = self.health_registry.clone();
        let pools = self.pools.clone();
        let interval = self.config.housekeeping_interval;
        let dispatch_interval = self.config.dispatch_interval;
        let retention = self.config.terminal_retention;
        let tasks_for_restarts = tasks.clone();

        let mut guard = tasks.lock().await;
        guard.spawn(async move {
            let mut shutdown = shutdown;
            loop {
                if *shutdown.borrow() {
                    break;
                }

                for pool in &pools {
                    match store.promote_due(&pool.queue_name).await {
                        Ok(n) if n > 0 => info!(queue = %pool.queue_name, promoted = n, "promoted delayed jobs to ready"),
                        Ok(_) => {}
                        Err(e) => warn!(queue = %pool.queue_name, error = %e, "promote_due failed"),
                    }
                }

                match store.cleanup_terminal(retention).await {
                    Ok(n) if n > 0 => info!(removed = n, "pruned expired terminal jobs"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "cleanup_terminal failed"),
                }

                for pool in &pools {
                    let healthy = health_registry.active_count(&pool.pool_name);
                    if healthy < pool.size {
                        let deficit = pool.size - healthy;
                        for _ in 0..deficit {
                            info!(pool = %pool.pool_name, "restarting a deactivated worker with a fresh id");
                            let worker_id = format!("{}-{}", pool.pool_name, Uuid::now_v7());
                            health_registry.register(&worker_id, &pool.pool_name);
                            let worker = (pool.factory)(worker_id);
                            let mut tasks = tasks_for_restarts.lock().await;
                            tasks.spawn(run_worker_loop(
                                worker,
                                health_registry.clone(),
                                dispatch_interval,
                                shutdown.clone(),
                            ));
                        }
                    }
                }

                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!("housekeeping loop exited");
        });
    }
}

/// One worker's drain loop: heartbeat/pop/process on `interval`, stop
/// ticking once the health registry reports this worker unhealthy (it has
/// either been deactivated by `record_job`'s failure streak or gone stale),
/// and stop immediately on shutdown.
async fn run_worker_loop(
    worker: Arc<dyn ManagedWorker>,
    health_registry: Arc<HealthRegistry>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let worker_id = worker.worker_id().to_string();
    loop {
        if *shutdown.borrow() || !health_registry.is_healthy(&worker_id) {
            break;
        }

        if let Err(e) = worker.process_once().await {
            warn!(worker_id = %worker_id, error = %e, "worker tick failed before a job outcome could be recorded");
            health_registry.record_job(&worker_id, false);
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
    info!(worker_id = %worker_id, "worker loop exited");
}
