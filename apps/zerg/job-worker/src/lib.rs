//! Job Worker Service
//!
//! The background process that drains the job-processing subsystem's
//! queues: it owns every managed worker pool (text, audio, transcription),
//! the housekeeping tick that promotes delayed jobs and prunes terminal
//! ones, and the admin/health HTTP surface operators poll.
//!
//! ## Architecture
//!
//! ```text
//! Redis (job:*, queue:*, delayed:*)
//!   ↓
//! RedisJobStore (job-core)
//!   ↓
//! WorkerPoolScheduler (soap-workers)
//!   ├─ text_processing pool    → TextWorker  → agent upstream
//!   ├─ audio_processing pool   → AudioWorker → transcription + agent upstreams
//!   └─ transcription_only pool → AudioWorker (transcription only)
//!   ↓
//! HealthRegistry / SystemHealthMonitor
//!   ↓
//! admin_router (job-core) — /health, /ready, /metrics, /admin/*
//! ```
//!
//! Job submission, status lookup, and cancellation (the façade in
//! `domain_jobs`) are consumed by the HTTP/authentication layer, which is
//! not part of this process.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use core_config::server::ServerConfig;
use core_config::{app_info, Environment, FromEnv};
use eyre::{Result, WrapErr};
use job_core::health::{admin_router, AdminState};
use job_core::{
    DegradationThresholds, HealthRegistry, HealthRegistryConfig, InMemoryJobStore, JobCoreConfig,
    JobStore, JobType, RedisJobStore, RetryPolicyEngine, SystemHealthMonitor,
};
use redis::aio::ConnectionManager;
use soap_workers::{
    AgentClient, AudioBlobStore, AudioWorker, InMemoryAudioBlobStore, ManagedWorker, TextWorker,
    TranscriptionClient, WorkerPoolScheduler, WorkerPoolSchedulerConfig,
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Connect to Redis with a handful of retries; fall back to the in-memory
/// store (§4.A: "the implementation must degrade to an in-memory fallback
/// when external storage is unavailable") if every attempt fails.
async fn connect_store(redis_uri: &str, key_prefix: &str) -> (Arc<dyn JobStore>, Option<Arc<ConnectionManager>>) {
    let client = match redis::Client::open(redis_uri) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "invalid redis uri, falling back to in-memory job store");
            return (Arc::new(InMemoryJobStore::new()), None);
        }
    };

    let mut attempt = 0;
    loop {
        match ConnectionManager::new(client.clone()).await {
            Ok(conn) => {
                info!("connected to redis");
                let store: Arc<dyn JobStore> = Arc::new(RedisJobStore::new(conn.clone(), key_prefix));
                return (store, Some(Arc::new(conn)));
            }
            Err(e) => {
                attempt += 1;
                if attempt >= 5 {
                    error!(error = %e, "exhausted redis connection retries, falling back to in-memory job store");
                    return (Arc::new(InMemoryJobStore::new()), None);
                }
                warn!(error = %e, attempt, "redis connection failed, retrying");
                tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
            }
        }
    }
}

async fn start_admin_server(state: AdminState, server: ServerConfig) -> Result<()> {
    let app: Router = admin_router(state);

    let addr = server.address();
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("failed to bind admin server to {}", addr))?;

    info!(addr = %addr, "admin/health server listening");

    axum::serve(listener, app)
        .await
        .wrap_err("admin server failed")?;

    Ok(())
}

/// Run the job worker.
///
/// 1. Loads `JobCoreConfig` from the environment.
/// 2. Connects to Redis (or falls back to an in-memory store).
/// 3. Builds the health registry and degradation monitor.
/// 4. Registers one pool per job type against the text/audio worker
///    implementations and runs the scheduler until shutdown.
pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);
    job_core::metrics::init_metrics();

    let app_info = app_info!();
    info!(name = %app_info.name, version = %app_info.version, "starting job worker");

    let config = JobCoreConfig::from_env().wrap_err("failed to load job-core configuration")?;

    // `JOB_WORKER_HEALTH_PORT`/`HEALTH_PORT` are a service-specific override
    // of `core_config::server::ServerConfig`'s generic `HOST`/`PORT` pair,
    // for deployments that run this worker alongside another HTTP surface
    // on the same generic `PORT`.
    let mut admin_server = ServerConfig::from_env().unwrap_or_default();
    if let Some(port) = std::env::var("JOB_WORKER_HEALTH_PORT")
        .or_else(|_| std::env::var("HEALTH_PORT"))
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
    {
        admin_server.port = port;
    }

    let (store, redis_conn) = connect_store(&config.redis_uri, &config.key_prefix).await;

    let health_registry = Arc::new(HealthRegistry::new(HealthRegistryConfig {
        consecutive_failure_limit: config.consecutive_failure_limit,
        staleness_threshold: chrono::Duration::milliseconds(
            2 * config.dispatch_interval_ms as i64 + config.heartbeat_stale_slack_ms as i64,
        ),
    }));

    let health_monitor = Arc::new(SystemHealthMonitor::new(DegradationThresholds {
        window_size: config.degradation_window_size,
        ..DegradationThresholds::default()
    }));

    let retry_policy = RetryPolicyEngine::new(config.retry_policy.clone());
    let upstream_timeout = Duration::from_millis(config.upstream_timeout_ms);

    let agent_client = AgentClient::new(config.agent_service_url.clone(), upstream_timeout);
    let transcription_client =
        TranscriptionClient::new(config.transcription_service_url.clone(), upstream_timeout);
    // §4.A describes audio as fetched by reference (`audioBlobRef`); the
    // in-memory blob store stands in for whatever object storage backs the
    // out-of-scope upload path.
    let audio_store: Arc<dyn AudioBlobStore> = Arc::new(InMemoryAudioBlobStore::new());

    let mut scheduler = WorkerPoolScheduler::new(
        store.clone(),
        health_registry.clone(),
        WorkerPoolSchedulerConfig {
            dispatch_interval: Duration::from_millis(config.dispatch_interval_ms),
            ..WorkerPoolSchedulerConfig::default()
        },
    );

    {
        let store = store.clone();
        let retry_policy = retry_policy.clone();
        let health_registry = health_registry.clone();
        let agent_client = agent_client.clone();
        let queue_name = JobType::TextToSoap.default_queue_name();
        scheduler.add_pool(
            "text_processing",
            queue_name,
            config.text_pool_size,
            Arc::new(move |worker_id| {
                Arc::new(TextWorker::new(
                    worker_id,
                    queue_name,
                    store.clone(),
                    retry_policy.clone(),
                    health_registry.clone(),
                    agent_client.clone(),
                    upstream_timeout,
                )) as Arc<dyn ManagedWorker>
            }),
        );
    }

    {
        let store = store.clone();
        let retry_policy = retry_policy.clone();
        let health_registry = health_registry.clone();
        let transcription_client = transcription_client.clone();
        let agent_client = agent_client.clone();
        let audio_store = audio_store.clone();
        let min_audio_bytes = config.min_audio_bytes;
        let max_audio_bytes = config.max_audio_bytes;
        let queue_name = JobType::AudioToSoap.default_queue_name();
        scheduler.add_pool(
            "audio_processing",
            queue_name,
            config.audio_pool_size,
            Arc::new(move |worker_id| {
                Arc::new(AudioWorker::new(
                    worker_id,
                    queue_name,
                    store.clone(),
                    retry_policy.clone(),
                    health_registry.clone(),
                    transcription_client.clone(),
                    agent_client.clone(),
                    audio_store.clone(),
                    upstream_timeout,
                    min_audio_bytes,
                    max_audio_bytes,
                    true,
                )) as Arc<dyn ManagedWorker>
            }),
        );
    }

    {
        let store = store.clone();
        let retry_policy = retry_policy.clone();
        let health_registry = health_registry.clone();
        let transcription_client = transcription_client.clone();
        let agent_client = agent_client.clone();
        let audio_store = audio_store.clone();
        let min_audio_bytes = config.min_audio_bytes;
        let max_audio_bytes = config.max_audio_bytes;
        let queue_name = JobType::TranscriptionOnly.default_queue_name();
        scheduler.add_pool(
            "transcription_only",
            queue_name,
            config.transcription_pool_size,
            Arc::new(move |worker_id| {
                Arc::new(AudioWorker::new(
                    worker_id,
                    queue_name,
                    store.clone(),
                    retry_policy.clone(),
                    health_registry.clone(),
                    transcription_client.clone(),
                    agent_client.clone(),
                    audio_store.clone(),
                    upstream_timeout,
                    min_audio_bytes,
                    max_audio_bytes,
                    false,
                )) as Arc<dyn ManagedWorker>
            }),
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!(error = %e, "error waiting for shutdown signal");
        }
        let _ = shutdown_tx.send(true);
    });

    if let Some(redis_conn) = redis_conn {
        let admin_state = AdminState {
            redis: redis_conn,
            app_name: app_info.name,
            app_version: app_info.version,
            store: store.clone(),
            health_registry: health_registry.clone(),
            health_monitor: health_monitor.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = start_admin_server(admin_state, admin_server).await {
                error!(error = %e, "admin server failed");
            }
        });
    } else {
        warn!("no redis connection available, admin/health server disabled");
    }

    info!("starting worker pool scheduler");
    scheduler
        .run(shutdown_rx)
        .await
        .map_err(|e| eyre::eyre!("{}", e))?;

    info!("job worker stopped");
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received ctrl+c, initiating shutdown...");
        },
        _ = terminate => {
            info!("received sigterm, initiating shutdown...");
        },
    }

    Ok(())
}
