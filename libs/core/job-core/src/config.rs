//! Job-core configuration (§6), sourced from the environment via
//! `core_config::FromEnv`. The Redis connection string is delegated to
//! `core_config::redis::RedisConfig` rather than read directly, so the
//! `REDIS_HOST` contract lives in one place.

use core_config::redis::RedisConfig;
use core_config::{env_or_default, env_parsed_or_default, env_required, FromEnv};

use crate::error::RetryPolicyConfig;

#[derive(Clone, Debug)]
pub struct JobCoreConfig {
    pub redis_uri: String,
    pub key_prefix: String,

    /// Per-queue dispatch interval — how often a worker pool polls its
    /// queue for the next ready job.
    pub dispatch_interval_ms: u64,
    /// Worker pool size, per job-type pool.
    pub text_pool_size: usize,
    pub audio_pool_size: usize,
    pub transcription_pool_size: usize,

    /// Input size bounds for audio jobs (§3 edge cases).
    pub min_audio_bytes: usize,
    pub max_audio_bytes: usize,
    /// Input length bound for text jobs.
    pub max_text_chars: usize,

    pub transcription_service_url: String,
    pub agent_service_url: String,
    pub upstream_timeout_ms: u64,

    pub retry_policy: RetryPolicyConfig,

    /// Worker considered stale after `2 * dispatch_interval_ms + slack`.
    pub heartbeat_stale_slack_ms: u64,
    pub consecutive_failure_limit: u32,

    /// How long terminal jobs are retained before `cleanup_terminal` evicts
    /// them.
    pub retention_days: i64,

    pub degradation_window_size: usize,
}

impl FromEnv for JobCoreConfig {
    fn from_env() -> eyre::Result<Self> {
        Ok(Self {
            redis_uri: RedisConfig::from_env()?.uri,
            key_prefix: env_or_default("JOB_KEY_PREFIX", "jobs:"),

            dispatch_interval_ms: env_parsed_or_default("DISPATCH_INTERVAL_MS", 500),
            text_pool_size: env_parsed_or_default("TEXT_WORKER_POOL_SIZE", 4),
            audio_pool_size: env_parsed_or_default("AUDIO_WORKER_POOL_SIZE", 2),
            transcription_pool_size: env_parsed_or_default("TRANSCRIPTION_WORKER_POOL_SIZE", 2),

            min_audio_bytes: env_parsed_or_default("MIN_AUDIO_BYTES", 1_024),
            max_audio_bytes: env_parsed_or_default("MAX_AUDIO_BYTES", 25 * 1024 * 1024),
            max_text_chars: env_parsed_or_default("MAX_TEXT_CHARS", 10_000),

            transcription_service_url: env_required("TRANSCRIPTION_SERVICE_URL")?,
            agent_service_url: env_required("AGENT_SERVICE_URL")?,
            upstream_timeout_ms: env_parsed_or_default("UPSTREAM_TIMEOUT_MS", 30_000),

            retry_policy: RetryPolicyConfig {
                base_ms: env_parsed_or_default("RETRY_BASE_MS", 100),
                multiplier: env_parsed_or_default("RETRY_MULTIPLIER", 2.0),
                ceiling_ms: env_parsed_or_default("RETRY_CEILING_MS", 30_000),
                jitter_fraction: env_parsed_or_default("RETRY_JITTER_FRACTION", 0.25),
                rate_limited_base_ms: env_parsed_or_default("RETRY_RATE_LIMITED_BASE_MS", 1_000),
                rate_limited_ceiling_ms: env_parsed_or_default(
                    "RETRY_RATE_LIMITED_CEILING_MS",
                    120_000,
                ),
                resource_exhausted_base_ms: env_parsed_or_default(
                    "RETRY_RESOURCE_EXHAUSTED_BASE_MS",
                    2_000,
                ),
            },

            heartbeat_stale_slack_ms: env_parsed_or_default("HEARTBEAT_STALE_SLACK_MS", 5_000),
            consecutive_failure_limit: env_parsed_or_default("CONSECUTIVE_FAILURE_LIMIT", 5),

            retention_days: env_parsed_or_default("JOB_RETENTION_DAYS", 7),

            degradation_window_size: env_parsed_or_default("DEGRADATION_WINDOW_SIZE", 20),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_requires_redis_host() {
        temp_env::with_vars(
            [
                ("REDIS_HOST", None::<&str>),
                ("TRANSCRIPTION_SERVICE_URL", Some("http://localhost:9001")),
                ("AGENT_SERVICE_URL", Some("http://localhost:9002")),
            ],
            || {
                let result = JobCoreConfig::from_env();
                assert!(result.is_err());
            },
        );
    }

    #[test]
    fn from_env_applies_defaults() {
        temp_env::with_vars(
            [
                ("REDIS_HOST", Some("redis://localhost:6379")),
                ("TRANSCRIPTION_SERVICE_URL", Some("http://localhost:9001")),
                ("AGENT_SERVICE_URL", Some("http://localhost:9002")),
                ("DISPATCH_INTERVAL_MS", None::<&str>),
            ],
            || {
                let config = JobCoreConfig::from_env().unwrap();
                assert_eq!(config.dispatch_interval_ms, 500);
                assert_eq!(config.key_prefix, "jobs:");
                assert_eq!(config.consecutive_failure_limit, 5);
            },
        );
    }
}
