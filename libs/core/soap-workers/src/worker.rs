//! Managed worker implementations (§4.E).
//!
//! The text worker and audio worker share one control flow — heartbeat,
//! `pop_next`, validate input, call the upstream(s), feed the outcome
//! through the retry policy engine — but differ in which upstream(s) they
//! call and what shape their input/output takes. Both are driven by the
//! scheduler in `pool.rs`, one tick (`process_once`) at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::warn;
use uuid::Uuid;

use job_core::{ErrorCategory, HealthRegistry, Job, JobState, JobStore, RetryDecision, RetryPolicyEngine, StoreError};

use crate::audio_store::AudioBlobStore;
use crate::clients::{AgentClient, TranscriptionClient};
use crate::mime;

#[derive(Debug)]
pub struct WorkerTickError(pub String);

impl std::fmt::Display for WorkerTickError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for WorkerTickError {}

/// A drain loop over one queue (§3: Worker). `process_once` is called once
/// per dispatch tick by the pool scheduler; it never blocks waiting for
/// work — an empty queue returns `Ok(false)` immediately.
#[async_trait]
pub trait ManagedWorker: Send + Sync {
    fn worker_id(&self) -> &str;
    fn queue_name(&self) -> &str;

    async fn process_once(&self) -> Result<bool, WorkerTickError>;
}

/// Shared outcome handling for both worker variants (§4.E "Common failure
/// handling"): on success, cas-update to completed; on failure, consult the
/// retry policy engine and either requeue with a delay or fail terminally.
/// A CAS mismatch (typically a concurrent cancellation) is logged and
/// treated as a no-op.
async fn finish_attempt(
    store: &dyn JobStore,
    retry_policy: &RetryPolicyEngine,
    health_registry: &HealthRegistry,
    worker_id: &str,
    job: &Job,
    result: Result<Map<String, Value>, (ErrorCategory, String)>,
) {
    match result {
        Ok(output) => {
            let cas = store
                .cas_update(
                    &job.id,
                    JobState::Processing,
                    Box::new(move |j| j.mark_completed(output)),
                )
                .await;
            match cas {
                Ok(_) => health_registry.record_job(worker_id, true),
                Err(StoreError::CasMismatch(_)) => {
                    warn!(job_id = %job.id, "cas mismatch completing job; a concurrent transition won the race");
                }
                Err(e) => warn!(job_id = %job.id, error = %e, "failed to persist completed job"),
            }
        }
        Err((category, message)) => {
            let decision = retry_policy.decide(category, job.attempt_count, job.max_attempts, &message);
            match decision {
                RetryDecision::Retry { delay, category } => {
                    let due_at = Utc::now()
                        + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                    let category_str = category.as_str();
                    let cas = store
                        .cas_update(
                            &job.id,
                            JobState::Processing,
                            Box::new(move |j| j.mark_requeued_with_delay(due_at, category_str)),
                        )
                        .await;
                    match cas {
                        Ok(requeued) => {
                            if let Err(e) = store.enqueue_delayed(requeued).await {
                                warn!(job_id = %job.id, error = %e, "failed to park job in the delayed index");
                            }
                            health_registry.record_job(worker_id, false);
                        }
                        Err(StoreError::CasMismatch(_)) => {
                            warn!(job_id = %job.id, "cas mismatch requeuing job; a concurrent transition won the race");
                        }
                        Err(e) => warn!(job_id = %job.id, error = %e, "failed to persist retry re-entry"),
                    }
                }
                RetryDecision::Fail { reason, category } => {
                    let category_str = category.as_str();
                    let cas = store
                        .cas_update(
                            &job.id,
                            JobState::Processing,
                            Box::new(move |j| j.mark_failed(reason, category_str)),
                        )
                        .await;
                    match cas {
                        Ok(_) => health_registry.record_job(worker_id, false),
                        Err(StoreError::CasMismatch(_)) => {
                            warn!(job_id = %job.id, "cas mismatch failing job; a concurrent transition won the race");
                        }
                        Err(e) => warn!(job_id = %job.id, error = %e, "failed to persist terminal failure"),
                    }
                }
            }
        }
    }
}

/// Processes `text_to_soap` (and, per DESIGN.md, `cache_warming`) jobs by
/// calling the agent upstream directly on the raw submitted text.
pub struct TextWorker {
    worker_id: String,
    queue_name: String,
    store: Arc<dyn JobStore>,
    retry_policy: RetryPolicyEngine,
    health_registry: Arc<HealthRegistry>,
    agent: AgentClient,
    upstream_timeout: Duration,
}

impl TextWorker {
    pub fn new(
        worker_id: impl Into<String>,
        queue_name: impl Into<String>,
        store: Arc<dyn JobStore>,
        retry_policy: RetryPolicyEngine,
        health_registry: Arc<HealthRegistry>,
        agent: AgentClient,
        upstream_timeout: Duration,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            queue_name: queue_name.into(),
            store,
            retry_policy,
            health_registry,
            agent,
            upstream_timeout,
        }
    }
}

#[async_trait]
impl ManagedWorker for TextWorker {
    fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn queue_name(&self) -> &str {
        &self.queue_name
    }

    async fn process_once(&self) -> Result<bool, WorkerTickError> {
        self.health_registry.heartbeat(&self.worker_id);

        let job = self
            .store
            .pop_next(&self.queue_name)
            .await
            .map_err(|e| WorkerTickError(e.to_string()))?;
        let Some(job) = job else {
            return Ok(false);
        };

        let started = Instant::now();
        let text_raw = job
            .input
            .get("textRaw")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        if text_raw.trim().is_empty() {
            finish_attempt(
                self.store.as_ref(),
                &self.retry_policy,
                &self.health_registry,
                &self.worker_id,
                &job,
                Err((ErrorCategory::InvalidInput, "textRaw must not be empty".to_string())),
            )
            .await;
            return Ok(true);
        }

        let outcome = tokio::time::timeout(self.upstream_timeout, self.agent.format_note(&text_raw)).await;

        let result = match outcome {
            Ok(Ok(structured_text)) => {
                let processing_ms = started.elapsed().as_millis() as i64;
                let mut output = Map::new();
                output.insert(
                    "noteResponse".to_string(),
                    json!({
                        "id": Uuid::now_v7().to_string(),
                        "textRaw": text_raw,
                        "textStructured": structured_text,
                        "createdAt": Utc::now(),
                    }),
                );
                output.insert("inputText".to_string(), Value::String(text_raw.clone()));
                output.insert("processingTimeMs".to_string(), json!(processing_ms));
                output.insert("workerId".to_string(), Value::String(self.worker_id.clone()));
                Ok(output)
            }
            Ok(Err(e)) => Err((e.category, e.message)),
            Err(_) => Err((ErrorCategory::TransientNetwork, "agent request timed out".to_string())),
        };

        finish_attempt(
            self.store.as_ref(),
            &self.retry_policy,
            &self.health_registry,
            &self.worker_id,
            &job,
            result,
        )
        .await;
        Ok(true)
    }
}

/// Processes `audio_to_soap` and `transcription_only` jobs. The two job
/// types share identical input handling and the transcription call;
/// `structure_after_transcription` decides whether the agent upstream is
/// also invoked (per the Open Question in DESIGN.md, `transcription_only`
/// stops after transcription and keeps the transcript as its final output).
pub struct AudioWorker {
    worker_id: String,
    queue_name: String,
    store: Arc<dyn JobStore>,
    retry_policy: RetryPolicyEngine,
    health_registry: Arc<HealthRegistry>,
    transcription: TranscriptionClient,
    agent: AgentClient,
    audio_store: Arc<dyn AudioBlobStore>,
    upstream_timeout: Duration,
    min_audio_bytes: usize,
    max_audio_bytes: usize,
    structure_after_transcription: bool,
}

#[allow(clippy::too_many_arguments)]
impl AudioWorker {
    pub fn new(
        worker_id: impl Into<String>,
        queue_name: impl Into<String>,
        store: Arc<dyn JobStore>,
        retry_policy: RetryPolicyEngine,
        health_registry: Arc<HealthRegistry>,
        transcription: TranscriptionClient,
        agent: AgentClient,
        audio_store: Arc<dyn AudioBlobStore>,
        upstream_timeout: Duration,
        min_audio_bytes: usize,
        max_audio_bytes: usize,
        structure_after_transcription: bool,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            queue_name: queue_name.into(),
            store,
            retry_policy,
            health_registry,
            transcription,
            agent,
            audio_store,
            upstream_timeout,
            min_audio_bytes,
            max_audio_bytes,
            structure_after_transcription,
        }
    }

    async fn fail_fast(&self, job: &Job, category: ErrorCategory, message: impl Into<String>) {
        finish_attempt(
            self.store.as_ref(),
            &self.retry_policy,
            &self.health_registry,
            &self.worker_id,
            job,
            Err((category, message.into())),
        )
        .await;
    }
}

#[async_trait]
impl ManagedWorker for AudioWorker {
    fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn queue_name(&self) -> &str {
        &self.queue_name
    }

    async fn process_once(&self) -> Result<bool, WorkerTickError> {
        self.health_registry.heartbeat(&self.worker_id);

        let job = self
            .store
            .pop_next(&self.queue_name)
            .await
            .map_err(|e| WorkerTickError(e.to_string()))?;
        let Some(job) = job else {
            return Ok(false);
        };

        let started = Instant::now();
        let blob_ref = job
            .input
            .get("audioBlobRef")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let original_filename = job
            .input
            .get("originalFilename")
            .and_then(Value::as_str)
            .unwrap_or("audio")
            .to_string();
        let content_type = job
            .input
            .get("contentType")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let size_bytes = job.input.get("sizeBytes").and_then(Value::as_u64).unwrap_or(0) as usize;

        if !mime::is_allowed_audio_type(&content_type) {
            self.fail_fast(
                &job,
                ErrorCategory::InvalidInput,
                format!("unsupported content type: {content_type}"),
            )
            .await;
            return Ok(true);
        }
        if size_bytes < self.min_audio_bytes || size_bytes > self.max_audio_bytes {
            self.fail_fast(
                &job,
                ErrorCategory::InvalidInput,
                format!(
                    "audio size {size_bytes} bytes outside allowed range [{}, {}]",
                    self.min_audio_bytes, self.max_audio_bytes
                ),
            )
            .await;
            return Ok(true);
        }

        let audio_bytes = match self.audio_store.fetch(&blob_ref).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.fail_fast(&job, ErrorCategory::Internal, e.to_string()).await;
                return Ok(true);
            }
        };

        let base_media_type = mime::parse_base_media_type(&content_type).unwrap_or_default();

        let transcription_started = Instant::now();
        let transcribe_outcome = tokio::time::timeout(
            self.upstream_timeout,
            self.transcription.transcribe(audio_bytes, &original_filename, &base_media_type),
        )
        .await;

        let (transcript, transcript_id) = match transcribe_outcome {
            Ok(Ok(t)) => t,
            Ok(Err(e)) => {
                finish_attempt(
                    self.store.as_ref(),
                    &self.retry_policy,
                    &self.health_registry,
                    &self.worker_id,
                    &job,
                    Err((e.category, e.message)),
                )
                .await;
                return Ok(true);
            }
            Err(_) => {
                self.fail_fast(
                    &job,
                    ErrorCategory::TransientNetwork,
                    "transcription request timed out",
                )
                .await;
                return Ok(true);
            }
        };
        let transcription_ms = transcription_started.elapsed().as_millis() as i64;
        let transcript_id = transcript_id.unwrap_or_else(|| Uuid::now_v7().to_string());

        if !self.structure_after_transcription {
            let mut output = Map::new();
            output.insert("transcript".to_string(), Value::String(transcript));
            output.insert("transcriptId".to_string(), Value::String(transcript_id));
            output.insert("transcriptionTimeMs".to_string(), json!(transcription_ms));
            output.insert(
                "processingTimeMs".to_string(),
                json!(started.elapsed().as_millis() as i64),
            );
            output.insert("workerId".to_string(), Value::String(self.worker_id.clone()));
            finish_attempt(
                self.store.as_ref(),
                &self.retry_policy,
                &self.health_registry,
                &self.worker_id,
                &job,
                Ok(output),
            )
            .await;
            return Ok(true);
        }

        let format_outcome = tokio::time::timeout(self.upstream_timeout, self.agent.format_note(&transcript)).await;

        let result = match format_outcome {
            Ok(Ok(structured_text)) => {
                let mut output = Map::new();
                output.insert(
                    "noteResponse".to_string(),
                    json!({
                        "id": Uuid::now_v7().to_string(),
                        "textRaw": transcript,
                        "textStructured": structured_text,
                        "createdAt": Utc::now(),
                    }),
                );
                output.insert("transcript".to_string(), Value::String(transcript.clone()));
                output.insert("transcriptId".to_string(), Value::String(transcript_id));
                output.insert("transcriptionTimeMs".to_string(), json!(transcription_ms));
                output.insert(
                    "processingTimeMs".to_string(),
                    json!(started.elapsed().as_millis() as i64),
                );
                output.insert("workerId".to_string(), Value::String(self.worker_id.clone()));
                Ok(output)
            }
            Ok(Err(e)) => Err((e.category, e.message)),
            Err(_) => Err((ErrorCategory::TransientNetwork, "agent request timed out".to_string())),
        };

        finish_attempt(
            self.store.as_ref(),
            &self.retry_policy,
            &self.health_registry,
            &self.worker_id,
            &job,
            result,
        )
        .await;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use job_core::{HealthRegistryConfig, InMemoryJobStore, JobType};
    use serde_json::Map as JsonMap;

    fn make_store() -> Arc<dyn JobStore> {
        Arc::new(InMemoryJobStore::new())
    }

    fn make_registry() -> Arc<HealthRegistry> {
        Arc::new(HealthRegistry::new(HealthRegistryConfig::default()))
    }

    #[tokio::test]
    async fn text_worker_fails_fast_on_empty_text_without_calling_upstream() {
        let store = make_store();
        let mut input = JsonMap::new();
        input.insert("textRaw".to_string(), Value::String("   ".to_string()));
        let job = Job::new(
            "j1".to_string(),
            "u1".to_string(),
            JobType::TextToSoap,
            input,
            None,
            None,
            None,
        );
        store.put_new(job).await.unwrap();

        let registry = make_registry();
        registry.register("w1", "text_processing");
        let worker = TextWorker::new(
            "w1",
            "text_processing",
            store.clone(),
            RetryPolicyEngine::default(),
            registry,
            AgentClient::new("http://localhost:1", Duration::from_millis(10)),
            Duration::from_millis(50),
        );

        let handled = worker.process_once().await.unwrap();
        assert!(handled);

        let job = store.get("j1").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempt_count, 0);
        assert_eq!(job.last_error_category.as_deref(), Some("invalid_input"));
    }

    #[tokio::test]
    async fn text_worker_returns_false_on_empty_queue() {
        let store = make_store();
        let registry = make_registry();
        registry.register("w1", "text_processing");
        let worker = TextWorker::new(
            "w1",
            "text_processing",
            store,
            RetryPolicyEngine::default(),
            registry,
            AgentClient::new("http://localhost:1", Duration::from_millis(10)),
            Duration::from_millis(50),
        );

        assert!(!worker.process_once().await.unwrap());
    }
}
