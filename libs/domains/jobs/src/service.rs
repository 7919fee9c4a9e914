//! The Job Service façade (§4.G): the single entry point client-facing
//! handlers call into. Every operation here either returns a client-facing
//! DTO or an `AppError` from the stable taxonomy (§7) — nothing downstream
//! (store errors, health monitor state) leaks through unmapped.

use std::sync::Arc;

use job_core::{AdmissionDecision, Job, JobState, JobStore, StoreError, SystemHealthMonitor};
use tracing::instrument;
use uuid::Uuid;

use axum_helpers::AppError;

use crate::error::{store_error, JobResult};
use crate::models::{
    AudioLimits, CreateJobRequest, JobStatusResponse, QueueStatsResponse, MAX_LIST_PAGE_SIZE,
};

pub struct JobService {
    store: Arc<dyn JobStore>,
    health_monitor: Arc<SystemHealthMonitor>,
    audio_limits: AudioLimits,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        health_monitor: Arc<SystemHealthMonitor>,
        audio_limits: AudioLimits,
    ) -> Self {
        Self {
            store,
            health_monitor,
            audio_limits,
        }
    }

    /// Validate, check admission against the current degradation state, and
    /// persist a new job (§4.D, §4.G).
    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn create(&self, user_id: &str, request: CreateJobRequest) -> JobResult<JobStatusResponse> {
        request.validate(&self.audio_limits)?;

        match self
            .health_monitor
            .admission_for(request.needs_transcription(), request.needs_agent())
        {
            AdmissionDecision::Accept => {}
            AdmissionDecision::Refuse {
                reason,
                retry_after_secs,
            } => return Err(AppError::AdmissionRefused { reason, retry_after_secs }),
        }

        let job_type = request.job_type();
        let session_id = request.session_id();
        let max_attempts = request.max_attempts();
        let input = request.into_input();

        let job = Job::new(
            Uuid::now_v7().to_string(),
            user_id.to_string(),
            job_type,
            input,
            session_id,
            None,
            max_attempts,
        );
        let response = JobStatusResponse::from(job.clone());

        self.store.put_new(job).await.map_err(store_error)?;
        Ok(response)
    }

    /// I2: ownership is enforced by treating "exists but not owned" the
    /// same as "doesn't exist" — both return `NotFound`.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn status(&self, job_id: &str, user_id: &str) -> JobResult<JobStatusResponse> {
        let job = self.store.get(job_id).await.map_err(store_error)?.ok_or(AppError::NotFound)?;
        if job.user_id != user_id {
            return Err(AppError::NotFound);
        }
        Ok(job.into())
    }

    pub async fn list(&self, user_id: &str, limit: Option<u32>, offset: Option<u32>) -> JobResult<Vec<JobStatusResponse>> {
        let mut jobs = self.store.list_by_user(user_id).await.map_err(store_error)?;
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let limit = limit.unwrap_or(MAX_LIST_PAGE_SIZE).min(MAX_LIST_PAGE_SIZE) as usize;
        let offset = offset.unwrap_or(0) as usize;

        Ok(jobs
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(JobStatusResponse::from)
            .collect())
    }

    /// Only a still-queued job can be cancelled (§3 edge cases): a job
    /// already in flight or terminal returns `Ok(false)` rather than an
    /// error — cancellation losing a race with a worker is an expected
    /// outcome, not a failure.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn cancel(&self, job_id: &str, user_id: &str) -> JobResult<bool> {
        let job = self.store.get(job_id).await.map_err(store_error)?.ok_or(AppError::NotFound)?;
        if job.user_id != user_id {
            return Err(AppError::NotFound);
        }
        if job.state != JobState::Queued {
            return Ok(false);
        }

        match self
            .store
            .cas_update(job_id, JobState::Queued, Box::new(|j| j.mark_cancelled()))
            .await
        {
            Ok(_) => Ok(true),
            Err(StoreError::CasMismatch(_)) => Ok(false),
            Err(e) => Err(store_error(e)),
        }
    }

    pub async fn queue_stats(&self, queue_name: &str) -> JobResult<QueueStatsResponse> {
        let stats = self.store.queue_stats(queue_name).await.map_err(store_error)?;
        Ok(stats.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use job_core::{DegradationThresholds, InMemoryJobStore};

    fn service() -> JobService {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let monitor = Arc::new(SystemHealthMonitor::new(DegradationThresholds::default()));
        JobService::new(
            store,
            monitor,
            AudioLimits {
                min_bytes: 1,
                max_bytes: 50 * 1024 * 1024,
                max_text_chars: 10_000,
            },
        )
    }

    fn text_request(text: &str) -> CreateJobRequest {
        CreateJobRequest::TextToSoap {
            text_raw: text.to_string(),
            session_id: None,
            transcript_id: None,
            max_attempts: None,
        }
    }

    #[tokio::test]
    async fn create_then_status_round_trips() {
        let svc = service();
        let created = svc.create("user-1", text_request("patient note")).await.unwrap();
        assert_eq!(created.state, "queued");

        let fetched = svc.status(&created.id, "user-1").await.unwrap();
        assert_eq!(fetched.id, created.id);
    }

    #[tokio::test]
    async fn status_for_another_users_job_is_not_found() {
        let svc = service();
        let created = svc.create("user-1", text_request("note")).await.unwrap();

        let result = svc.status(&created.id, "user-2").await;
        assert!(matches!(result, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn blank_text_is_rejected_before_admission_check() {
        let svc = service();
        let result = svc.create("user-1", text_request("   ")).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn cancel_queued_job_succeeds_once() {
        let svc = service();
        let created = svc.create("user-1", text_request("note")).await.unwrap();

        assert!(svc.cancel(&created.id, "user-1").await.unwrap());
        // Already cancelled (terminal), so a second cancel is a no-op false.
        assert!(!svc.cancel(&created.id, "user-1").await.unwrap());
    }

    #[tokio::test]
    async fn list_caps_page_size_and_orders_newest_first() {
        let svc = service();
        for i in 0..3 {
            svc.create("user-1", text_request(&format!("note {i}"))).await.unwrap();
        }

        let jobs = svc.list("user-1", Some(2), None).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs[0].created_at >= jobs[1].created_at);
    }
}
