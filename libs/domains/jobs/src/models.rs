//! Request/response DTOs for the job service façade (§4.G, §6).
//!
//! `CreateJobRequest` is internally tagged on `jobType` rather than
//! deriving `validator::Validate` — that derive only supports structs, and
//! the four job types need different field sets and different validation
//! rules per variant, so `validate` below is hand-written instead.

use chrono::{DateTime, Utc};
use job_core::{Job, JobType, SingleQueueStats};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use ts_rs::TS;
use utoipa::ToSchema;

use crate::error::JobResult;
use axum_helpers::AppError;

/// A job submission (§6). The `jobType` tag selects which upstream(s) the
/// job will need and what shape its `input` map takes once persisted.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, TS)]
#[serde(tag = "jobType", rename_all = "snake_case")]
#[ts(export)]
pub enum CreateJobRequest {
    #[serde(rename_all = "camelCase")]
    TextToSoap {
        text_raw: String,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        transcript_id: Option<String>,
        #[serde(default)]
        max_attempts: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    AudioToSoap {
        audio_blob_ref: String,
        original_filename: String,
        content_type: String,
        size_bytes: u64,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        max_attempts: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    TranscriptionOnly {
        audio_blob_ref: String,
        original_filename: String,
        content_type: String,
        size_bytes: u64,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        max_attempts: Option<u32>,
    },
    /// No dedicated input shape is specified by the source for
    /// cache-warming jobs (§9); DESIGN.md routes them through the same
    /// text-pool path as `text_to_soap` so a single worker implementation
    /// can serve both.
    #[serde(rename_all = "camelCase")]
    CacheWarming {
        text_raw: String,
        #[serde(default)]
        max_attempts: Option<u32>,
    },
}

/// Audio size/MIME bounds and the text-job length cap used by validation
/// (§6: `textRaw` 1..10000 chars; audio size and allowed content types,
/// the latter enforced via `soap_workers::mime`).
pub struct AudioLimits {
    pub min_bytes: u64,
    pub max_bytes: u64,
    pub max_text_chars: usize,
}

impl CreateJobRequest {
    pub fn job_type(&self) -> JobType {
        match self {
            Self::TextToSoap { .. } => JobType::TextToSoap,
            Self::AudioToSoap { .. } => JobType::AudioToSoap,
            Self::TranscriptionOnly { .. } => JobType::TranscriptionOnly,
            Self::CacheWarming { .. } => JobType::CacheWarming,
        }
    }

    pub fn needs_transcription(&self) -> bool {
        matches!(self, Self::AudioToSoap { .. } | Self::TranscriptionOnly { .. })
    }

    pub fn needs_agent(&self) -> bool {
        matches!(
            self,
            Self::TextToSoap { .. } | Self::AudioToSoap { .. } | Self::CacheWarming { .. }
        )
    }

    pub fn session_id(&self) -> Option<String> {
        match self {
            Self::TextToSoap { session_id, .. } => session_id.clone(),
            Self::AudioToSoap { session_id, .. } => session_id.clone(),
            Self::TranscriptionOnly { session_id, .. } => session_id.clone(),
            Self::CacheWarming { .. } => None,
        }
    }

    pub fn max_attempts(&self) -> Option<u32> {
        match self {
            Self::TextToSoap { max_attempts, .. }
            | Self::AudioToSoap { max_attempts, .. }
            | Self::TranscriptionOnly { max_attempts, .. }
            | Self::CacheWarming { max_attempts, .. } => *max_attempts,
        }
    }

    /// Field-level validation a `validator::Validate` derive can't express
    /// across an enum's variants (§3 edge cases: blank text, unsupported
    /// MIME type, zero-byte upload).
    pub fn validate(&self, audio_limits: &AudioLimits) -> JobResult<()> {
        match self {
            Self::TextToSoap { text_raw, .. } | Self::CacheWarming { text_raw, .. } => {
                if text_raw.trim().is_empty() {
                    return Err(AppError::Validation("textRaw must not be empty".to_string()));
                }
                if text_raw.chars().count() > audio_limits.max_text_chars {
                    return Err(AppError::Validation(format!(
                        "textRaw exceeds the maximum length of {} characters",
                        audio_limits.max_text_chars
                    )));
                }
            }
            Self::AudioToSoap {
                content_type,
                size_bytes,
                ..
            }
            | Self::TranscriptionOnly {
                content_type,
                size_bytes,
                ..
            } => {
                if !soap_workers::mime::is_allowed_audio_type(content_type) {
                    return Err(AppError::Validation(format!(
                        "unsupported content type: {content_type}"
                    )));
                }
                if *size_bytes < audio_limits.min_bytes || *size_bytes > audio_limits.max_bytes {
                    return Err(AppError::Validation(format!(
                        "sizeBytes {size_bytes} outside allowed range [{}, {}]",
                        audio_limits.min_bytes, audio_limits.max_bytes
                    )));
                }
            }
        }

        if let Some(max_attempts) = self.max_attempts() {
            if max_attempts == 0 {
                return Err(AppError::Validation("maxAttempts must be at least 1".to_string()));
            }
        }

        Ok(())
    }

    /// Build the opaque `input` map a worker will read back out (§6 field
    /// names, camelCase).
    pub fn into_input(self) -> Map<String, Value> {
        let mut map = Map::new();
        match self {
            Self::TextToSoap {
                text_raw,
                session_id,
                transcript_id,
                ..
            } => {
                map.insert("textRaw".to_string(), Value::String(text_raw));
                if let Some(s) = session_id {
                    map.insert("sessionId".to_string(), Value::String(s));
                }
                if let Some(t) = transcript_id {
                    map.insert("transcriptId".to_string(), Value::String(t));
                }
            }
            Self::AudioToSoap {
                audio_blob_ref,
                original_filename,
                content_type,
                size_bytes,
                session_id,
                ..
            }
            | Self::TranscriptionOnly {
                audio_blob_ref,
                original_filename,
                content_type,
                size_bytes,
                session_id,
                ..
            } => {
                map.insert("audioBlobRef".to_string(), Value::String(audio_blob_ref));
                map.insert("originalFilename".to_string(), Value::String(original_filename));
                map.insert("contentType".to_string(), Value::String(content_type));
                map.insert("sizeBytes".to_string(), json!(size_bytes));
                if let Some(s) = session_id {
                    map.insert("sessionId".to_string(), Value::String(s));
                }
            }
            Self::CacheWarming { text_raw, .. } => {
                map.insert("textRaw".to_string(), Value::String(text_raw));
            }
        }
        map
    }
}

/// Pagination for `GET /jobs` (§4.G: `list(userId, limit, offset)`).
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct JobListQuery {
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

/// Cap enforced regardless of what the caller asks for (§4.G).
pub const MAX_LIST_PAGE_SIZE: u32 = 100;

/// The client-facing view of a job (§6). `output`/`error` are opaque
/// pass-throughs of whatever the worker wrote.
#[derive(Debug, Clone, Serialize, ToSchema, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct JobStatusResponse {
    pub id: String,
    pub job_type: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    pub max_attempts: u32,
    #[ts(type = "Record<string, unknown> | null")]
    pub output: Option<Map<String, Value>>,
    pub error: Option<String>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type.as_str().to_string(),
            state: job.state.as_str().to_string(),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            attempt_count: job.attempt_count,
            max_attempts: job.max_attempts,
            output: job.output,
            error: job.error,
        }
    }
}

/// Operator view of a single ready queue (§4.A, §6:
/// `{queueName, size, oldestJobCreatedAt}`).
#[derive(Debug, Clone, Serialize, ToSchema, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct QueueStatsResponse {
    pub queue_name: String,
    pub size: u64,
    pub oldest_job_created_at: Option<DateTime<Utc>>,
}

impl From<SingleQueueStats> for QueueStatsResponse {
    fn from(stats: SingleQueueStats) -> Self {
        Self {
            queue_name: stats.queue_name,
            size: stats.size,
            oldest_job_created_at: stats.oldest_job_created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> AudioLimits {
        AudioLimits {
            min_bytes: 1,
            max_bytes: 50 * 1024 * 1024,
            max_text_chars: 10_000,
        }
    }

    #[test]
    fn text_exceeding_max_length_fails_validation() {
        let req = CreateJobRequest::TextToSoap {
            text_raw: "x".repeat(10_001),
            session_id: None,
            transcript_id: None,
            max_attempts: None,
        };
        assert!(req.validate(&limits()).is_err());
    }

    #[test]
    fn blank_text_fails_validation() {
        let req = CreateJobRequest::TextToSoap {
            text_raw: "   ".to_string(),
            session_id: None,
            transcript_id: None,
            max_attempts: None,
        };
        assert!(req.validate(&limits()).is_err());
    }

    #[test]
    fn unsupported_audio_mime_fails_validation() {
        let req = CreateJobRequest::AudioToSoap {
            audio_blob_ref: "blob-1".to_string(),
            original_filename: "note.txt".to_string(),
            content_type: "text/plain".to_string(),
            size_bytes: 1024,
            session_id: None,
            max_attempts: None,
        };
        assert!(req.validate(&limits()).is_err());
    }

    #[test]
    fn valid_audio_request_passes_and_reports_correct_needs() {
        let req = CreateJobRequest::AudioToSoap {
            audio_blob_ref: "blob-1".to_string(),
            original_filename: "note.wav".to_string(),
            content_type: "audio/wav".to_string(),
            size_bytes: 1024,
            session_id: Some("session-1".to_string()),
            max_attempts: None,
        };
        assert!(req.validate(&limits()).is_ok());
        assert!(req.needs_transcription());
        assert!(req.needs_agent());
        assert_eq!(req.job_type(), JobType::AudioToSoap);
    }

    #[test]
    fn transcription_only_does_not_need_agent() {
        let req = CreateJobRequest::TranscriptionOnly {
            audio_blob_ref: "blob-1".to_string(),
            original_filename: "note.wav".to_string(),
            content_type: "audio/wav".to_string(),
            size_bytes: 1024,
            session_id: None,
            max_attempts: None,
        };
        assert!(req.needs_transcription());
        assert!(!req.needs_agent());
    }

    #[test]
    fn into_input_carries_camel_case_field_names() {
        let req = CreateJobRequest::TextToSoap {
            text_raw: "patient reports improvement".to_string(),
            session_id: Some("s1".to_string()),
            transcript_id: None,
            max_attempts: None,
        };
        let input = req.into_input();
        assert_eq!(input.get("textRaw").unwrap().as_str().unwrap(), "patient reports improvement");
        assert_eq!(input.get("sessionId").unwrap().as_str().unwrap(), "s1");
    }
}
