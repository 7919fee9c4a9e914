//! The `Job` entity and its lifecycle state machine (§3).
//!
//! Input/output payloads are stored as opaque, schema-driven JSON objects
//! (`serde_json::Map`). The job record never carries implementation-defined
//! type tags — this is a deliberate security requirement (§9: a historical
//! bug in the source system admitted polymorphic deserialization).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Job classification; determines which queue a job is enqueued onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    TextToSoap,
    AudioToSoap,
    TranscriptionOnly,
    CacheWarming,
}

impl JobType {
    /// Default queue name for this job type (overridable via configuration).
    pub fn default_queue_name(&self) -> &'static str {
        match self {
            Self::TextToSoap => "text_processing",
            Self::AudioToSoap => "audio_processing",
            Self::TranscriptionOnly => "transcription_only",
            // No dedicated queue is specified by the source; §9 leaves the
            // pool assignment to the implementer. We route cache_warming
            // jobs onto the text worker pool's queue — see DESIGN.md.
            Self::CacheWarming => "text_processing",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextToSoap => "text_to_soap",
            Self::AudioToSoap => "audio_to_soap",
            Self::TranscriptionOnly => "transcription_only",
            Self::CacheWarming => "cache_warming",
        }
    }
}

/// Job lifecycle state (§3). Terminal states are `Completed`, `Failed`,
/// `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// I1: state transitions only move forward along queued → processing →
    /// {completed, failed, cancelled}, except a failed attempt may return a
    /// job to `queued` (a new logical attempt, not a resurrection) as long
    /// as it isn't already terminal.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (*self, next) {
            (Queued, Processing) => true,
            (Queued, Cancelled) => true,
            (Processing, Completed) => true,
            (Processing, Failed) => true,
            (Processing, Queued) => true, // retry re-entry
            _ => false,
        }
    }
}

/// The central job record (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub user_id: String,
    pub job_type: JobType,
    pub queue_name: String,
    pub state: JobState,

    pub input: Map<String, Value>,
    pub output: Option<Map<String, Value>>,
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub attempt_count: u32,
    pub max_attempts: u32,

    pub session_id: Option<String>,
    pub transcript_id: Option<String>,

    pub next_eligible_at: DateTime<Utc>,
    pub last_error_category: Option<String>,
}

/// Default per-job retry ceiling (overridable per request, per §3).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

impl Job {
    pub fn new(
        id: String,
        user_id: String,
        job_type: JobType,
        input: Map<String, Value>,
        session_id: Option<String>,
        transcript_id: Option<String>,
        max_attempts: Option<u32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            queue_name: job_type.default_queue_name().to_string(),
            job_type,
            state: JobState::Queued,
            input,
            output: None,
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            attempt_count: 0,
            max_attempts: max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            session_id,
            transcript_id,
            next_eligible_at: now,
            last_error_category: None,
        }
    }

    /// I3 + lifecycle: dequeue stamps started_at and moves queued→processing.
    pub fn mark_processing(&mut self) {
        debug_assert!(self.state.can_transition_to(JobState::Processing));
        self.state = JobState::Processing;
        self.started_at = Some(Utc::now());
    }

    /// I4: completed_at is monotone w.r.t. started_at.
    pub fn mark_completed(&mut self, output: Map<String, Value>) {
        debug_assert!(self.state.can_transition_to(JobState::Completed));
        self.state = JobState::Completed;
        self.output = Some(output);
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String, category: &str) {
        debug_assert!(self.state.can_transition_to(JobState::Failed));
        self.state = JobState::Failed;
        self.error = Some(error);
        self.last_error_category = Some(category.to_string());
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_cancelled(&mut self) {
        debug_assert!(self.state.can_transition_to(JobState::Cancelled));
        self.state = JobState::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// Requeue after a retryable failure: I4 (attempt_count never
    /// decreases), re-enters at the queue tail via `enqueue_delayed`.
    pub fn mark_requeued_with_delay(&mut self, due_at: DateTime<Utc>, category: &str) {
        debug_assert!(self.state.can_transition_to(JobState::Queued));
        self.state = JobState::Queued;
        self.attempt_count += 1;
        self.next_eligible_at = due_at;
        self.last_error_category = Some(category.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_name_defaults_match_job_type() {
        assert_eq!(JobType::TextToSoap.default_queue_name(), "text_processing");
        assert_eq!(JobType::AudioToSoap.default_queue_name(), "audio_processing");
        assert_eq!(
            JobType::TranscriptionOnly.default_queue_name(),
            "transcription_only"
        );
    }

    #[test]
    fn terminal_states_cannot_transition_further() {
        assert!(!JobState::Completed.can_transition_to(JobState::Processing));
        assert!(!JobState::Failed.can_transition_to(JobState::Queued));
        assert!(!JobState::Cancelled.can_transition_to(JobState::Processing));
    }

    #[test]
    fn retry_reentry_is_allowed_from_processing() {
        assert!(JobState::Processing.can_transition_to(JobState::Queued));
    }

    #[test]
    fn mark_completed_sets_monotone_timestamps() {
        let mut job = Job::new(
            "job-1".into(),
            "user-1".into(),
            JobType::TextToSoap,
            Map::new(),
            None,
            None,
            None,
        );
        job.mark_processing();
        let started = job.started_at.unwrap();
        job.mark_completed(Map::new());
        assert!(job.completed_at.unwrap() >= started);
        assert_eq!(job.state, JobState::Completed);
    }

    #[test]
    fn requeue_increments_attempt_count_and_never_decreases() {
        let mut job = Job::new(
            "job-1".into(),
            "user-1".into(),
            JobType::TextToSoap,
            Map::new(),
            None,
            None,
            None,
        );
        job.mark_processing();
        job.mark_requeued_with_delay(Utc::now(), "transient_network");
        assert_eq!(job.attempt_count, 1);
        assert_eq!(job.state, JobState::Queued);
    }
}
