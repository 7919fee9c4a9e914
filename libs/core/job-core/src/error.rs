//! Error classification and retry policy.
//!
//! This module implements the retry policy engine (§4.B): given a failed
//! job and an error category, decide whether to retry (with a computed
//! delay) or fail terminally. The engine is pure aside from the jitter
//! draw — same inputs plus the same random sample always produce the same
//! decision.

use rand::Rng;
use std::time::Duration;

/// Stable error categories recognized by the retry policy engine.
///
/// These are the labels stored on a job's `last_error_category` and used
/// for monitoring and category-specific backoff tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection refused, or a timeout below the "give up" threshold.
    TransientNetwork,
    /// Upstream responded with a 5xx status.
    Upstream5xx,
    /// Upstream responded with a 4xx status other than 408/429.
    Upstream4xx,
    /// Upstream responded 429, or otherwise signalled rate limiting.
    RateLimited,
    /// The job's own input failed validation; retrying cannot help.
    InvalidInput,
    /// A resource ceiling was hit (e.g. concurrency, memory); retryable
    /// with a longer backoff than transient network errors.
    ResourceExhausted,
    /// Unclassified failure internal to the worker.
    Internal,
}

impl ErrorCategory {
    /// The non-retryable set: `upstream_4xx` (barring 408/429, which are
    /// reclassified as `rate_limited`/`transient_network` before reaching
    /// here) and `invalid_input`.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Upstream4xx | Self::InvalidInput)
    }

    /// Stable snake_case label used in logs, metrics, and the job record.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientNetwork => "transient_network",
            Self::Upstream5xx => "upstream_5xx",
            Self::Upstream4xx => "upstream_4xx",
            Self::RateLimited => "rate_limited",
            Self::InvalidInput => "invalid_input",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Internal => "internal",
        }
    }

    /// Classify an upstream HTTP response into an error category.
    ///
    /// `status` is the upstream's HTTP status code, if the failure came
    /// from a response rather than a connection-level error.
    pub fn from_upstream_status(status: Option<u16>) -> Self {
        match status {
            Some(429) => Self::RateLimited,
            Some(408) => Self::TransientNetwork,
            Some(s) if (500..600).contains(&s) => Self::Upstream5xx,
            Some(s) if (400..500).contains(&s) => Self::Upstream4xx,
            _ => Self::TransientNetwork,
        }
    }

    /// Category-dependent backoff base, multiplier, and ceiling.
    /// `rate_limited` and `resource_exhausted` back off more aggressively
    /// than plain transient failures.
    fn backoff_params(&self, policy: &RetryPolicyConfig) -> (u64, f64, u64) {
        match self {
            Self::RateLimited => (
                policy.rate_limited_base_ms,
                policy.multiplier,
                policy.rate_limited_ceiling_ms,
            ),
            Self::ResourceExhausted => (
                policy.resource_exhausted_base_ms,
                policy.multiplier,
                policy.ceiling_ms,
            ),
            _ => (policy.base_ms, policy.multiplier, policy.ceiling_ms),
        }
    }
}

/// Tunable parameters for the retry policy engine, sourced from
/// configuration (§6: retry base-ms, multiplier, ceiling-ms,
/// jitter-fraction, per-category overrides).
#[derive(Debug, Clone)]
pub struct RetryPolicyConfig {
    pub base_ms: u64,
    pub multiplier: f64,
    pub ceiling_ms: u64,
    pub jitter_fraction: f64,
    pub rate_limited_base_ms: u64,
    pub rate_limited_ceiling_ms: u64,
    pub resource_exhausted_base_ms: u64,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            base_ms: 100,
            multiplier: 2.0,
            ceiling_ms: 30_000,
            jitter_fraction: 0.25,
            rate_limited_base_ms: 1_000,
            rate_limited_ceiling_ms: 120_000,
            resource_exhausted_base_ms: 2_000,
        }
    }
}

/// Outcome of a retry policy decision.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Reschedule the job after `delay`, incrementing attempt_count.
    Retry {
        delay: Duration,
        category: ErrorCategory,
    },
    /// Mark the job terminally failed with a sanitized message.
    Fail {
        reason: String,
        category: ErrorCategory,
    },
}

/// Pure decision engine implementing §4.B's policy.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicyEngine {
    config: RetryPolicyConfig,
}

impl RetryPolicyEngine {
    pub fn new(config: RetryPolicyConfig) -> Self {
        Self { config }
    }

    /// Decide whether a job should be retried or terminally failed.
    ///
    /// `attempt_count` is the number of attempts already made (0-indexed);
    /// `max_attempts` is the job's configured ceiling.
    pub fn decide(
        &self,
        category: ErrorCategory,
        attempt_count: u32,
        max_attempts: u32,
        error_message: &str,
    ) -> RetryDecision {
        let sanitized = sanitize_error_message(error_message);

        if !category.is_retryable() {
            return RetryDecision::Fail {
                reason: sanitized,
                category,
            };
        }

        if attempt_count + 1 >= max_attempts {
            return RetryDecision::Fail {
                reason: format!("max retries exceeded: {sanitized}"),
                category,
            };
        }

        RetryDecision::Retry {
            delay: self.compute_delay(category, attempt_count),
            category,
        }
    }

    fn compute_delay(&self, category: ErrorCategory, attempt_count: u32) -> Duration {
        let (base_ms, multiplier, ceiling_ms) = category.backoff_params(&self.config);

        let exp = multiplier.powi(attempt_count as i32);
        let raw_ms = (base_ms as f64 * exp).min(ceiling_ms as f64);

        let jitter_span = raw_ms * self.config.jitter_fraction;
        let jittered_ms = if jitter_span > 0.0 {
            rand::rng().random_range((raw_ms - jitter_span).max(0.0)..=(raw_ms + jitter_span))
        } else {
            raw_ms
        };

        Duration::from_millis(jittered_ms.max(0.0) as u64)
    }
}

/// Strips control characters and truncates to a safe length before a
/// user-supplied or upstream-supplied string is persisted or logged.
///
/// Per §7: log lines and stored error strings must never carry raw stack
/// traces, internal identifiers, or unprintable bytes.
pub fn sanitize_error_message(message: &str) -> String {
    const MAX_LEN: usize = 500;
    let cleaned: String = message
        .chars()
        .filter(|c| !c.is_control() || *c == ' ')
        .collect();
    if cleaned.chars().count() > MAX_LEN {
        cleaned.chars().take(MAX_LEN).collect::<String>() + "…"
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_retryable_categories_fail_immediately() {
        let engine = RetryPolicyEngine::default();
        let decision = engine.decide(ErrorCategory::InvalidInput, 0, 3, "blank text");
        assert!(matches!(decision, RetryDecision::Fail { .. }));

        let decision = engine.decide(ErrorCategory::Upstream4xx, 0, 3, "bad request");
        assert!(matches!(decision, RetryDecision::Fail { .. }));
    }

    #[test]
    fn exhausting_max_attempts_fails_with_message() {
        let engine = RetryPolicyEngine::default();
        let decision = engine.decide(ErrorCategory::Upstream5xx, 2, 3, "still failing");
        match decision {
            RetryDecision::Fail { reason, category } => {
                assert_eq!(category, ErrorCategory::Upstream5xx);
                assert!(reason.starts_with("max retries exceeded"));
            }
            _ => panic!("expected terminal failure"),
        }
    }

    #[test]
    fn retryable_category_schedules_a_delay() {
        let engine = RetryPolicyEngine::default();
        let decision = engine.decide(ErrorCategory::TransientNetwork, 0, 3, "connection refused");
        match decision {
            RetryDecision::Retry { delay, category } => {
                assert_eq!(category, ErrorCategory::TransientNetwork);
                assert!(delay.as_millis() > 0);
            }
            _ => panic!("expected a retry"),
        }
    }

    #[test]
    fn rate_limited_uses_a_larger_base_than_transient() {
        let config = RetryPolicyConfig {
            jitter_fraction: 0.0,
            ..Default::default()
        };
        let engine = RetryPolicyEngine::new(config);

        let transient = engine.decide(ErrorCategory::TransientNetwork, 0, 5, "x");
        let rate_limited = engine.decide(ErrorCategory::RateLimited, 0, 5, "x");

        let (Some(t), Some(r)) = (as_delay(&transient), as_delay(&rate_limited)) else {
            panic!("expected retries");
        };
        assert!(r > t);
    }

    fn as_delay(decision: &RetryDecision) -> Option<Duration> {
        match decision {
            RetryDecision::Retry { delay, .. } => Some(*delay),
            RetryDecision::Fail { .. } => None,
        }
    }

    #[test]
    fn sanitizes_control_characters_and_truncates() {
        let dirty = format!("bad\x07input{}", "x".repeat(600));
        let clean = sanitize_error_message(&dirty);
        assert!(!clean.contains('\u{7}'));
        assert!(clean.chars().count() <= 501);
    }

    #[test]
    fn from_upstream_status_classifies_correctly() {
        assert_eq!(
            ErrorCategory::from_upstream_status(Some(429)),
            ErrorCategory::RateLimited
        );
        assert_eq!(
            ErrorCategory::from_upstream_status(Some(408)),
            ErrorCategory::TransientNetwork
        );
        assert_eq!(
            ErrorCategory::from_upstream_status(Some(503)),
            ErrorCategory::Upstream5xx
        );
        assert_eq!(
            ErrorCategory::from_upstream_status(Some(400)),
            ErrorCategory::Upstream4xx
        );
        assert_eq!(
            ErrorCategory::from_upstream_status(None),
            ErrorCategory::TransientNetwork
        );
    }
}
