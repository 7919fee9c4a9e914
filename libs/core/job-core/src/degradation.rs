//! Degradation Controller (§4.D): aggregates a rolling window of upstream
//! probe outcomes into one of four system health levels, with hysteretic
//! transitions so a single flaky probe doesn't flap the level back and
//! forth — dropping to a worse level takes one bad window, recovering to a
//! better one takes two consecutive good windows.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    Normal,
    Minor,
    Major,
    Critical,
}

/// A single upstream probe's outcome, fed into the rolling window.
#[derive(Debug, Clone, Copy)]
pub struct ProbeOutcome {
    pub success: bool,
    pub latency_ms: u64,
}

#[derive(Debug, Clone)]
pub struct DegradationThresholds {
    pub window_size: usize,
    pub minor_error_rate: f64,
    pub major_error_rate: f64,
    pub critical_error_rate: f64,
    pub minor_latency_ms: u64,
    pub major_latency_ms: u64,
    pub critical_latency_ms: u64,
    /// Consecutive good windows required to move to a better level.
    pub recovery_windows: u32,
}

impl Default for DegradationThresholds {
    fn default() -> Self {
        Self {
            window_size: 20,
            minor_error_rate: 0.05,
            major_error_rate: 0.20,
            critical_error_rate: 0.50,
            minor_latency_ms: 2_000,
            major_latency_ms: 5_000,
            critical_latency_ms: 15_000,
            recovery_windows: 2,
        }
    }
}

pub struct DegradationController {
    window: RwLock<VecDeque<ProbeOutcome>>,
    thresholds: DegradationThresholds,
    current_level: RwLock<DegradationLevel>,
    good_window_streak: AtomicU32,
}

impl DegradationController {
    pub fn new(thresholds: DegradationThresholds) -> Self {
        Self {
            window: RwLock::new(VecDeque::with_capacity(thresholds.window_size)),
            thresholds,
            current_level: RwLock::new(DegradationLevel::Normal),
            good_window_streak: AtomicU32::new(0),
        }
    }

    pub fn current_level(&self) -> DegradationLevel {
        *self.current_level.read().unwrap()
    }

    /// Feed a probe result in and return the (possibly updated) aggregate
    /// level.
    pub fn record_probe(&self, outcome: ProbeOutcome) -> DegradationLevel {
        let candidate = {
            let mut window = self.window.write().unwrap();
            if window.len() == self.thresholds.window_size {
                window.pop_front();
            }
            window.push_back(outcome);
            self.classify(&window)
        };
        self.apply_hysteresis(candidate)
    }

    fn classify(&self, window: &VecDeque<ProbeOutcome>) -> DegradationLevel {
        if window.is_empty() {
            return DegradationLevel::Normal;
        }
        let n = window.len() as f64;
        let failures = window.iter().filter(|o| !o.success).count() as f64;
        let error_rate = failures / n;
        let avg_latency_ms =
            window.iter().map(|o| o.latency_ms).sum::<u64>() / window.len() as u64;

        let by_error_rate = if error_rate >= self.thresholds.critical_error_rate {
            DegradationLevel::Critical
        } else if error_rate >= self.thresholds.major_error_rate {
            DegradationLevel::Major
        } else if error_rate >= self.thresholds.minor_error_rate {
            DegradationLevel::Minor
        } else {
            DegradationLevel::Normal
        };

        let by_latency = if avg_latency_ms >= self.thresholds.critical_latency_ms {
            DegradationLevel::Critical
        } else if avg_latency_ms >= self.thresholds.major_latency_ms {
            DegradationLevel::Major
        } else if avg_latency_ms >= self.thresholds.minor_latency_ms {
            DegradationLevel::Minor
        } else {
            DegradationLevel::Normal
        };

        by_error_rate.max(by_latency)
    }

    fn apply_hysteresis(&self, candidate: DegradationLevel) -> DegradationLevel {
        let mut current = self.current_level.write().unwrap();

        if candidate > *current {
            *current = candidate;
            self.good_window_streak.store(0, Ordering::SeqCst);
        } else if candidate < *current {
            let streak = self.good_window_streak.fetch_add(1, Ordering::SeqCst) + 1;
            if streak >= self.thresholds.recovery_windows {
                *current = candidate;
                self.good_window_streak.store(0, Ordering::SeqCst);
            }
        } else {
            self.good_window_streak.store(0, Ordering::SeqCst);
        }

        *current
    }
}

/// Per-job-type admission decision produced by `SystemHealthMonitor` (§4.D's
/// admission policy table).
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionDecision {
    Accept,
    Refuse { reason: String, retry_after_secs: u64 },
}

/// Tracks three independent `DegradationController`s — one per monitored
/// target (the transcription upstream, the agent upstream, and the job
/// store) — and translates their individual levels into the admission
/// policy described in §4.D:
///
/// - job store critical, or both upstreams critical → reject everything.
/// - exactly one upstream critical → accept only job types that don't need
///   the down service.
/// - otherwise → accept (the aggregate level may still be minor/major for
///   monitoring purposes, but doesn't by itself block admission).
pub struct SystemHealthMonitor {
    pub transcription: DegradationController,
    pub agent: DegradationController,
    pub job_store: DegradationController,
}

impl SystemHealthMonitor {
    pub fn new(thresholds: DegradationThresholds) -> Self {
        Self {
            transcription: DegradationController::new(thresholds.clone()),
            agent: DegradationController::new(thresholds.clone()),
            job_store: DegradationController::new(thresholds),
        }
    }

    /// The worst-of-three aggregate level, reported on the health/ready
    /// surface and the `degradation_level` gauge.
    pub fn overall_level(&self) -> DegradationLevel {
        let store = self.job_store.current_level();
        if store >= DegradationLevel::Major {
            return DegradationLevel::Critical;
        }

        let transcription = self.transcription.current_level();
        let agent = self.agent.current_level();
        if transcription == DegradationLevel::Critical && agent == DegradationLevel::Critical {
            return DegradationLevel::Critical;
        }
        if transcription == DegradationLevel::Critical || agent == DegradationLevel::Critical {
            return DegradationLevel::Major;
        }
        transcription.max(agent).max(store)
    }

    /// Whether a job of the given type should be admitted right now.
    /// `needs_transcription`/`needs_agent` let callers describe their own
    /// job-type-to-service mapping instead of this crate hardcoding it.
    pub fn admission_for(
        &self,
        needs_transcription: bool,
        needs_agent: bool,
    ) -> AdmissionDecision {
        if self.job_store.current_level() == DegradationLevel::Critical {
            return AdmissionDecision::Refuse {
                reason: "job store is unavailable".to_string(),
                retry_after_secs: 30,
            };
        }

        let transcription_down = self.transcription.current_level() == DegradationLevel::Critical;
        let agent_down = self.agent.current_level() == DegradationLevel::Critical;

        if transcription_down && agent_down {
            return AdmissionDecision::Refuse {
                reason: "both upstream services are unavailable".to_string(),
                retry_after_secs: 30,
            };
        }
        if transcription_down && needs_transcription {
            return AdmissionDecision::Refuse {
                reason: "transcription service is unavailable".to_string(),
                retry_after_secs: 10,
            };
        }
        if agent_down && needs_agent {
            return AdmissionDecision::Refuse {
                reason: "agent service is unavailable".to_string(),
                retry_after_secs: 10,
            };
        }

        AdmissionDecision::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(latency_ms: u64) -> ProbeOutcome {
        ProbeOutcome {
            success: true,
            latency_ms,
        }
    }

    fn fail(latency_ms: u64) -> ProbeOutcome {
        ProbeOutcome {
            success: false,
            latency_ms,
        }
    }

    fn small_window() -> DegradationController {
        DegradationController::new(DegradationThresholds {
            window_size: 4,
            ..DegradationThresholds::default()
        })
    }

    #[test]
    fn starts_normal() {
        let c = small_window();
        assert_eq!(c.current_level(), DegradationLevel::Normal);
    }

    #[test]
    fn one_bad_window_degrades_immediately() {
        let c = small_window();
        for _ in 0..4 {
            c.record_probe(fail(100));
        }
        assert_eq!(c.current_level(), DegradationLevel::Critical);
    }

    #[test]
    fn recovery_requires_two_consecutive_good_windows() {
        let c = small_window();
        for _ in 0..4 {
            c.record_probe(fail(100));
        }
        assert_eq!(c.current_level(), DegradationLevel::Critical);

        // First good window: still degraded, streak = 1.
        for _ in 0..4 {
            c.record_probe(ok(100));
        }
        assert_eq!(c.current_level(), DegradationLevel::Critical);

        // Second consecutive good window: now recovers.
        for _ in 0..4 {
            c.record_probe(ok(100));
        }
        assert_eq!(c.current_level(), DegradationLevel::Normal);
    }

    #[test]
    fn a_worsening_window_between_good_ones_resets_the_streak() {
        let c = small_window();
        for _ in 0..4 {
            c.record_probe(fail(100));
        }
        for _ in 0..4 {
            c.record_probe(ok(100));
        }
        assert_eq!(c.current_level(), DegradationLevel::Critical);

        // A fresh bad window interrupts recovery.
        for _ in 0..4 {
            c.record_probe(fail(100));
        }
        for _ in 0..4 {
            c.record_probe(ok(100));
        }
        // Only one consecutive good window so far since the interruption.
        assert_eq!(c.current_level(), DegradationLevel::Critical);
    }

    #[test]
    fn latency_alone_can_drive_degradation() {
        let c = small_window();
        for _ in 0..4 {
            c.record_probe(ok(20_000));
        }
        assert_eq!(c.current_level(), DegradationLevel::Critical);
    }

    fn small_monitor() -> SystemHealthMonitor {
        SystemHealthMonitor::new(DegradationThresholds {
            window_size: 4,
            ..DegradationThresholds::default()
        })
    }

    #[test]
    fn healthy_monitor_accepts_everything() {
        let m = small_monitor();
        assert_eq!(m.admission_for(true, true), AdmissionDecision::Accept);
        assert_eq!(m.overall_level(), DegradationLevel::Normal);
    }

    #[test]
    fn one_upstream_down_only_refuses_jobs_that_need_it() {
        let m = small_monitor();
        for _ in 0..4 {
            m.transcription.record_probe(fail(100));
        }
        assert_eq!(m.transcription.current_level(), DegradationLevel::Critical);

        assert_eq!(m.overall_level(), DegradationLevel::Major);
        assert!(matches!(
            m.admission_for(true, false),
            AdmissionDecision::Refuse { .. }
        ));
        assert_eq!(m.admission_for(false, true), AdmissionDecision::Accept);
    }

    #[test]
    fn both_upstreams_down_refuses_everything() {
        let m = small_monitor();
        for _ in 0..4 {
            m.transcription.record_probe(fail(100));
            m.agent.record_probe(fail(100));
        }
        assert_eq!(m.overall_level(), DegradationLevel::Critical);
        assert!(matches!(
            m.admission_for(false, false),
            AdmissionDecision::Refuse { .. }
        ));
    }

    #[test]
    fn job_store_down_refuses_everything_regardless_of_upstreams() {
        let m = small_monitor();
        for _ in 0..4 {
            m.job_store.record_probe(fail(100));
        }
        assert_eq!(m.overall_level(), DegradationLevel::Critical);
        assert!(matches!(
            m.admission_for(false, false),
            AdmissionDecision::Refuse { .. }
        ));
    }
}
