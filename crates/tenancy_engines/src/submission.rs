#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tenancy_kernel_contracts::submission::{SubmissionId, SubmissionSnapshot, SubmissionStatus};
use tenancy_kernel_contracts::ContractViolation;
use tracing::info;

use crate::clock::Clock;

/// Processing SLA of the production reference-check batch.
pub const PRODUCTION_SUBMISSION_WINDOW: Duration = Duration::from_secs(48 * 60 * 60);
/// Short window used when simulation mode is active.
pub const DEMO_SUBMISSION_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionTrackerConfig {
    pub completion_window: Duration,
}

impl SubmissionTrackerConfig {
    pub fn production_v1() -> Self {
        Self {
            completion_window: PRODUCTION_SUBMISSION_WINDOW,
        }
    }

    pub fn demo_v1() -> Self {
        Self {
            completion_window: DEMO_SUBMISSION_WINDOW,
        }
    }
}

/// Lifecycle of one reference-check submission.
///
/// Completion is time-gated: the tracker never schedules itself, it moves to
/// `Completed` only on the first [`SubmissionTracker::poll`] at or after the
/// deadline.
#[derive(Debug)]
pub struct SubmissionTracker {
    config: SubmissionTrackerConfig,
    clock: Arc<dyn Clock>,
    snapshot: Mutex<SubmissionSnapshot>,
}

impl SubmissionTracker {
    pub fn new(config: SubmissionTrackerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            snapshot: Mutex::new(SubmissionSnapshot::not_started_v1()),
        }
    }

    pub fn config(&self) -> SubmissionTrackerConfig {
        self.config
    }

    /// Starts (or restarts) tracking. Any previous completion is discarded.
    pub fn start(
        &self,
        submission_id: SubmissionId,
    ) -> Result<SubmissionSnapshot, ContractViolation> {
        let started_at = self.clock.now();
        let window_ms =
            u64::try_from(self.config.completion_window.as_millis()).unwrap_or(u64::MAX);
        let deadline = started_at.saturating_add_ms(window_ms);
        let next =
            SubmissionSnapshot::in_progress_v1(submission_id.clone(), started_at, deadline)?;
        *self.lock() = next.clone();
        info!(
            submission_id = %submission_id,
            deadline_ms = deadline.0,
            "reference-check submission started"
        );
        Ok(next)
    }

    pub fn poll(&self) -> SubmissionStatus {
        let now = self.clock.now();
        let mut snapshot = self.lock();
        if snapshot.status == SubmissionStatus::InProgress {
            if let Some(deadline) = snapshot.completion_deadline {
                if now >= deadline {
                    snapshot.status = SubmissionStatus::Completed;
                    snapshot.completed_at = Some(now);
                    info!(completed_at_ms = now.0, "reference-check submission completed");
                }
            }
        }
        snapshot.status
    }

    /// Current status without advancing it.
    pub fn status(&self) -> SubmissionStatus {
        self.lock().status
    }

    pub fn snapshot(&self) -> SubmissionSnapshot {
        self.lock().clone()
    }

    pub fn remaining_time(&self) -> Duration {
        let snapshot = self.lock();
        match (snapshot.status, snapshot.completion_deadline) {
            (SubmissionStatus::InProgress, Some(deadline)) => {
                Duration::from_millis(deadline.saturating_sub(self.clock.now()))
            }
            _ => Duration::ZERO,
        }
    }

    /// Whole seconds left, rounded up so a countdown never shows 0 early.
    pub fn remaining_secs(&self) -> u64 {
        let remaining = self.remaining_time();
        let secs = remaining.as_secs();
        if remaining.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    fn lock(&self) -> MutexGuard<'_, SubmissionSnapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
