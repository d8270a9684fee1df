#![forbid(unsafe_code)]

//! Pure merge rules for the unified verification view. No I/O here; the
//! runtime in `reconciler` feeds these with whatever it fetched.

use tenancy_kernel_contracts::simulation::SimulationState;
use tenancy_kernel_contracts::submission::SubmissionSnapshot;
use tenancy_kernel_contracts::verification::{
    StateSource, UnifiedVerificationState, VerificationFlags, VerificationPatch,
    VerificationRecord, VerificationStatus,
};
use tenancy_kernel_contracts::UnixTimeMs;

/// Simulated completion is persisted only once every check is verified and
/// the reference-check submission has cleared its deadline.
pub fn should_sync(simulation: &SimulationState, submission: &SubmissionSnapshot) -> bool {
    simulation.all_verified() && submission.is_completed()
}

pub fn sync_patch(now: UnixTimeMs) -> VerificationPatch {
    VerificationPatch::full_completion(now)
}

pub fn remote_only(remote: Option<&VerificationRecord>) -> UnifiedVerificationState {
    match remote {
        Some(record) => UnifiedVerificationState::from_remote(record),
        None => UnifiedVerificationState::none(),
    }
}

pub fn merge_simulated(
    remote: &VerificationRecord,
    simulation: &SimulationState,
    submission: &SubmissionSnapshot,
) -> UnifiedVerificationState {
    // Remote flags are sticky: simulation can add a verification, never remove one.
    let flags = VerificationFlags::from_fn(|key| {
        simulation.status(key) == VerificationStatus::Verified || remote.flags.get(key)
    });

    // A verified remote row is terminal; only an administrative reset leaves it.
    let comprehensive_status = if remote.is_verified() || should_sync(simulation, submission) {
        VerificationStatus::Verified
    } else if simulation.any_in_progress() || submission.is_in_progress() {
        VerificationStatus::InProgress
    } else {
        remote.comprehensive_status
    };

    let completed_at = if submission.is_completed() && !remote.is_verified() {
        submission.completed_at
    } else {
        remote.completed_at
    };

    let completion_percentage = if comprehensive_status == VerificationStatus::Verified {
        100
    } else {
        remote.completion_percentage
    };

    UnifiedVerificationState {
        flags,
        comprehensive_status,
        completed_at,
        completion_percentage,
        source: StateSource::Simulation,
    }
}
