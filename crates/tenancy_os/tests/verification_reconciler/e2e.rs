#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tenancy_engines::clock::ManualClock;
use tenancy_engines::simulation::SimulationStateFile;
use tenancy_kernel_contracts::identity::{AuthenticatedUser, UserId};
use tenancy_kernel_contracts::simulation::SimulationState;
use tenancy_kernel_contracts::submission::{SubmissionId, SubmissionStatus};
use tenancy_kernel_contracts::verification::{
    CheckKey, StateSource, VerificationFlags, VerificationPatch, VerificationRecord,
    VerificationStatus,
};
use tenancy_kernel_contracts::{UnixTimeMs, Validate};
use tenancy_os::auth::{AuthContext, SessionAuthContext};
use tenancy_os::config::{ReconcilerConfig, SimulationMode};
use tenancy_os::reconciler::{reason_codes, VerificationReconciler};
use tenancy_storage::{DecodePolicy, InMemoryVerificationStore, StorageError, VerificationStore};

const WINDOW: Duration = Duration::from_secs(5);

struct Harness {
    reconciler: Arc<VerificationReconciler<InMemoryVerificationStore>>,
    store: Arc<InMemoryVerificationStore>,
    auth: Arc<SessionAuthContext>,
    clock: ManualClock,
    _dir: TempDir,
}

fn user_id() -> UserId {
    UserId::new("tenant_e2e").unwrap()
}

fn harness(
    mode: SimulationMode,
    policy: DecodePolicy,
    seeded: Option<SimulationState>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let file = SimulationStateFile::for_path(dir.path().join("simulation.json"));
    if let Some(state) = seeded {
        file.save(&state).unwrap();
    }

    let mut config = ReconcilerConfig::mvp_v1(mode);
    config.poll_interval = Duration::from_secs(1);
    config.submission.completion_window = WINDOW;

    let store = Arc::new(InMemoryVerificationStore::new(policy));
    let user = AuthenticatedUser::new(user_id(), "tenant@example.com").unwrap();
    let auth = Arc::new(SessionAuthContext::signed_in(user));
    let clock = ManualClock::starting_at(UnixTimeMs(10_000));
    let reconciler = VerificationReconciler::open(
        config,
        Arc::clone(&store),
        Arc::clone(&auth) as Arc<dyn AuthContext>,
        Arc::new(clock.clone()),
        file,
    )
    .unwrap();

    Harness {
        reconciler,
        store,
        auth,
        clock,
        _dir: dir,
    }
}

fn identity_only_record() -> VerificationRecord {
    let mut flags = VerificationFlags::default();
    flags.set(CheckKey::Identity, true);
    VerificationRecord::v1(user_id(), flags, VerificationStatus::InProgress, None).unwrap()
}

#[tokio::test]
async fn at_recon_e2e_01_no_record_without_simulation_is_none() {
    let h = harness(SimulationMode::Inactive, DecodePolicy::Strict, None);
    let report = h.reconciler.refresh().await;

    assert_eq!(report.reason_code, reason_codes::RECON_REMOTE_NOT_FOUND);
    let state = h.reconciler.unified_state();
    assert_eq!(state.source, StateSource::None);
    assert_eq!(state.comprehensive_status, VerificationStatus::NotStarted);
    assert_eq!(state.flags, VerificationFlags::default());
    assert_eq!(h.reconciler.progress_percent(), 0);
    assert_eq!(h.store.update_calls(), 0);
}

#[tokio::test]
async fn at_recon_e2e_02_remote_record_passes_through() {
    let h = harness(SimulationMode::Inactive, DecodePolicy::Strict, None);
    h.store.put_record(&identity_only_record()).unwrap();

    let report = h.reconciler.refresh().await;
    assert_eq!(report.reason_code, reason_codes::RECON_OK_REMOTE);
    assert_eq!(report.state.source, StateSource::Remote);
    assert!(report.state.flags.identity);
    assert_eq!(h.reconciler.progress_percent(), 17);
}

#[tokio::test]
async fn at_recon_e2e_03_fetch_failure_publishes_none() {
    let h = harness(
        SimulationMode::Active,
        DecodePolicy::Strict,
        Some(SimulationState::uniform_v1(VerificationStatus::Verified)),
    );
    h.store.put_record(&identity_only_record()).unwrap();
    h.reconciler.refresh().await;
    assert!(h.reconciler.unified_state().flags.identity);

    h.store.set_fail_fetches(true);
    let report = h.reconciler.refresh().await;
    assert_eq!(report.reason_code, reason_codes::RECON_FETCH_FAILED);
    let state = h.reconciler.unified_state();
    assert_eq!(state.source, StateSource::None);
    assert_eq!(state.flags.verified_count(), 0);
    assert_eq!(h.store.update_calls(), 0);
}

#[tokio::test]
async fn at_recon_e2e_04_signed_out_user_is_not_an_error() {
    let h = harness(SimulationMode::Inactive, DecodePolicy::Strict, None);
    h.auth.sign_out();
    let report = h.reconciler.refresh().await;
    assert_eq!(report.reason_code, reason_codes::RECON_NO_USER);
    assert_eq!(report.state.source, StateSource::None);
    assert_eq!(h.store.fetch_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn at_recon_e2e_05_remote_flag_plus_in_flight_simulation() {
    let h = harness(SimulationMode::Active, DecodePolicy::Strict, None);
    h.store.put_record(&identity_only_record()).unwrap();
    let sim = h.reconciler.simulation().unwrap().clone();

    let (_, report) = tokio::join!(
        sim.engine
            .simulate(CheckKey::Employment, Duration::from_secs(2)),
        async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            h.reconciler.refresh().await
        }
    );
    assert_eq!(report.reason_code, reason_codes::RECON_OK_SIMULATION);
    let state = report.state;
    assert_eq!(state.source, StateSource::Simulation);
    assert!(state.flags.identity);
    assert!(!state.flags.employment);
    assert_eq!(state.comprehensive_status, VerificationStatus::InProgress);
    assert!(!h.reconciler.is_fully_verified());
    h.reconciler.shutdown();
}

#[tokio::test]
async fn at_recon_e2e_06_failed_simulation_never_clears_remote_flag() {
    let seeded = SimulationState::uniform_v1(VerificationStatus::Failed);
    let h = harness(SimulationMode::Active, DecodePolicy::Strict, Some(seeded));
    h.store.put_record(&identity_only_record()).unwrap();

    let state = h.reconciler.refresh().await.state;
    assert!(state.flags.identity);
    assert_eq!(state.flags.verified_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn at_recon_e2e_07_completed_demo_syncs_once() {
    let h = harness(SimulationMode::Active, DecodePolicy::Strict, None);
    let sim = h.reconciler.simulation().unwrap().clone();
    sim.engine.complete_all().unwrap();
    h.reconciler
        .start_submission(SubmissionId::new("ref_e2e").unwrap())
        .await
        .unwrap();
    assert_eq!(
        h.reconciler.unified_state().comprehensive_status,
        VerificationStatus::InProgress
    );
    h.reconciler.shutdown();

    h.clock.advance(WINDOW + Duration::from_secs(1));
    let report = h.reconciler.refresh().await;
    assert!(report.synced);
    assert_eq!(report.reason_code, reason_codes::RECON_OK_SIMULATION);

    let state = h.reconciler.unified_state();
    assert_eq!(state.comprehensive_status, VerificationStatus::Verified);
    assert_eq!(state.completion_percentage, 100);
    assert!(state.flags.is_all_verified());
    assert!(h.reconciler.is_fully_verified());
    state.validate().unwrap();

    let stored = h.store.fetch(&user_id()).await.unwrap().unwrap();
    assert_eq!(stored.flags, state.flags);
    assert_eq!(stored.comprehensive_status, VerificationStatus::Verified);
    assert_eq!(stored.completion_percentage, 100);
    assert_eq!(stored.completed_at, state.completed_at);

    let again = h.reconciler.refresh().await;
    assert!(!again.synced);
    assert_eq!(again.state, state);
    assert_eq!(h.store.update_calls(), 1);
    assert_eq!(h.store.fetch(&user_id()).await.unwrap(), Some(stored));
}

#[tokio::test(start_paused = true)]
async fn at_recon_e2e_08_sync_failure_is_retried_next_refresh() {
    let h = harness(
        SimulationMode::Active,
        DecodePolicy::Strict,
        Some(SimulationState::uniform_v1(VerificationStatus::Verified)),
    );
    h.reconciler
        .start_submission(SubmissionId::new("ref_retry").unwrap())
        .await
        .unwrap();
    h.reconciler.shutdown();
    h.clock.advance(WINDOW);

    h.store.set_fail_updates(true);
    let failed = h.reconciler.refresh().await;
    assert_eq!(failed.reason_code, reason_codes::RECON_SYNC_FAILED);
    assert!(!failed.synced);
    assert_eq!(
        failed.state.comprehensive_status,
        VerificationStatus::Verified
    );
    assert_eq!(h.store.fetch(&user_id()).await.unwrap(), None);

    h.store.set_fail_updates(false);
    let retried = h.reconciler.refresh().await;
    assert_eq!(retried.reason_code, reason_codes::RECON_OK_SIMULATION);
    assert!(retried.synced);
    assert!(h
        .store
        .fetch(&user_id())
        .await
        .unwrap()
        .is_some_and(|r| r.is_verified()));
}

#[tokio::test(start_paused = true)]
async fn at_recon_e2e_09_poller_runs_final_refresh_after_deadline() {
    let h = harness(
        SimulationMode::Active,
        DecodePolicy::Strict,
        Some(SimulationState::uniform_v1(VerificationStatus::Verified)),
    );
    let mut rx = h.reconciler.subscribe();
    h.reconciler
        .start_submission(SubmissionId::new("ref_poll").unwrap())
        .await
        .unwrap();
    rx.borrow_and_update();

    h.clock.advance(WINDOW);
    tokio::time::timeout(Duration::from_secs(30), rx.changed())
        .await
        .unwrap()
        .unwrap();

    assert!(rx.borrow().is_fully_verified());
    let sim = h.reconciler.simulation().unwrap();
    assert_eq!(sim.tracker.status(), SubmissionStatus::Completed);
    assert!(h
        .store
        .fetch(&user_id())
        .await
        .unwrap()
        .is_some_and(|r| r.is_verified()));
}

#[tokio::test(start_paused = true)]
async fn at_recon_e2e_10_shutdown_stops_the_poller() {
    let h = harness(
        SimulationMode::Active,
        DecodePolicy::Strict,
        Some(SimulationState::uniform_v1(VerificationStatus::Verified)),
    );
    let mut rx = h.reconciler.subscribe();
    h.reconciler
        .start_submission(SubmissionId::new("ref_stop").unwrap())
        .await
        .unwrap();
    rx.borrow_and_update();
    h.reconciler.shutdown();

    h.clock.advance(WINDOW);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!rx.has_changed().unwrap());
    assert_eq!(
        h.reconciler.simulation().unwrap().tracker.status(),
        SubmissionStatus::InProgress
    );
    assert_eq!(h.store.update_calls(), 0);
}

#[tokio::test]
async fn at_recon_e2e_11_strict_and_lenient_decode_diverge_on_bad_rows() {
    let row = json!({
        "identity_verified": true,
        "employment_verified": "yes",
        "comprehensive_verification_status": "mystery",
    });

    let strict = harness(SimulationMode::Inactive, DecodePolicy::Strict, None);
    strict.store.insert_raw_row(user_id(), row.clone()).unwrap();
    let report = strict.reconciler.refresh().await;
    assert_eq!(report.reason_code, reason_codes::RECON_FETCH_FAILED);
    assert_eq!(report.state.source, StateSource::None);

    let lenient = harness(SimulationMode::Inactive, DecodePolicy::Lenient, None);
    lenient.store.insert_raw_row(user_id(), row).unwrap();
    let report = lenient.reconciler.refresh().await;
    assert_eq!(report.reason_code, reason_codes::RECON_OK_REMOTE);
    assert!(report.state.flags.identity);
    assert!(!report.state.flags.employment);
    assert_eq!(
        report.state.comprehensive_status,
        VerificationStatus::InProgress
    );
    assert_eq!(report.state.completion_percentage, 17);
}

#[tokio::test]
async fn at_recon_e2e_12_corrupt_simulation_file_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("simulation.json");
    std::fs::write(&path, "{ not json").unwrap();

    let config = ReconcilerConfig::mvp_v1(SimulationMode::Active);
    let store = Arc::new(InMemoryVerificationStore::new(DecodePolicy::Strict));
    let auth: Arc<dyn AuthContext> = Arc::new(SessionAuthContext::anonymous());
    let reconciler = VerificationReconciler::open(
        config,
        store,
        auth,
        Arc::new(ManualClock::starting_at(UnixTimeMs(1))),
        SimulationStateFile::for_path(path.clone()),
    )
    .unwrap();

    let sim = reconciler.simulation().unwrap();
    assert_eq!(sim.engine.snapshot(), SimulationState::default_v1());
    let reloaded = SimulationStateFile::for_path(path).load().unwrap();
    assert_eq!(reloaded, Some(SimulationState::default_v1()));
}

/// Serves the first fetch from a snapshot taken before a long stall, like a
/// slow backend answering with a row that has since been written over.
struct SlowFirstFetchStore {
    inner: InMemoryVerificationStore,
    first_fetch_delay: std::sync::Mutex<Option<Duration>>,
}

#[async_trait]
impl VerificationStore for SlowFirstFetchStore {
    async fn fetch(&self, user_id: &UserId) -> Result<Option<VerificationRecord>, StorageError> {
        let row = self.inner.fetch(user_id).await;
        let delay = self.first_fetch_delay.lock().unwrap().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        row
    }

    async fn update(
        &self,
        user_id: &UserId,
        patch: VerificationPatch,
    ) -> Result<VerificationRecord, StorageError> {
        self.inner.update(user_id, patch).await
    }

    async fn admin_reset(&self, user_id: &UserId) -> Result<VerificationRecord, StorageError> {
        self.inner.admin_reset(user_id).await
    }
}

#[tokio::test(start_paused = true)]
async fn at_recon_e2e_13_overlapping_refreshes_publish_the_newest_row() {
    let store = Arc::new(SlowFirstFetchStore {
        inner: InMemoryVerificationStore::new(DecodePolicy::Strict),
        first_fetch_delay: std::sync::Mutex::new(Some(WINDOW)),
    });
    store.inner.put_record(&identity_only_record()).unwrap();
    let user = AuthenticatedUser::new(user_id(), "tenant@example.com").unwrap();
    let reconciler = VerificationReconciler::new(
        ReconcilerConfig::mvp_v1(SimulationMode::Inactive),
        Arc::clone(&store),
        Arc::new(SessionAuthContext::signed_in(user)),
        Arc::new(ManualClock::starting_at(UnixTimeMs(10_000))),
        None,
    )
    .unwrap();

    let (slow, fresh) = tokio::join!(reconciler.refresh(), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        store
            .inner
            .update(&user_id(), VerificationPatch::mark_verified(CheckKey::Credit))
            .await
            .unwrap();
        reconciler.refresh().await
    });

    assert!(slow.state.flags.identity);
    assert!(!slow.state.flags.credit);
    assert!(fresh.state.flags.credit);
    let published = reconciler.unified_state();
    assert!(published.flags.identity);
    assert!(published.flags.credit);
    assert_eq!(published.source, StateSource::Remote);
}

#[tokio::test]
async fn at_recon_e2e_14_interrupted_simulation_reopens_as_failed() {
    let seeded = SimulationState::default_v1()
        .with_status(CheckKey::Employment, VerificationStatus::InProgress);
    let h = harness(SimulationMode::Active, DecodePolicy::Strict, Some(seeded));
    h.store.put_record(&identity_only_record()).unwrap();

    let sim = h.reconciler.simulation().unwrap().clone();
    assert_eq!(sim.engine.status(CheckKey::Employment), VerificationStatus::Failed);
    let state = h.reconciler.refresh().await.state;
    assert!(state.flags.identity);
    assert!(!state.flags.employment);
    assert_eq!(state.comprehensive_status, VerificationStatus::InProgress);
}
