#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tenancy_engines::clock::Clock;
use tenancy_engines::simulation::{SimulationEngine, SimulationError, SimulationStateFile};
use tenancy_engines::submission::SubmissionTracker;
use tenancy_kernel_contracts::submission::{SubmissionId, SubmissionSnapshot, SubmissionStatus};
use tenancy_kernel_contracts::verification::{UnifiedVerificationState, VerificationRecord};
use tenancy_kernel_contracts::{ContractViolation, ReasonCodeId, Validate};
use tenancy_storage::VerificationStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::auth::AuthContext;
use crate::config::ReconcilerConfig;
use crate::reconcile::{merge_simulated, remote_only, should_sync, sync_patch};

pub mod reason_codes {
    use tenancy_kernel_contracts::ReasonCodeId;

    // Verification reconciler reason-code namespace.
    pub const RECON_OK_REMOTE: ReasonCodeId = ReasonCodeId(0x5652_0001);
    pub const RECON_OK_SIMULATION: ReasonCodeId = ReasonCodeId(0x5652_0002);
    pub const RECON_NO_USER: ReasonCodeId = ReasonCodeId(0x5652_0003);
    pub const RECON_REMOTE_NOT_FOUND: ReasonCodeId = ReasonCodeId(0x5652_0004);
    pub const RECON_FETCH_FAILED: ReasonCodeId = ReasonCodeId(0x5652_00F1);
    pub const RECON_SYNC_FAILED: ReasonCodeId = ReasonCodeId(0x5652_00F2);
}

/// Outcome of one refresh: the state that was published and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub state: UnifiedVerificationState,
    pub reason_code: ReasonCodeId,
    /// True when this refresh wrote simulated completion to the store.
    pub synced: bool,
}

impl RefreshReport {
    fn new(state: UnifiedVerificationState, reason_code: ReasonCodeId) -> Self {
        Self {
            state,
            reason_code,
            synced: false,
        }
    }
}

/// Demo-mode collaborators. Present exactly when simulation mode is active.
#[derive(Debug, Clone)]
pub struct SimulationContext {
    pub engine: Arc<SimulationEngine>,
    pub tracker: Arc<SubmissionTracker>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcilerError {
    #[error("simulation mode is not active")]
    SimulationInactive,
    #[error("simulation context must be supplied exactly when simulation mode is active")]
    SimulationContextMismatch,
    #[error(transparent)]
    Contract(#[from] ContractViolation),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

/// Merges the remote verification row, the local simulation state and the
/// reference-check submission into the one view every display reads.
///
/// Refreshes are serialized: a refresh waits for the one in flight, so the
/// published state always belongs to the most recently started refresh.
pub struct VerificationReconciler<S: VerificationStore> {
    config: ReconcilerConfig,
    store: Arc<S>,
    auth: Arc<dyn AuthContext>,
    clock: Arc<dyn Clock>,
    simulation: Option<SimulationContext>,
    published: watch::Sender<UnifiedVerificationState>,
    refresh_gate: tokio::sync::Mutex<()>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl<S: VerificationStore + 'static> VerificationReconciler<S> {
    pub fn new(
        config: ReconcilerConfig,
        store: Arc<S>,
        auth: Arc<dyn AuthContext>,
        clock: Arc<dyn Clock>,
        simulation: Option<SimulationContext>,
    ) -> Result<Arc<Self>, ReconcilerError> {
        config.validate()?;
        if simulation.is_some() != config.simulation_mode.is_active() {
            return Err(ReconcilerError::SimulationContextMismatch);
        }
        let (published, _) = watch::channel(UnifiedVerificationState::none());
        Ok(Arc::new(Self {
            config,
            store,
            auth,
            clock,
            simulation,
            published,
            refresh_gate: tokio::sync::Mutex::new(()),
            poller: Mutex::new(None),
        }))
    }

    /// Builds the simulation engine and submission tracker from `config`
    /// when simulation mode is active. `state_file` is ignored otherwise.
    pub fn open(
        config: ReconcilerConfig,
        store: Arc<S>,
        auth: Arc<dyn AuthContext>,
        clock: Arc<dyn Clock>,
        state_file: SimulationStateFile,
    ) -> Result<Arc<Self>, ReconcilerError> {
        let simulation = if config.simulation_mode.is_active() {
            let engine = SimulationEngine::open(config.simulation, state_file)?;
            let tracker = SubmissionTracker::new(config.submission, Arc::clone(&clock));
            Some(SimulationContext {
                engine: Arc::new(engine),
                tracker: Arc::new(tracker),
            })
        } else {
            None
        };
        Self::new(config, store, auth, clock, simulation)
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn simulation(&self) -> Result<&SimulationContext, ReconcilerError> {
        self.simulation
            .as_ref()
            .ok_or(ReconcilerError::SimulationInactive)
    }

    /// Recomputes and publishes the unified state. Starts the submission
    /// poller if a submission is still in flight.
    pub async fn refresh(self: &Arc<Self>) -> RefreshReport {
        let report = self.refresh_and_publish().await;
        self.ensure_poller();
        report
    }

    pub fn unified_state(&self) -> UnifiedVerificationState {
        self.published.borrow().clone()
    }

    pub fn progress_percent(&self) -> u8 {
        self.published.borrow().progress_percent()
    }

    pub fn is_fully_verified(&self) -> bool {
        self.published.borrow().is_fully_verified()
    }

    pub fn subscribe(&self) -> watch::Receiver<UnifiedVerificationState> {
        self.published.subscribe()
    }

    /// Starts a reference-check submission and refreshes so the published
    /// state reflects it.
    pub async fn start_submission(
        self: &Arc<Self>,
        submission_id: SubmissionId,
    ) -> Result<SubmissionSnapshot, ReconcilerError> {
        let snapshot = self.simulation()?.tracker.start(submission_id)?;
        self.refresh().await;
        Ok(snapshot)
    }

    /// Stops the submission poller. Published state stays readable.
    pub fn shutdown(&self) {
        self.abort_poller();
    }

    async fn refresh_and_publish(&self) -> RefreshReport {
        let _gate = self.refresh_gate.lock().await;
        let report = self.refresh_once().await;
        self.published.send_replace(report.state.clone());
        report
    }

    async fn refresh_once(&self) -> RefreshReport {
        let Some(user) = self.auth.current_user() else {
            debug!("no authenticated user; publishing empty verification state");
            return RefreshReport::new(
                UnifiedVerificationState::none(),
                reason_codes::RECON_NO_USER,
            );
        };

        let remote = match self.store.fetch(&user.id).await {
            Ok(remote) => remote,
            Err(err) => {
                warn!(
                    user_id = %user.id,
                    error = %err,
                    "verification fetch failed; publishing empty state"
                );
                return RefreshReport::new(
                    UnifiedVerificationState::none(),
                    reason_codes::RECON_FETCH_FAILED,
                );
            }
        };

        let Some(simulation) = &self.simulation else {
            let reason_code = if remote.is_some() {
                reason_codes::RECON_OK_REMOTE
            } else {
                reason_codes::RECON_REMOTE_NOT_FOUND
            };
            return RefreshReport::new(remote_only(remote.as_ref()), reason_code);
        };

        simulation.tracker.poll();
        let sim_state = simulation.engine.snapshot();
        let submission = simulation.tracker.snapshot();
        let mut record =
            remote.unwrap_or_else(|| VerificationRecord::not_started_v1(user.id.clone()));

        let mut reason_code = reason_codes::RECON_OK_SIMULATION;
        let mut synced = false;
        if should_sync(&sim_state, &submission) && !record.is_verified() {
            match self
                .store
                .update(&user.id, sync_patch(self.clock.now()))
                .await
            {
                Ok(updated) => {
                    info!(user_id = %user.id, "simulated verification synced to store");
                    record = updated;
                    synced = true;
                }
                Err(err) => {
                    warn!(
                        user_id = %user.id,
                        error = %err,
                        "verification sync failed; will retry on next refresh"
                    );
                    reason_code = reason_codes::RECON_SYNC_FAILED;
                }
            }
        }

        RefreshReport {
            state: merge_simulated(&record, &sim_state, &submission),
            reason_code,
            synced,
        }
    }

    fn ensure_poller(self: &Arc<Self>) {
        let Some(simulation) = &self.simulation else {
            return;
        };
        if simulation.tracker.status() != SubmissionStatus::InProgress {
            return;
        }
        let mut slot = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        debug!(
            interval = ?self.config.poll_interval,
            "starting submission poller"
        );
        *slot = Some(tokio::spawn(poll_submission(
            Arc::downgrade(self),
            Arc::clone(&simulation.tracker),
            self.config.poll_interval,
        )));
    }
}

impl<S: VerificationStore> VerificationReconciler<S> {
    fn abort_poller(&self) {
        let handle = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            debug!("submission poller stopped");
        }
    }
}

impl<S: VerificationStore> Drop for VerificationReconciler<S> {
    fn drop(&mut self) {
        self.abort_poller();
    }
}

/// Ticks the tracker until the submission leaves in_progress, then runs one
/// final refresh. Holds only a weak handle so a dropped reconciler ends it.
async fn poll_submission<S: VerificationStore + 'static>(
    reconciler: Weak<VerificationReconciler<S>>,
    tracker: Arc<SubmissionTracker>,
    period: Duration,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if reconciler.strong_count() == 0 {
            return;
        }
        if tracker.poll() == SubmissionStatus::InProgress {
            continue;
        }
        if let Some(reconciler) = reconciler.upgrade() {
            info!("submission left in_progress; running final refresh");
            reconciler.refresh_and_publish().await;
        }
        return;
    }
}
