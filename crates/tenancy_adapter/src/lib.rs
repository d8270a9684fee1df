#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use tenancy_engines::clock::SystemClock;
use tenancy_engines::simulation::{SimulationError, SimulationStateFile};
use tenancy_kernel_contracts::identity::{AuthenticatedUser, UserId};
use tenancy_kernel_contracts::submission::{SubmissionId, SubmissionSnapshot};
use tenancy_kernel_contracts::verification::{CheckKey, UnifiedVerificationState};
use tenancy_kernel_contracts::ReasonCodeId;
use tenancy_os::auth::{AuthContext, SessionAuthContext};
use tenancy_os::config::ReconcilerConfig;
use tenancy_os::reconciler::{reason_codes, ReconcilerError, VerificationReconciler};
use tenancy_storage::InMemoryVerificationStore;
use tracing::info;

/// Longest simulated check the adapter will hold a request open for.
const MAX_SIMULATED_CHECK_MS: u64 = 60_000;
const DEFAULT_DEMO_USER_ID: &str = "demo_tenant";

pub type AdapterReconciler = VerificationReconciler<InMemoryVerificationStore>;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AdapterHealthResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub simulation_mode: bool,
    pub signed_in: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct VerificationStateResponse {
    pub status: String,
    pub state: UnifiedVerificationState,
    pub progress_percent: u8,
    pub fully_verified: bool,
    pub pending_checks: Vec<CheckKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RefreshResponse {
    pub status: String,
    pub outcome: String,
    pub reason_code: ReasonCodeId,
    pub synced: bool,
    pub state: UnifiedVerificationState,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SimulateCheckRequest {
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SimulateCheckResponse {
    pub status: String,
    pub check: CheckKey,
    pub verified: bool,
    pub simulation_percent: u8,
    pub state: UnifiedVerificationState,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StartSubmissionRequest {
    pub submission_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SubmissionResponse {
    pub status: String,
    pub submission: SubmissionSnapshot,
    pub remaining_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AdapterErrorResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterFailure {
    InvalidRequest(String),
    SimulationInactive,
    Conflict(String),
    Internal(String),
}

impl AdapterFailure {
    pub fn outcome(&self) -> &'static str {
        match self {
            AdapterFailure::InvalidRequest(_) => "REJECTED",
            AdapterFailure::SimulationInactive => "SIMULATION_INACTIVE",
            AdapterFailure::Conflict(_) => "CONFLICT",
            AdapterFailure::Internal(_) => "ERROR",
        }
    }

    pub fn reason(&self) -> String {
        match self {
            AdapterFailure::InvalidRequest(reason)
            | AdapterFailure::Conflict(reason)
            | AdapterFailure::Internal(reason) => reason.clone(),
            AdapterFailure::SimulationInactive => "simulation mode is not active".to_string(),
        }
    }

    pub fn to_response(&self) -> AdapterErrorResponse {
        AdapterErrorResponse {
            status: "error".to_string(),
            outcome: self.outcome().to_string(),
            reason: Some(self.reason()),
        }
    }
}

impl From<SimulationError> for AdapterFailure {
    fn from(err: SimulationError) -> Self {
        match err {
            SimulationError::AlreadyInProgress { .. } => AdapterFailure::Conflict(err.to_string()),
            SimulationError::ContractViolation(_) => AdapterFailure::InvalidRequest(err.to_string()),
            SimulationError::Io(_) | SimulationError::Json(_) => {
                AdapterFailure::Internal(err.to_string())
            }
        }
    }
}

impl From<ReconcilerError> for AdapterFailure {
    fn from(err: ReconcilerError) -> Self {
        match err {
            ReconcilerError::SimulationInactive => AdapterFailure::SimulationInactive,
            ReconcilerError::Simulation(err) => err.into(),
            ReconcilerError::Contract(v) => AdapterFailure::InvalidRequest(v.to_string()),
            ReconcilerError::SimulationContextMismatch => AdapterFailure::Internal(err.to_string()),
        }
    }
}

/// Serves the reconciler to UI clients. Cheap to clone; every clone shares
/// the same reconciler and auth session.
#[derive(Clone)]
pub struct AdapterRuntime {
    reconciler: Arc<AdapterReconciler>,
    auth: Arc<SessionAuthContext>,
}

impl AdapterRuntime {
    pub fn new(reconciler: Arc<AdapterReconciler>, auth: Arc<SessionAuthContext>) -> Self {
        Self { reconciler, auth }
    }

    /// In-memory store, system clock and a demo session read from the
    /// `TENANCY_*` environment.
    pub fn default_from_env() -> Result<Self, String> {
        let config = ReconcilerConfig::from_env();
        let simulation_active = config.simulation_mode.is_active();
        let store = Arc::new(InMemoryVerificationStore::new(config.decode_policy));
        let auth = Arc::new(
            match demo_user_from_env(|key| env::var(key).ok(), simulation_active)? {
                Some(user) => SessionAuthContext::signed_in(user),
                None => SessionAuthContext::anonymous(),
            },
        );
        let reconciler = VerificationReconciler::open(
            config,
            store,
            Arc::clone(&auth) as Arc<dyn AuthContext>,
            Arc::new(SystemClock),
            SimulationStateFile::default_local(),
        )
        .map_err(|err| err.to_string())?;
        info!(simulation_active, "adapter runtime ready");
        Ok(Self::new(reconciler, auth))
    }

    pub fn reconciler(&self) -> &Arc<AdapterReconciler> {
        &self.reconciler
    }

    pub fn health_report(&self) -> AdapterHealthResponse {
        AdapterHealthResponse {
            status: "ok".to_string(),
            outcome: "HEALTHY".to_string(),
            reason: None,
            simulation_mode: self.reconciler.config().simulation_mode.is_active(),
            signed_in: self.auth.current_user().is_some(),
        }
    }

    /// Last published state. Does not refresh.
    pub fn verification_report(&self) -> VerificationStateResponse {
        let state = self.reconciler.unified_state();
        VerificationStateResponse {
            status: "ok".to_string(),
            progress_percent: state.progress_percent(),
            fully_verified: state.is_fully_verified(),
            pending_checks: state.pending_checks(),
            state,
        }
    }

    pub async fn refresh(&self) -> RefreshResponse {
        let report = self.reconciler.refresh().await;
        RefreshResponse {
            status: "ok".to_string(),
            outcome: refresh_outcome_label(report.reason_code).to_string(),
            reason_code: report.reason_code,
            synced: report.synced,
            state: report.state,
        }
    }

    pub async fn simulate_check(
        &self,
        raw_check: &str,
        request: SimulateCheckRequest,
    ) -> Result<SimulateCheckResponse, AdapterFailure> {
        let check = CheckKey::parse(raw_check).ok_or_else(|| {
            AdapterFailure::InvalidRequest(format!("unknown verification check '{raw_check}'"))
        })?;
        if request.duration_ms > MAX_SIMULATED_CHECK_MS {
            return Err(AdapterFailure::InvalidRequest(format!(
                "duration_ms must be <= {MAX_SIMULATED_CHECK_MS}"
            )));
        }
        let engine = Arc::clone(&self.reconciler.simulation()?.engine);
        let verified = engine
            .simulate(check, Duration::from_millis(request.duration_ms))
            .await?;
        let report = self.reconciler.refresh().await;
        Ok(SimulateCheckResponse {
            status: "ok".to_string(),
            check,
            verified,
            simulation_percent: engine.completion_percentage(),
            state: report.state,
        })
    }

    pub async fn reset_simulation(&self) -> Result<VerificationStateResponse, AdapterFailure> {
        self.reconciler.simulation()?.engine.reset_all()?;
        self.reconciler.refresh().await;
        Ok(self.verification_report())
    }

    pub async fn complete_simulation(&self) -> Result<VerificationStateResponse, AdapterFailure> {
        self.reconciler.simulation()?.engine.complete_all()?;
        self.reconciler.refresh().await;
        Ok(self.verification_report())
    }

    pub async fn start_submission(
        &self,
        request: StartSubmissionRequest,
    ) -> Result<SubmissionResponse, AdapterFailure> {
        let submission_id = SubmissionId::new(request.submission_id)
            .map_err(|v| AdapterFailure::InvalidRequest(v.to_string()))?;
        self.reconciler.start_submission(submission_id).await?;
        self.submission_report()
    }

    pub fn submission_report(&self) -> Result<SubmissionResponse, AdapterFailure> {
        let tracker = &self.reconciler.simulation()?.tracker;
        Ok(SubmissionResponse {
            status: "ok".to_string(),
            submission: tracker.snapshot(),
            remaining_secs: tracker.remaining_secs(),
        })
    }

    pub fn shutdown(&self) {
        self.reconciler.shutdown();
    }
}

pub fn refresh_outcome_label(reason_code: ReasonCodeId) -> &'static str {
    match reason_code {
        reason_codes::RECON_OK_REMOTE => "OK_REMOTE",
        reason_codes::RECON_OK_SIMULATION => "OK_SIMULATION",
        reason_codes::RECON_NO_USER => "NO_USER",
        reason_codes::RECON_REMOTE_NOT_FOUND => "REMOTE_NOT_FOUND",
        reason_codes::RECON_FETCH_FAILED => "FETCH_FAILED",
        reason_codes::RECON_SYNC_FAILED => "SYNC_FAILED",
        _ => "UNKNOWN",
    }
}

/// Signed-in account for the demo server. Simulation mode always signs in
/// (as `demo_tenant` unless overridden); otherwise only an explicit
/// `TENANCY_DEMO_USER_ID` does.
fn demo_user_from_env<F>(
    lookup: F,
    simulation_active: bool,
) -> Result<Option<AuthenticatedUser>, String>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| {
        lookup(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let id = match non_empty("TENANCY_DEMO_USER_ID") {
        Some(id) => id,
        None if simulation_active => DEFAULT_DEMO_USER_ID.to_string(),
        None => return Ok(None),
    };
    let email = non_empty("TENANCY_DEMO_USER_EMAIL").unwrap_or_else(|| format!("{id}@example.com"));
    let user_id = UserId::new(id).map_err(|err| err.to_string())?;
    AuthenticatedUser::new(user_id, email)
        .map(Some)
        .map_err(|err| err.to_string())
}
