#![forbid(unsafe_code)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tenancy_kernel_contracts::simulation::SimulationState;
use tenancy_kernel_contracts::verification::{CheckKey, VerificationStatus};
use tenancy_kernel_contracts::{ContractViolation, Validate};
use tracing::{debug, info, warn};

/// Fixed storage key of the persisted demo state.
pub const SIMULATION_STATE_KEY: &str = "tenancy_verification_simulation";

pub const DEFAULT_SUCCESS_PROBABILITY: f64 = 0.9;

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("check {check} is already being simulated")]
    AlreadyInProgress { check: CheckKey },
    #[error("simulation state io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("simulation state json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationConfig {
    /// Chance that a simulated check ends verified rather than failed.
    pub success_probability: f64,
}

impl SimulationConfig {
    pub fn mvp_v1() -> Self {
        Self {
            success_probability: DEFAULT_SUCCESS_PROBABILITY,
        }
    }

    pub fn with_success_probability(p: f64) -> Result<Self, ContractViolation> {
        let config = Self {
            success_probability: p,
        };
        config.validate()?;
        Ok(config)
    }
}

impl Validate for SimulationConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        let p = self.success_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(ContractViolation::InvalidRange {
                field: "simulation_config.success_probability",
                min: 0.0,
                max: 1.0,
                got: p,
            });
        }
        Ok(())
    }
}

/// JSON document holding the demo state on local disk.
#[derive(Debug, Clone)]
pub struct SimulationStateFile {
    path: PathBuf,
}

impl SimulationStateFile {
    pub fn default_local() -> Self {
        let path = env::var("TENANCY_SIMULATION_STATE_PATH")
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(default_state_path);
        Self::for_path(path)
    }

    pub fn for_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when nothing has been persisted yet.
    pub fn load(&self) -> Result<Option<SimulationState>, SimulationError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let state = serde_json::from_str::<SimulationState>(&raw)?;
        state.validate()?;
        Ok(Some(state))
    }

    pub fn save(&self, state: &SimulationState) -> Result<(), SimulationError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_vec_pretty(state)?;
        atomic_write(&self.path, &serialized)?;
        Ok(())
    }
}

/// Demo-mode driver for the six checks. Moves them through
/// not_started -> in_progress -> verified/failed without any backend call and
/// persists every change.
#[derive(Debug)]
pub struct SimulationEngine {
    config: SimulationConfig,
    file: SimulationStateFile,
    state: Mutex<SimulationState>,
    rng: Mutex<StdRng>,
}

impl SimulationEngine {
    pub fn open(
        config: SimulationConfig,
        file: SimulationStateFile,
    ) -> Result<Self, SimulationError> {
        Self::open_with_rng(config, file, StdRng::from_entropy())
    }

    /// Deterministic outcomes for tests and scripted demos.
    pub fn open_seeded(
        config: SimulationConfig,
        file: SimulationStateFile,
        seed: u64,
    ) -> Result<Self, SimulationError> {
        Self::open_with_rng(config, file, StdRng::seed_from_u64(seed))
    }

    fn open_with_rng(
        config: SimulationConfig,
        file: SimulationStateFile,
        rng: StdRng,
    ) -> Result<Self, SimulationError> {
        config.validate()?;
        let (state, dirty) = match file.load() {
            Ok(Some(state)) => fail_interrupted_checks(state),
            Ok(None) => (SimulationState::default_v1(), true),
            Err(err) => {
                warn!(
                    path = %file.path().display(),
                    error = %err,
                    "discarding unreadable simulation state"
                );
                (SimulationState::default_v1(), true)
            }
        };
        // Local demo state is never fatal: keep going in memory if it can't be written.
        if dirty {
            if let Err(err) = file.save(&state) {
                warn!(
                    path = %file.path().display(),
                    error = %err,
                    "simulation state not persisted; continuing in memory"
                );
            }
        }
        Ok(Self {
            config,
            file,
            state: Mutex::new(state),
            rng: Mutex::new(rng),
        })
    }

    pub fn config(&self) -> SimulationConfig {
        self.config
    }

    pub fn snapshot(&self) -> SimulationState {
        self.lock_state().clone()
    }

    pub fn status(&self, check: CheckKey) -> VerificationStatus {
        self.lock_state().status(check)
    }

    pub fn completion_percentage(&self) -> u8 {
        self.lock_state().completion_percentage()
    }

    /// Runs one simulated check for `duration` and reports whether it ended
    /// verified. Re-entry on a check that is still in progress is rejected;
    /// an already verified check returns `true` untouched.
    pub async fn simulate(
        &self,
        check: CheckKey,
        duration: Duration,
    ) -> Result<bool, SimulationError> {
        {
            let mut state = self.lock_state();
            match state.status(check) {
                VerificationStatus::InProgress => {
                    return Err(SimulationError::AlreadyInProgress { check });
                }
                VerificationStatus::Verified => {
                    debug!(check = %check, "check already verified; nothing to simulate");
                    return Ok(true);
                }
                VerificationStatus::NotStarted | VerificationStatus::Failed => {}
            }
            let next = state.with_status(check, VerificationStatus::InProgress);
            self.commit(&mut state, next)?;
        }

        tokio::time::sleep(duration).await;

        let verified = self.roll_outcome();
        let outcome = if verified {
            VerificationStatus::Verified
        } else {
            VerificationStatus::Failed
        };

        let mut state = self.lock_state();
        // A reset or complete-all issued mid-flight wins over the late outcome.
        if state.status(check) != VerificationStatus::InProgress {
            debug!(check = %check, "simulated check superseded while in flight");
            return Ok(state.status(check) == VerificationStatus::Verified);
        }
        let next = state.with_status(check, outcome);
        if let Err(err) = self.commit(&mut state, next) {
            // Nothing owns the check any more; leave it retryable.
            let failed = state.with_status(check, VerificationStatus::Failed);
            *state = failed;
            warn!(check = %check, error = %err, "simulated outcome not persisted");
            return Err(err);
        }
        info!(
            check = %check,
            outcome = outcome.as_str(),
            "simulated verification check finished"
        );
        Ok(verified)
    }

    pub fn reset_all(&self) -> Result<(), SimulationError> {
        let mut state = self.lock_state();
        self.commit(
            &mut state,
            SimulationState::uniform_v1(VerificationStatus::NotStarted),
        )?;
        info!("simulation state reset");
        Ok(())
    }

    pub fn complete_all(&self) -> Result<(), SimulationError> {
        let mut state = self.lock_state();
        self.commit(
            &mut state,
            SimulationState::uniform_v1(VerificationStatus::Verified),
        )?;
        info!("simulation state marked fully verified");
        Ok(())
    }

    // Persist first so memory never runs ahead of disk.
    fn commit(
        &self,
        state: &mut MutexGuard<'_, SimulationState>,
        next: SimulationState,
    ) -> Result<(), SimulationError> {
        self.file.save(&next)?;
        **state = next;
        Ok(())
    }

    fn roll_outcome(&self) -> bool {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_bool(self.config.success_probability)
    }

    fn lock_state(&self) -> MutexGuard<'_, SimulationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A check persisted as in_progress lost its timer with the previous process.
/// Marks it failed so it can be retried; the flag says whether to write back.
fn fail_interrupted_checks(state: SimulationState) -> (SimulationState, bool) {
    let mut next = state;
    let mut dirty = false;
    for check in CheckKey::ALL {
        if next.status(check) == VerificationStatus::InProgress {
            info!(check = %check, "interrupted simulated check marked failed");
            next = next.with_status(check, VerificationStatus::Failed);
            dirty = true;
        }
    }
    (next, dirty)
}

fn default_state_path() -> PathBuf {
    let file_name = format!("{SIMULATION_STATE_KEY}.json");
    if let Ok(xdg_config_home) = env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg_config_home)
            .join("tenancy")
            .join(file_name);
    }
    if let Ok(home) = env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("tenancy")
            .join(file_name);
    }
    PathBuf::from(".tenancy").join(file_name)
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), SimulationError> {
    let mut tmp = path.to_path_buf();
    tmp.set_extension("tmp");
    fs::write(&tmp, data)?;
    fs::rename(tmp, path)?;
    Ok(())
}
