#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::verification::{completion_percentage_for, CheckKey, VerificationStatus, CHECK_COUNT};
use crate::{ContractViolation, SchemaVersion, Validate};

pub const SIMULATION_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// Demo-mode view of the six checks. Richer than the persisted booleans so
/// transient progress can be shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationState {
    pub schema_version: SchemaVersion,
    pub checks: BTreeMap<CheckKey, VerificationStatus>,
}

impl SimulationState {
    pub fn default_v1() -> Self {
        Self::uniform_v1(VerificationStatus::NotStarted)
    }

    pub fn uniform_v1(status: VerificationStatus) -> Self {
        Self {
            schema_version: SIMULATION_CONTRACT_VERSION,
            checks: CheckKey::ALL.into_iter().map(|key| (key, status)).collect(),
        }
    }

    pub fn status(&self, key: CheckKey) -> VerificationStatus {
        self.checks.get(&key).copied().unwrap_or_default()
    }

    pub fn with_status(&self, key: CheckKey, status: VerificationStatus) -> Self {
        let mut next = self.clone();
        next.checks.insert(key, status);
        next
    }

    pub fn verified_count(&self) -> usize {
        CheckKey::ALL
            .into_iter()
            .filter(|key| self.status(*key) == VerificationStatus::Verified)
            .count()
    }

    pub fn all_verified(&self) -> bool {
        self.verified_count() == CHECK_COUNT
    }

    pub fn any_in_progress(&self) -> bool {
        CheckKey::ALL
            .into_iter()
            .any(|key| self.status(key) == VerificationStatus::InProgress)
    }

    pub fn completion_percentage(&self) -> u8 {
        completion_percentage_for(self.verified_count())
    }
}

impl Default for SimulationState {
    fn default() -> Self {
        Self::default_v1()
    }
}

impl Validate for SimulationState {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != SIMULATION_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "simulation_state.schema_version",
                reason: "must match SIMULATION_CONTRACT_VERSION",
            });
        }
        if self.checks.len() != CHECK_COUNT {
            return Err(ContractViolation::InvalidValue {
                field: "simulation_state.checks",
                reason: "must hold exactly the six checks",
            });
        }
        Ok(())
    }
}
