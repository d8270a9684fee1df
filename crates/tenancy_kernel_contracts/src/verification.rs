#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::identity::UserId;
use crate::{ContractViolation, SchemaVersion, UnixTimeMs, Validate};

pub const VERIFICATION_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// Number of independent checks a user goes through.
pub const CHECK_COUNT: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKey {
    Identity,
    Employment,
    Income,
    Credit,
    References,
    Bank,
}

impl CheckKey {
    pub const ALL: [CheckKey; CHECK_COUNT] = [
        CheckKey::Identity,
        CheckKey::Employment,
        CheckKey::Income,
        CheckKey::Credit,
        CheckKey::References,
        CheckKey::Bank,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CheckKey::Identity => "identity",
            CheckKey::Employment => "employment",
            CheckKey::Income => "income",
            CheckKey::Credit => "credit",
            CheckKey::References => "references",
            CheckKey::Bank => "bank",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|key| key.as_str().eq_ignore_ascii_case(raw))
    }
}

impl std::fmt::Display for CheckKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single check, and of the comprehensive summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    #[default]
    NotStarted,
    InProgress,
    Verified,
    Failed,
}

impl VerificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VerificationStatus::NotStarted => "not_started",
            VerificationStatus::InProgress => "in_progress",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "not_started" => Some(VerificationStatus::NotStarted),
            "in_progress" => Some(VerificationStatus::InProgress),
            "verified" => Some(VerificationStatus::Verified),
            "failed" => Some(VerificationStatus::Failed),
            _ => None,
        }
    }

    /// Administrative resets are not expressed here; they bypass the machine.
    pub fn can_transition_to(self, next: VerificationStatus) -> bool {
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (VerificationStatus::NotStarted, VerificationStatus::InProgress)
                | (VerificationStatus::InProgress, VerificationStatus::Verified)
                | (VerificationStatus::InProgress, VerificationStatus::Failed)
                | (VerificationStatus::Failed, VerificationStatus::InProgress)
        )
    }
}

/// round(100 * verified / 6), half rounding up.
pub fn completion_percentage_for(verified_count: usize) -> u8 {
    let n = verified_count.min(CHECK_COUNT) as u32;
    ((200 * n + CHECK_COUNT as u32) / (2 * CHECK_COUNT as u32)) as u8
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerificationFlags {
    pub identity: bool,
    pub employment: bool,
    pub income: bool,
    pub credit: bool,
    pub references: bool,
    pub bank: bool,
}

impl VerificationFlags {
    pub fn all_verified() -> Self {
        Self::from_fn(|_| true)
    }

    pub fn from_fn(mut f: impl FnMut(CheckKey) -> bool) -> Self {
        Self {
            identity: f(CheckKey::Identity),
            employment: f(CheckKey::Employment),
            income: f(CheckKey::Income),
            credit: f(CheckKey::Credit),
            references: f(CheckKey::References),
            bank: f(CheckKey::Bank),
        }
    }

    pub fn get(&self, key: CheckKey) -> bool {
        match key {
            CheckKey::Identity => self.identity,
            CheckKey::Employment => self.employment,
            CheckKey::Income => self.income,
            CheckKey::Credit => self.credit,
            CheckKey::References => self.references,
            CheckKey::Bank => self.bank,
        }
    }

    pub fn set(&mut self, key: CheckKey, value: bool) {
        let slot = match key {
            CheckKey::Identity => &mut self.identity,
            CheckKey::Employment => &mut self.employment,
            CheckKey::Income => &mut self.income,
            CheckKey::Credit => &mut self.credit,
            CheckKey::References => &mut self.references,
            CheckKey::Bank => &mut self.bank,
        };
        *slot = value;
    }

    pub fn verified_count(&self) -> usize {
        CheckKey::ALL.iter().filter(|key| self.get(**key)).count()
    }

    pub fn is_all_verified(&self) -> bool {
        self.verified_count() == CHECK_COUNT
    }

    pub fn pending(&self) -> Vec<CheckKey> {
        CheckKey::ALL
            .into_iter()
            .filter(|key| !self.get(*key))
            .collect()
    }
}

pub fn expected_completion_percentage(
    status: VerificationStatus,
    flags: &VerificationFlags,
) -> u8 {
    if status == VerificationStatus::Verified {
        100
    } else {
        completion_percentage_for(flags.verified_count())
    }
}

/// Persisted per-user verification row, owned by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub schema_version: SchemaVersion,
    pub user_id: UserId,
    pub flags: VerificationFlags,
    pub comprehensive_status: VerificationStatus,
    pub completed_at: Option<UnixTimeMs>,
    pub completion_percentage: u8,
}

impl VerificationRecord {
    pub fn not_started_v1(user_id: UserId) -> Self {
        Self {
            schema_version: VERIFICATION_CONTRACT_VERSION,
            user_id,
            flags: VerificationFlags::default(),
            comprehensive_status: VerificationStatus::NotStarted,
            completed_at: None,
            completion_percentage: 0,
        }
    }

    pub fn v1(
        user_id: UserId,
        flags: VerificationFlags,
        comprehensive_status: VerificationStatus,
        completed_at: Option<UnixTimeMs>,
    ) -> Result<Self, ContractViolation> {
        let record = Self {
            schema_version: VERIFICATION_CONTRACT_VERSION,
            user_id,
            flags,
            comprehensive_status,
            completed_at,
            completion_percentage: expected_completion_percentage(comprehensive_status, &flags),
        };
        record.validate()?;
        Ok(record)
    }

    pub fn is_verified(&self) -> bool {
        self.comprehensive_status == VerificationStatus::Verified
    }

    /// Applies a partial update under the row's write rules: flags only rise,
    /// `verified` is terminal, and `completed_at` is written once.
    pub fn apply_patch(&self, patch: &VerificationPatch) -> Result<Self, ContractViolation> {
        let mut flags = self.flags;
        for key in CheckKey::ALL {
            if patch.flag(key) == Some(true) {
                flags.set(key, true);
            }
        }

        let status = match patch.comprehensive_status {
            Some(next) if self.is_verified() && next != VerificationStatus::Verified => {
                return Err(ContractViolation::InvalidValue {
                    field: "verification_patch.comprehensive_status",
                    reason: "verified is terminal; use an administrative reset",
                });
            }
            Some(next) => next,
            None => self.comprehensive_status,
        };

        let completed_at = self.completed_at.or(patch.completed_at);
        if status == VerificationStatus::Verified && !self.is_verified() && completed_at.is_none()
        {
            return Err(ContractViolation::InvalidValue {
                field: "verification_patch.completed_at",
                reason: "required when status transitions to verified",
            });
        }

        let next = Self {
            schema_version: VERIFICATION_CONTRACT_VERSION,
            user_id: self.user_id.clone(),
            flags,
            comprehensive_status: status,
            completed_at,
            completion_percentage: expected_completion_percentage(status, &flags),
        };
        next.validate()?;
        Ok(next)
    }
}

impl Validate for VerificationRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != VERIFICATION_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "verification_record.schema_version",
                reason: "must match VERIFICATION_CONTRACT_VERSION",
            });
        }
        if self.completion_percentage > 100 {
            return Err(ContractViolation::InvalidRange {
                field: "verification_record.completion_percentage",
                min: 0.0,
                max: 100.0,
                got: self.completion_percentage as f64,
            });
        }
        if self.is_verified() && !self.flags.is_all_verified() {
            return Err(ContractViolation::InvalidValue {
                field: "verification_record.comprehensive_status",
                reason: "verified requires all six flags",
            });
        }
        if self.completion_percentage
            != expected_completion_percentage(self.comprehensive_status, &self.flags)
        {
            return Err(ContractViolation::InvalidValue {
                field: "verification_record.completion_percentage",
                reason: "must equal round(100 * verified / 6), or 100 when verified",
            });
        }
        Ok(())
    }
}

/// Partial update for a `VerificationRecord`. The percentage is always
/// derived by the record and cannot be written directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationPatch {
    pub identity: Option<bool>,
    pub employment: Option<bool>,
    pub income: Option<bool>,
    pub credit: Option<bool>,
    pub references: Option<bool>,
    pub bank: Option<bool>,
    pub comprehensive_status: Option<VerificationStatus>,
    pub completed_at: Option<UnixTimeMs>,
}

impl VerificationPatch {
    pub fn mark_verified(key: CheckKey) -> Self {
        let mut patch = Self::default();
        patch.set_flag(key, true);
        patch
    }

    /// All six flags raised and the summary moved to verified.
    pub fn full_completion(completed_at: UnixTimeMs) -> Self {
        Self {
            identity: Some(true),
            employment: Some(true),
            income: Some(true),
            credit: Some(true),
            references: Some(true),
            bank: Some(true),
            comprehensive_status: Some(VerificationStatus::Verified),
            completed_at: Some(completed_at),
        }
    }

    pub fn flag(&self, key: CheckKey) -> Option<bool> {
        match key {
            CheckKey::Identity => self.identity,
            CheckKey::Employment => self.employment,
            CheckKey::Income => self.income,
            CheckKey::Credit => self.credit,
            CheckKey::References => self.references,
            CheckKey::Bank => self.bank,
        }
    }

    pub fn set_flag(&mut self, key: CheckKey, value: bool) {
        let slot = match key {
            CheckKey::Identity => &mut self.identity,
            CheckKey::Employment => &mut self.employment,
            CheckKey::Income => &mut self.income,
            CheckKey::Credit => &mut self.credit,
            CheckKey::References => &mut self.references,
            CheckKey::Bank => &mut self.bank,
        };
        *slot = Some(value);
    }
}

/// Which upstream dominated a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateSource {
    Remote,
    Simulation,
    None,
}

/// The single view every display component reads. Derived on each refresh;
/// never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedVerificationState {
    pub flags: VerificationFlags,
    pub comprehensive_status: VerificationStatus,
    pub completed_at: Option<UnixTimeMs>,
    pub completion_percentage: u8,
    pub source: StateSource,
}

impl UnifiedVerificationState {
    pub fn none() -> Self {
        Self {
            flags: VerificationFlags::default(),
            comprehensive_status: VerificationStatus::NotStarted,
            completed_at: None,
            completion_percentage: 0,
            source: StateSource::None,
        }
    }

    pub fn from_remote(record: &VerificationRecord) -> Self {
        Self {
            flags: record.flags,
            comprehensive_status: record.comprehensive_status,
            completed_at: record.completed_at,
            completion_percentage: record.completion_percentage,
            source: StateSource::Remote,
        }
    }

    pub fn progress_percent(&self) -> u8 {
        self.completion_percentage.min(100)
    }

    pub fn is_fully_verified(&self) -> bool {
        self.comprehensive_status == VerificationStatus::Verified && self.flags.is_all_verified()
    }

    pub fn is_check_verified(&self, key: CheckKey) -> bool {
        self.flags.get(key)
    }

    pub fn pending_checks(&self) -> Vec<CheckKey> {
        self.flags.pending()
    }
}

impl Default for UnifiedVerificationState {
    fn default() -> Self {
        Self::none()
    }
}

impl Validate for UnifiedVerificationState {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.completion_percentage > 100 {
            return Err(ContractViolation::InvalidRange {
                field: "unified_verification_state.completion_percentage",
                min: 0.0,
                max: 100.0,
                got: self.completion_percentage as f64,
            });
        }
        if self.comprehensive_status == VerificationStatus::Verified {
            if !self.flags.is_all_verified() {
                return Err(ContractViolation::InvalidValue {
                    field: "unified_verification_state.comprehensive_status",
                    reason: "verified requires all six flags",
                });
            }
            if self.completion_percentage != 100 {
                return Err(ContractViolation::InvalidValue {
                    field: "unified_verification_state.completion_percentage",
                    reason: "must be 100 when verified",
                });
            }
        }
        if self.source == StateSource::None && *self != Self::none() {
            return Err(ContractViolation::InvalidValue {
                field: "unified_verification_state.source",
                reason: "source=none must carry the empty state",
            });
        }
        Ok(())
    }
}
