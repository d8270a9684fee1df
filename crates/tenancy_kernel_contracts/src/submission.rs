#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::{ContractViolation, SchemaVersion, UnixTimeMs, Validate};

pub const SUBMISSION_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// Identifier of a reference-check request.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubmissionId(String);

impl SubmissionId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "submission_id",
                reason: "must not be empty",
            });
        }
        if id.len() > 128 {
            return Err(ContractViolation::InvalidValue {
                field: "submission_id",
                reason: "must be <= 128 chars",
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SubmissionId {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SubmissionId> for String {
    fn from(value: SubmissionId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionSnapshot {
    pub schema_version: SchemaVersion,
    pub submission_id: Option<SubmissionId>,
    pub status: SubmissionStatus,
    pub started_at: Option<UnixTimeMs>,
    pub completion_deadline: Option<UnixTimeMs>,
    pub completed_at: Option<UnixTimeMs>,
}

impl SubmissionSnapshot {
    pub fn not_started_v1() -> Self {
        Self {
            schema_version: SUBMISSION_CONTRACT_VERSION,
            submission_id: None,
            status: SubmissionStatus::NotStarted,
            started_at: None,
            completion_deadline: None,
            completed_at: None,
        }
    }

    pub fn in_progress_v1(
        submission_id: SubmissionId,
        started_at: UnixTimeMs,
        completion_deadline: UnixTimeMs,
    ) -> Result<Self, ContractViolation> {
        let s = Self {
            schema_version: SUBMISSION_CONTRACT_VERSION,
            submission_id: Some(submission_id),
            status: SubmissionStatus::InProgress,
            started_at: Some(started_at),
            completion_deadline: Some(completion_deadline),
            completed_at: None,
        };
        s.validate()?;
        Ok(s)
    }

    pub fn is_completed(&self) -> bool {
        self.status == SubmissionStatus::Completed
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == SubmissionStatus::InProgress
    }
}

impl Default for SubmissionSnapshot {
    fn default() -> Self {
        Self::not_started_v1()
    }
}

impl Validate for SubmissionSnapshot {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != SUBMISSION_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "submission_snapshot.schema_version",
                reason: "must match SUBMISSION_CONTRACT_VERSION",
            });
        }
        match self.status {
            SubmissionStatus::NotStarted => {
                if self.submission_id.is_some()
                    || self.started_at.is_some()
                    || self.completion_deadline.is_some()
                    || self.completed_at.is_some()
                {
                    return Err(ContractViolation::InvalidValue {
                        field: "submission_snapshot.status",
                        reason: "not_started must carry no submission fields",
                    });
                }
            }
            SubmissionStatus::InProgress | SubmissionStatus::Completed => {
                let (Some(_), Some(started_at), Some(deadline)) = (
                    &self.submission_id,
                    self.started_at,
                    self.completion_deadline,
                ) else {
                    return Err(ContractViolation::InvalidValue {
                        field: "submission_snapshot.submission_id",
                        reason: "started submissions need id, started_at and deadline",
                    });
                };
                if deadline < started_at {
                    return Err(ContractViolation::InvalidValue {
                        field: "submission_snapshot.completion_deadline",
                        reason: "must be >= started_at",
                    });
                }
                match (self.status, self.completed_at) {
                    (SubmissionStatus::InProgress, None) => {}
                    (SubmissionStatus::InProgress, Some(_)) => {
                        return Err(ContractViolation::InvalidValue {
                            field: "submission_snapshot.completed_at",
                            reason: "must be None while in_progress",
                        });
                    }
                    (_, Some(completed_at)) if completed_at >= deadline => {}
                    _ => {
                        return Err(ContractViolation::InvalidValue {
                            field: "submission_snapshot.completed_at",
                            reason: "completion is gated on completion_deadline",
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
