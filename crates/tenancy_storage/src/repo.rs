#![forbid(unsafe_code)]

use async_trait::async_trait;
use tenancy_kernel_contracts::identity::UserId;
use tenancy_kernel_contracts::verification::{VerificationPatch, VerificationRecord};
use tenancy_kernel_contracts::ContractViolation;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("no verification row for user {user_id}")]
    NotFound { user_id: String },
    #[error("verification store unavailable: {0}")]
    Unavailable(String),
    #[error("malformed verification row: {field} {reason}")]
    MalformedRow {
        field: &'static str,
        reason: &'static str,
    },
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
}

/// Typed repository interface for the per-user verification row held by the
/// hosted backend.
///
/// Writes are last-write-wins upserts with no optimistic concurrency; a write
/// is visible to every reader once the returned future resolves.
#[async_trait]
pub trait VerificationStore: Send + Sync {
    /// `Ok(None)` when the user has no row yet.
    async fn fetch(&self, user_id: &UserId) -> Result<Option<VerificationRecord>, StorageError>;

    /// Upserts `patch` onto the current row (or onto an empty not-started row)
    /// and returns the persisted result.
    async fn update(
        &self,
        user_id: &UserId,
        patch: VerificationPatch,
    ) -> Result<VerificationRecord, StorageError>;

    /// Administrative reset back to all-false / not_started. The only path
    /// that may lower a flag.
    async fn admin_reset(&self, user_id: &UserId) -> Result<VerificationRecord, StorageError>;
}
