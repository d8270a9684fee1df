#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tenancy_kernel_contracts::identity::UserId;
use tenancy_kernel_contracts::verification::{VerificationPatch, VerificationRecord};
use tracing::debug;

use crate::repo::{StorageError, VerificationStore};
use crate::row::{decode_verification_row, encode_verification_row, DecodePolicy};

/// In-process stand-in for the hosted backend's verification table.
///
/// Rows are kept as raw JSON so reads exercise the same validating decode a
/// network-backed store would. Fault injection switches let callers exercise
/// the reconciler's fallback paths.
#[derive(Debug)]
pub struct InMemoryVerificationStore {
    rows: Mutex<BTreeMap<UserId, Value>>,
    decode_policy: DecodePolicy,
    fail_fetches: AtomicBool,
    fail_updates: AtomicBool,
    fetch_calls: AtomicU64,
    update_calls: AtomicU64,
}

impl InMemoryVerificationStore {
    pub fn new(decode_policy: DecodePolicy) -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
            decode_policy,
            fail_fetches: AtomicBool::new(false),
            fail_updates: AtomicBool::new(false),
            fetch_calls: AtomicU64::new(0),
            update_calls: AtomicU64::new(0),
        }
    }

    pub fn decode_policy(&self) -> DecodePolicy {
        self.decode_policy
    }

    /// Writes a row as-is, the way an out-of-band profile edit would.
    pub fn insert_raw_row(&self, user_id: UserId, row: Value) -> Result<(), StorageError> {
        self.lock_rows()?.insert(user_id, row);
        Ok(())
    }

    pub fn put_record(&self, record: &VerificationRecord) -> Result<(), StorageError> {
        self.insert_raw_row(record.user_id.clone(), encode_verification_row(record))
    }

    pub fn raw_row(&self, user_id: &UserId) -> Result<Option<Value>, StorageError> {
        Ok(self.lock_rows()?.get(user_id).cloned())
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn set_fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> u64 {
        self.update_calls.load(Ordering::SeqCst)
    }

    fn lock_rows(&self) -> Result<MutexGuard<'_, BTreeMap<UserId, Value>>, StorageError> {
        self.rows
            .lock()
            .map_err(|_| StorageError::Unavailable("verification rows lock poisoned".to_string()))
    }
}

impl Default for InMemoryVerificationStore {
    fn default() -> Self {
        Self::new(DecodePolicy::for_build())
    }
}

#[async_trait]
impl VerificationStore for InMemoryVerificationStore {
    async fn fetch(&self, user_id: &UserId) -> Result<Option<VerificationRecord>, StorageError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "injected fetch failure".to_string(),
            ));
        }
        let rows = self.lock_rows()?;
        rows.get(user_id)
            .map(|row| decode_verification_row(user_id, row, self.decode_policy))
            .transpose()
    }

    async fn update(
        &self,
        user_id: &UserId,
        patch: VerificationPatch,
    ) -> Result<VerificationRecord, StorageError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "injected update failure".to_string(),
            ));
        }
        let mut rows = self.lock_rows()?;
        let current = match rows.get(user_id) {
            Some(row) => decode_verification_row(user_id, row, self.decode_policy)?,
            None => VerificationRecord::not_started_v1(user_id.clone()),
        };
        let next = current.apply_patch(&patch)?;
        rows.insert(user_id.clone(), encode_verification_row(&next));
        debug!(
            user_id = %user_id,
            status = next.comprehensive_status.as_str(),
            pct = next.completion_percentage,
            "verification row upserted"
        );
        Ok(next)
    }

    async fn admin_reset(&self, user_id: &UserId) -> Result<VerificationRecord, StorageError> {
        let mut rows = self.lock_rows()?;
        if !rows.contains_key(user_id) {
            return Err(StorageError::NotFound {
                user_id: user_id.to_string(),
            });
        }
        let reset = VerificationRecord::not_started_v1(user_id.clone());
        rows.insert(user_id.clone(), encode_verification_row(&reset));
        Ok(reset)
    }
}
