#![forbid(unsafe_code)]

//! Typed codec for the loosely-typed verification row returned by the hosted
//! backend. Every read goes through [`decode_verification_row`]; nothing past
//! this module sees raw JSON.

use serde_json::{json, Map, Value};
use tenancy_kernel_contracts::identity::UserId;
use tenancy_kernel_contracts::verification::{
    expected_completion_percentage, CheckKey, VerificationFlags, VerificationRecord,
    VerificationStatus, VERIFICATION_CONTRACT_VERSION,
};
use tenancy_kernel_contracts::{UnixTimeMs, Validate};
use tracing::warn;

use crate::repo::StorageError;

pub const COL_COMPREHENSIVE_STATUS: &str = "comprehensive_verification_status";
pub const COL_COMPLETED_AT: &str = "verification_completed_at";
pub const COL_COMPLETION_PERCENTAGE: &str = "verification_completion_percentage";

/// How unexpected row shapes are handled at the store boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePolicy {
    /// Reject the row with `StorageError::MalformedRow`.
    Strict,
    /// Substitute defaults and log a warning.
    Lenient,
}

impl DecodePolicy {
    /// Strict in debug builds, lenient in release builds.
    pub fn for_build() -> Self {
        if cfg!(debug_assertions) {
            DecodePolicy::Strict
        } else {
            DecodePolicy::Lenient
        }
    }
}

pub fn flag_column(key: CheckKey) -> &'static str {
    match key {
        CheckKey::Identity => "identity_verified",
        CheckKey::Employment => "employment_verified",
        CheckKey::Income => "income_verified",
        CheckKey::Credit => "credit_verified",
        CheckKey::References => "references_verified",
        CheckKey::Bank => "bank_verified",
    }
}

pub fn encode_verification_row(record: &VerificationRecord) -> Value {
    let mut row = Map::new();
    row.insert("user_id".to_string(), json!(record.user_id.as_str()));
    for key in CheckKey::ALL {
        row.insert(flag_column(key).to_string(), json!(record.flags.get(key)));
    }
    row.insert(
        COL_COMPREHENSIVE_STATUS.to_string(),
        json!(record.comprehensive_status.as_str()),
    );
    row.insert(
        COL_COMPLETED_AT.to_string(),
        record
            .completed_at
            .map(|t| json!(t.0))
            .unwrap_or(Value::Null),
    );
    row.insert(
        COL_COMPLETION_PERCENTAGE.to_string(),
        json!(record.completion_percentage),
    );
    Value::Object(row)
}

pub fn decode_verification_row(
    user_id: &UserId,
    raw: &Value,
    policy: DecodePolicy,
) -> Result<VerificationRecord, StorageError> {
    let empty = Map::new();
    let row = match raw.as_object() {
        Some(row) => row,
        None => {
            malformed(user_id, policy, "row", "must be a JSON object")?;
            &empty
        }
    };

    let mut flags = VerificationFlags::default();
    for key in CheckKey::ALL {
        let column = flag_column(key);
        match row.get(column).and_then(Value::as_bool) {
            Some(v) => flags.set(key, v),
            None => malformed(user_id, policy, column, "must be a boolean")?,
        }
    }

    let declared_status = row
        .get(COL_COMPREHENSIVE_STATUS)
        .and_then(Value::as_str)
        .and_then(VerificationStatus::parse);
    let status = match declared_status {
        Some(VerificationStatus::Verified) if !flags.is_all_verified() => {
            malformed(
                user_id,
                policy,
                COL_COMPREHENSIVE_STATUS,
                "verified requires all six flags",
            )?;
            derive_status(&flags)
        }
        Some(status) => status,
        None => {
            malformed(
                user_id,
                policy,
                COL_COMPREHENSIVE_STATUS,
                "must be a known status",
            )?;
            derive_status(&flags)
        }
    };

    let completed_at = match row.get(COL_COMPLETED_AT) {
        None | Some(Value::Null) => None,
        Some(v) => match v.as_u64() {
            Some(ms) => Some(UnixTimeMs(ms)),
            None => {
                malformed(
                    user_id,
                    policy,
                    COL_COMPLETED_AT,
                    "must be null or unix milliseconds",
                )?;
                None
            }
        },
    };

    let expected = expected_completion_percentage(status, &flags);
    let declared_pct = row.get(COL_COMPLETION_PERCENTAGE).and_then(Value::as_u64);
    if declared_pct != Some(expected as u64) {
        malformed(
            user_id,
            policy,
            COL_COMPLETION_PERCENTAGE,
            "must equal the percentage derived from the flags",
        )?;
    }

    let record = VerificationRecord {
        schema_version: VERIFICATION_CONTRACT_VERSION,
        user_id: user_id.clone(),
        flags,
        comprehensive_status: status,
        completed_at,
        completion_percentage: expected,
    };
    record.validate()?;
    Ok(record)
}

// Lenient fallback when the declared status is missing or contradicts the flags.
fn derive_status(flags: &VerificationFlags) -> VerificationStatus {
    if flags.verified_count() == 0 {
        VerificationStatus::NotStarted
    } else {
        VerificationStatus::InProgress
    }
}

fn malformed(
    user_id: &UserId,
    policy: DecodePolicy,
    field: &'static str,
    reason: &'static str,
) -> Result<(), StorageError> {
    match policy {
        DecodePolicy::Strict => Err(StorageError::MalformedRow { field, reason }),
        DecodePolicy::Lenient => {
            warn!(user_id = %user_id, field, reason, "defaulting malformed verification column");
            Ok(())
        }
    }
}
