#![forbid(unsafe_code)]

use serde_json::json;
use tenancy_kernel_contracts::identity::UserId;
use tenancy_kernel_contracts::verification::{
    CheckKey, VerificationFlags, VerificationPatch, VerificationRecord, VerificationStatus,
};
use tenancy_kernel_contracts::UnixTimeMs;
use tenancy_storage::{DecodePolicy, InMemoryVerificationStore, StorageError, VerificationStore};

fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

#[tokio::test]
async fn at_verif_db_01_full_completion_is_idempotent() {
    let s = InMemoryVerificationStore::new(DecodePolicy::Strict);
    let u = user("tenant_sync");

    let once = s
        .update(&u, VerificationPatch::full_completion(UnixTimeMs(1_000)))
        .await
        .unwrap();
    let twice = s
        .update(&u, VerificationPatch::full_completion(UnixTimeMs(2_000)))
        .await
        .unwrap();

    assert_eq!(once, twice);
    assert_eq!(twice.completed_at, Some(UnixTimeMs(1_000)));
    assert_eq!(twice.completion_percentage, 100);
    assert_eq!(s.fetch(&u).await.unwrap(), Some(once));
}

#[tokio::test]
async fn at_verif_db_02_flags_are_sticky_across_writers() {
    let s = InMemoryVerificationStore::new(DecodePolicy::Strict);
    let u = user("tenant_sticky");
    s.update(&u, VerificationPatch::mark_verified(CheckKey::Identity))
        .await
        .unwrap();

    let mut lower = VerificationPatch::mark_verified(CheckKey::Credit);
    lower.set_flag(CheckKey::Identity, false);
    let rec = s.update(&u, lower).await.unwrap();

    assert!(rec.flags.identity);
    assert!(rec.flags.credit);
    assert_eq!(rec.completion_percentage, 33);
}

#[tokio::test]
async fn at_verif_db_03_terminal_verified_rejects_regression() {
    let s = InMemoryVerificationStore::new(DecodePolicy::Strict);
    let u = user("tenant_terminal");
    s.update(&u, VerificationPatch::full_completion(UnixTimeMs(5)))
        .await
        .unwrap();

    let regress = VerificationPatch {
        comprehensive_status: Some(VerificationStatus::Failed),
        ..VerificationPatch::default()
    };
    assert!(matches!(
        s.update(&u, regress).await,
        Err(StorageError::ContractViolation(_))
    ));
    assert!(s.fetch(&u).await.unwrap().unwrap().is_verified());
}

#[tokio::test]
async fn at_verif_db_04_strict_store_surfaces_malformed_rows() {
    let s = InMemoryVerificationStore::new(DecodePolicy::Strict);
    let u = user("tenant_malformed");
    s.insert_raw_row(u.clone(), json!({ "identity_verified": 1 }))
        .unwrap();
    assert!(matches!(
        s.fetch(&u).await,
        Err(StorageError::MalformedRow { .. })
    ));
    assert!(s.update(&u, VerificationPatch::default()).await.is_err());
}

#[tokio::test]
async fn at_verif_db_05_lenient_store_repairs_on_write() {
    let s = InMemoryVerificationStore::new(DecodePolicy::Lenient);
    let u = user("tenant_repair");
    s.insert_raw_row(
        u.clone(),
        json!({ "employment_verified": true, "verification_completion_percentage": 90 }),
    )
    .unwrap();

    let rec = s
        .update(&u, VerificationPatch::mark_verified(CheckKey::Bank))
        .await
        .unwrap();
    assert_eq!(rec.completion_percentage, 33);

    let raw = s.raw_row(&u).unwrap().unwrap();
    assert_eq!(raw["verification_completion_percentage"], 33);
    assert_eq!(raw["comprehensive_verification_status"], "in_progress");
}

#[tokio::test]
async fn at_verif_db_06_put_record_roundtrips_through_the_row_codec() {
    let s = InMemoryVerificationStore::new(DecodePolicy::Strict);
    let u = user("tenant_put");
    let mut flags = VerificationFlags::default();
    flags.set(CheckKey::References, true);
    let rec =
        VerificationRecord::v1(u.clone(), flags, VerificationStatus::InProgress, None).unwrap();
    s.put_record(&rec).unwrap();
    assert_eq!(s.fetch(&u).await.unwrap(), Some(rec));
    assert_eq!(s.update_calls(), 0);
}
