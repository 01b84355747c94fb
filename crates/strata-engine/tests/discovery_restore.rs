//! Discovery, backup, restore, and account remapping.

mod common;

use common::*;
use secrecy::SecretString;
use std::collections::BTreeMap;
use strata_core::types::{FileEntry, VaultState};
use strata_core::StrataError;
use strata_engine::VaultService;

/// Fields discovery must reproduce exactly
fn shape(entry: &FileEntry) -> (String, String, u64, u64, Vec<(u32, String, String, String)>) {
    (
        entry.file_id.clone(),
        entry.name.clone(),
        entry.size,
        entry.created_at,
        entry
            .chunks
            .iter()
            .map(|c| {
                (
                    c.index,
                    c.account_id.clone(),
                    c.remote_object_id.clone(),
                    c.content_fingerprint.clone(),
                )
            })
            .collect(),
    )
}

#[tokio::test]
async fn discovery_rebuilds_the_registry_from_headers() {
    let tmp = tempfile::tempdir().unwrap();
    let op_a = memory_operator();
    let op_b = memory_operator();

    let (original, _) = unlocked_service(&tmp.path().join("original"), 300).await;
    original
        .connect_account(account_on(op_a.clone(), "acct-a", "a@example.com", MIB))
        .await;
    original
        .connect_account(account_on(op_b.clone(), "acct-b", "b@example.com", MIB))
        .await;
    let tagged = BTreeMap::from([("mime".to_string(), "text/plain".to_string())]);
    let mut uploaded = vec![
        original.upload_file(content(1_000, 1), "one.txt", tagged).await.unwrap(),
        original.upload_file(content(700, 2), "two.txt", BTreeMap::new()).await.unwrap(),
        original.upload_file(content(10, 3), "three.txt", BTreeMap::new()).await.unwrap(),
    ];
    uploaded.sort_by(|a, b| a.file_id.cmp(&b.file_id));
    let descriptor = original.export_vault_backup().await.unwrap();

    // a second device that only has the vault descriptor
    let device = VaultService::new(test_config(&tmp.path().join("device"), 300)).unwrap();
    let summary = device
        .complete_restoration(&descriptor, None, &password())
        .await
        .unwrap();
    assert!(summary.requires_discovery);
    assert_eq!(summary.files_restored, 0);

    // only account A reachable: groups spanning B stay pending
    device
        .connect_account(account_on(op_a.clone(), "acct-a", "a@example.com", MIB))
        .await;
    let first = device.refresh_discovery().await.unwrap();
    assert!(first.pending_groups > 0);
    let partial = device.list_files().await.unwrap().len();
    assert_eq!(partial, first.newly_discovered);

    device
        .connect_account(account_on(op_b, "acct-b", "b@example.com", MIB))
        .await;
    let second = device.refresh_discovery().await.unwrap();
    assert_eq!(first.newly_discovered + second.newly_discovered, 3);
    assert_eq!(second.pending_groups, 0);

    // re-running is a no-op
    let third = device.refresh_discovery().await.unwrap();
    assert_eq!(third.newly_discovered, 0);
    assert_eq!(third.scanned_objects, 0);

    let mut recovered: Vec<FileEntry> = device
        .list_files()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.entry)
        .collect();
    recovered.sort_by(|a, b| a.file_id.cmp(&b.file_id));
    assert!(recovered.iter().all(|e| e.discovered));
    // metadata is registry-only and does not survive a rebuild from headers
    assert!(uploaded.iter().any(|e| !e.metadata.is_empty()));
    assert!(recovered.iter().all(|e| e.metadata.is_empty()));
    assert_eq!(
        recovered.iter().map(shape).collect::<Vec<_>>(),
        uploaded.iter().map(shape).collect::<Vec<_>>()
    );

    for entry in &uploaded {
        assert_eq!(
            device.download_file(&entry.file_id).await.unwrap(),
            original.download_file(&entry.file_id).await.unwrap()
        );
    }
}

#[tokio::test]
async fn discovery_skips_foreign_objects() {
    let tmp = tempfile::tempdir().unwrap();
    let op = memory_operator();

    let (other_vault, _) = unlocked_service(&tmp.path().join("other"), 256).await;
    other_vault
        .connect_account(account_on(op.clone(), "shared", "s@example.com", MIB))
        .await;
    other_vault.upload_file(content(600, 4), "theirs", BTreeMap::new()).await.unwrap();

    let (mine, _) = unlocked_service(&tmp.path().join("mine"), 256).await;
    mine.connect_account(account_on(op, "shared", "s@example.com", MIB))
        .await;
    mine.upload_file(content(100, 5), "ours", BTreeMap::new()).await.unwrap();

    let report = mine.refresh_discovery().await.unwrap();
    assert_eq!(report.newly_discovered, 0);
    assert_eq!(report.scanned_objects, 3);
    assert_eq!(report.skipped_objects, 3);
    assert_eq!(mine.list_files().await.unwrap().len(), 1);
}

#[tokio::test]
async fn validate_password_has_no_side_effects() {
    let tmp = tempfile::tempdir().unwrap();
    let (source, _) = unlocked_service(&tmp.path().join("source"), 1024).await;
    let descriptor = source.export_vault_backup().await.unwrap();

    let target = VaultService::new(test_config(&tmp.path().join("target"), 1024)).unwrap();
    for _ in 0..3 {
        assert!(!target
            .validate_password(&descriptor, &SecretString::from("nope"))
            .await
            .unwrap());
    }
    assert!(target.validate_password(&descriptor, &password()).await.unwrap());
    assert_eq!(target.vault_status().await.state, VaultState::Uninitialized);
    assert!(!tmp.path().join("target/vault/vault.json").exists());

    let err = target
        .complete_restoration(&descriptor, None, &SecretString::from("nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, StrataError::InvalidPassword));
    assert_eq!(target.vault_status().await.state, VaultState::Uninitialized);
}

#[tokio::test]
async fn export_detect_and_restore_with_registry() {
    let tmp = tempfile::tempdir().unwrap();
    let op = memory_operator();
    let (source, _) = unlocked_service(tmp.path(), 512).await;
    source
        .connect_account(account_on(op.clone(), "acct-a", "a@example.com", MIB))
        .await;
    let data = content(1_500, 6);
    let entry = source.upload_file(data.clone(), "doc.txt", BTreeMap::new()).await.unwrap();
    source.upload_file(content(40, 7), "small.txt", BTreeMap::new()).await.unwrap();

    let (vault_path, registry_path) = source.export_to_dir(None).await.unwrap();
    let detected = source.detect_backups().unwrap();
    assert_eq!(detected.vault_backups.len(), 1);
    assert_eq!(detected.registry_backups.len(), 1);
    assert_eq!(detected.registry_backups[0].vault_id, detected.vault_backups[0].descriptor.vault_id);

    let descriptor = serde_json::from_slice(&std::fs::read(vault_path).unwrap()).unwrap();
    let blob = std::fs::read(registry_path).unwrap();
    let compat = source.check_compatibility(&descriptor, Some(&blob));
    assert!(compat.compatible, "{:?}", compat.issues);

    // wipe local state, then restore into the same directory
    source.clear_all_data().await.unwrap();
    assert_eq!(source.vault_status().await.state, VaultState::Uninitialized);

    let summary = source
        .complete_restoration(&descriptor, Some(&blob), &password())
        .await
        .unwrap();
    assert_eq!(summary.files_restored, 2);
    assert!(!summary.requires_discovery);
    assert!(source.vault_status().await.unlocked);
    assert_eq!(source.download_file(&entry.file_id).await.unwrap(), data);

    // importing the same registry again adds nothing
    assert_eq!(source.import_registry(&blob).await.unwrap(), 0);
}

#[tokio::test]
async fn import_registry_merges_missing_entries() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, _) = unlocked_service(tmp.path(), 512).await;
    service.connect_account(memory_account("acct-a", MIB)).await;
    let kept = service.upload_file(content(100, 1), "kept", BTreeMap::new()).await.unwrap();
    let blob = service.export_registry().await.unwrap();

    service.delete_file(&kept.file_id).await.unwrap();
    assert!(service.list_files().await.unwrap().is_empty());
    assert_eq!(service.import_registry(&blob).await.unwrap(), 1);
    assert_eq!(service.list_files().await.unwrap()[0].entry.file_id, kept.file_id);
}

#[tokio::test]
async fn registry_from_another_vault_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let (a, _) = unlocked_service(&tmp.path().join("a"), 512).await;
    let (b, _) = unlocked_service(&tmp.path().join("b"), 512).await;
    let blob = a.export_registry().await.unwrap();
    assert!(matches!(b.import_registry(&blob).await, Err(StrataError::Integrity(_))));

    let descriptor = b.export_vault_backup().await.unwrap();
    let compat = b.check_compatibility(&descriptor, Some(&blob));
    assert!(!compat.compatible);
    assert!(matches!(
        b.complete_restoration(&descriptor, Some(&blob), &password()).await,
        Err(StrataError::IncompatibleBackup(_))
    ));
}

#[tokio::test]
async fn fix_account_mapping_follows_identity() {
    let tmp = tempfile::tempdir().unwrap();
    let op = memory_operator();
    let (service, _) = unlocked_service(tmp.path(), 256).await;
    service
        .connect_account(account_on(op.clone(), "old-id", "alice@example.com", MIB))
        .await;
    service
        .connect_account(memory_account("unrelated", 100))
        .await;
    let data = content(900, 8);
    let entry = service.upload_file(data.clone(), "alice.txt", BTreeMap::new()).await.unwrap();
    assert!(entry.chunks.iter().all(|c| c.account_id == "old-id"));

    // same storage comes back under a new account id
    service.disconnect_account("old-id").await;
    service
        .connect_account(account_on(op, "new-id", "alice@example.com", MIB))
        .await;
    assert_eq!(service.analyze_missing_accounts().await.unwrap().accessible_files, 0);

    let report = service.fix_account_mapping().await.unwrap();
    assert_eq!(report.remapped_chunks, entry.chunks.len());
    assert!(report.unresolved_accounts.is_empty());
    assert_eq!(service.analyze_missing_accounts().await.unwrap().accessibility_percentage, 100.0);
    assert_eq!(service.download_file(&entry.file_id).await.unwrap(), data);
}

#[tokio::test]
async fn fix_account_mapping_never_guesses() {
    let tmp = tempfile::tempdir().unwrap();
    let op = memory_operator();
    let (service, _) = unlocked_service(tmp.path(), 256).await;
    service
        .connect_account(account_on(op.clone(), "old-id", "carol@example.com", MIB))
        .await;
    service.upload_file(content(300, 9), "carol.txt", BTreeMap::new()).await.unwrap();
    service.disconnect_account("old-id").await;

    // identity mismatch
    service
        .connect_account(account_on(op.clone(), "dave", "dave@example.com", MIB))
        .await;
    let report = service.fix_account_mapping().await.unwrap();
    assert_eq!(report.remapped_chunks, 0);
    assert_eq!(report.unresolved_accounts, vec!["old-id".to_string()]);

    // two candidates with the same identity
    service
        .connect_account(account_on(op.clone(), "carol-1", "carol@example.com", MIB))
        .await;
    service
        .connect_account(account_on(op, "carol-2", "carol@example.com", MIB))
        .await;
    let report = service.fix_account_mapping().await.unwrap();
    assert_eq!(report.remapped_chunks, 0);
    assert_eq!(report.unresolved_accounts, vec!["old-id".to_string()]);
}
