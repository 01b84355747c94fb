//! End-to-end tests of the vault service over in-memory accounts.

mod common;

use common::*;
use secrecy::SecretString;
use std::collections::BTreeMap;
use strata_core::types::{ChunkQuery, ChunkSortBy, SortOrder, VaultState};
use strata_core::{MissingPlacement, StrataError};
use strata_engine::{VaultEvent, VaultService};

#[tokio::test]
async fn unlock_requires_the_right_password() {
    let tmp = tempfile::tempdir().unwrap();
    let service = VaultService::new(test_config(tmp.path(), 1024)).unwrap();
    assert_eq!(service.vault_status().await.state, VaultState::Uninitialized);

    let init = service.initialize_vault(&password()).await.unwrap();
    assert!(!init.salt.is_empty());
    assert_eq!(service.vault_status().await.state, VaultState::Locked);

    let err = service
        .unlock_vault(&SecretString::from("wrong"), &init.salt)
        .await
        .unwrap_err();
    assert!(matches!(err, StrataError::InvalidPassword));
    assert_eq!(service.vault_status().await.state, VaultState::Locked);

    let summary = service.unlock_vault(&password(), &init.salt).await.unwrap();
    assert_eq!(summary.files_loaded, 0);
    assert!(service.vault_status().await.unlocked);
}

#[tokio::test]
async fn operations_need_an_unlocked_vault() {
    let tmp = tempfile::tempdir().unwrap();
    let service = VaultService::new(test_config(tmp.path(), 1024)).unwrap();
    assert!(matches!(
        service.list_files().await,
        Err(StrataError::VaultNotInitialized)
    ));

    service.initialize_vault(&password()).await.unwrap();
    assert!(matches!(service.list_files().await, Err(StrataError::VaultLocked)));
    assert!(matches!(
        service.upload_file(vec![1u8; 10], "a.bin", BTreeMap::new()).await,
        Err(StrataError::VaultLocked)
    ));
}

#[tokio::test]
async fn upload_download_delete_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, _) = unlocked_service(tmp.path(), 1000).await;
    let a = memory_account("acct-a", 100 * MIB);
    let b = memory_account("acct-b", 100 * MIB);
    service.connect_account(a.clone()).await;
    service.connect_account(b.clone()).await;

    let data = content(4_500, 7);
    let mut metadata = BTreeMap::new();
    metadata.insert("mime".to_string(), "application/octet-stream".to_string());
    let entry = service.upload_file(data.clone(), "report.pdf", metadata).await.unwrap();

    assert_eq!(entry.chunk_count, 5);
    assert_eq!(entry.size, 4_500);
    assert_eq!(entry.metadata["mime"], "application/octet-stream");
    assert!(!entry.discovered);
    let indices: Vec<u32> = entry.chunks.iter().map(|c| c.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    // equal accounts share the load
    assert!(entry.chunks.iter().any(|c| c.account_id == "acct-a"));
    assert!(entry.chunks.iter().any(|c| c.account_id == "acct-b"));

    let files = service.list_files().await.unwrap();
    assert_eq!(files.len(), 1);
    assert!(files[0].accessible);

    assert_eq!(service.download_file(&entry.file_id).await.unwrap(), data);

    let report = service.delete_file(&entry.file_id).await.unwrap();
    assert_eq!(report.deleted_chunks, 5);
    assert_eq!(report.orphaned_chunks, 0);
    assert!(service.list_files().await.unwrap().is_empty());
    assert!(matches!(
        service.download_file(&entry.file_id).await,
        Err(StrataError::FileNotFound(_))
    ));
    assert_eq!(service.storage_summary().await.unwrap().total_used, 0);
}

#[tokio::test]
async fn empty_file_has_one_chunk() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, _) = unlocked_service(tmp.path(), 1024).await;
    service.connect_account(memory_account("acct-a", MIB)).await;

    let entry = service.upload_file(Vec::new(), "empty", BTreeMap::new()).await.unwrap();
    assert_eq!(entry.chunk_count, 1);
    assert!(service.download_file(&entry.file_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn large_chunks_skip_the_small_account() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, _) = unlocked_service(tmp.path(), 4 * MIB as usize).await;
    service.connect_account(memory_account("small", 3 * MIB)).await;
    service.connect_account(memory_account("large", 20 * MIB)).await;

    let data = content(10 * MIB as usize, 3);
    let entry = service.upload_file(data.clone(), "video.mp4", BTreeMap::new()).await.unwrap();

    assert_eq!(entry.chunk_count, 3);
    assert_eq!(entry.chunks[0].account_id, "large");
    assert_eq!(entry.chunks[1].account_id, "large");
    // the 2 MiB tail fits the small account
    assert_eq!(entry.chunks[2].account_id, "small");
    for account in service.accounts().await {
        assert!(account.capacity_used <= account.capacity_total);
    }
    assert_eq!(service.download_file(&entry.file_id).await.unwrap(), data);
}

#[tokio::test]
async fn disconnected_account_makes_file_partially_unavailable() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, _) = unlocked_service(tmp.path(), 4 * MIB as usize).await;
    let small = memory_account("acct-b", 3 * MIB);
    service.connect_account(small.clone()).await;
    service.connect_account(memory_account("acct-a", 20 * MIB)).await;

    let entry = service
        .upload_file(content(10 * MIB as usize, 1), "f.bin", BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(entry.chunks[2].account_id, "acct-b");

    assert!(service.disconnect_account("acct-b").await);
    match service.download_file(&entry.file_id).await {
        Err(StrataError::PartialFileUnavailable { file_id, missing }) => {
            assert_eq!(file_id, entry.file_id);
            assert_eq!(
                missing,
                vec![MissingPlacement {
                    index: 2,
                    account_id: "acct-b".into()
                }]
            );
        }
        other => panic!("expected PartialFileUnavailable, got {other:?}"),
    }

    let files = service.list_files().await.unwrap();
    assert_eq!(files.len(), 1, "file must stay listed");
    assert!(!files[0].accessible);
    assert_eq!(files[0].missing_accounts, vec!["acct-b".to_string()]);

    let report = service.analyze_missing_accounts().await.unwrap();
    assert_eq!(report.total_files, 1);
    assert_eq!(report.accessibility_percentage, 0.0);
    assert_eq!(report.missing_accounts, vec!["acct-b".to_string()]);

    service.connect_account(small).await;
    let report = service.analyze_missing_accounts().await.unwrap();
    assert_eq!(report.accessibility_percentage, 100.0);
    assert!(service.download_file(&entry.file_id).await.is_ok());
}

#[tokio::test]
async fn registry_survives_lock_and_new_service() {
    let tmp = tempfile::tempdir().unwrap();
    let op = memory_operator();
    let (service, salt) = unlocked_service(tmp.path(), 512).await;
    service
        .connect_account(account_on(op.clone(), "acct-a", "a@example.com", MIB))
        .await;
    let data = content(2_000, 9);
    let entry = service.upload_file(data.clone(), "notes.txt", BTreeMap::new()).await.unwrap();

    assert!(service.lock_vault().await);
    assert!(matches!(service.list_files().await, Err(StrataError::VaultLocked)));
    drop(service);

    let reopened = VaultService::new(test_config(tmp.path(), 512)).unwrap();
    reopened
        .connect_account(account_on(op, "acct-a", "a@example.com", MIB))
        .await;
    let summary = reopened.unlock_vault(&password(), &salt).await.unwrap();
    assert_eq!(summary.files_loaded, 1);
    assert_eq!(summary.accounts_loaded, 1);
    assert_eq!(reopened.download_file(&entry.file_id).await.unwrap(), data);
}

#[tokio::test]
async fn events_are_pushed_to_subscribers() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, _) = unlocked_service(tmp.path(), 1024).await;
    let mut events = service.subscribe();

    service.connect_account(memory_account("acct-a", MIB)).await;
    let entry = service.upload_file(vec![5u8; 100], "x", BTreeMap::new()).await.unwrap();
    service.delete_file(&entry.file_id).await.unwrap();
    service.lock_vault().await;

    assert!(matches!(events.recv().await.unwrap(), VaultEvent::AccountAdded { account_id, .. } if account_id == "acct-a"));
    assert!(matches!(events.recv().await.unwrap(), VaultEvent::FileUploaded { chunk_count: 1, .. }));
    assert!(matches!(events.recv().await.unwrap(), VaultEvent::FileDeleted { orphaned_chunks: 0, .. }));
    assert_eq!(events.recv().await.unwrap(), VaultEvent::VaultLocked);
}

#[tokio::test]
async fn drive_listing_annotates_registered_chunks() {
    let tmp = tempfile::tempdir().unwrap();
    let (service, _) = unlocked_service(tmp.path(), 100).await;
    service.connect_account(memory_account("acct-a", MIB)).await;

    let entry = service.upload_file(content(250, 2), "photo.jpg", BTreeMap::new()).await.unwrap();

    let query = ChunkQuery {
        sort_by: ChunkSortBy::Size,
        order: SortOrder::Desc,
        limit: Some(2),
        search: Some("PHOTO".into()),
    };
    let chunks = service.list_chunks_for_account("acct-a", &query).await.unwrap();
    assert_eq!(chunks.len(), 2);
    assert!(chunks[0].size >= chunks[1].size);
    assert!(chunks.iter().all(|c| c.file_id.as_deref() == Some(entry.file_id.as_str())));

    let none = ChunkQuery {
        search: Some("no-such-file".into()),
        ..ChunkQuery::default()
    };
    assert!(service.list_chunks_for_account("acct-a", &none).await.unwrap().is_empty());

    let stats = service.get_account_stats("acct-a").await.unwrap();
    assert_eq!(stats.object_count, 3);
    assert_eq!(stats.registered_chunks, 3);
    assert_eq!(stats.files_touching, 1);
    assert_eq!(stats.stored_bytes, entry.encrypted_size());

    let raw = service
        .download_raw_chunk("acct-a", &entry.chunks[0].remote_object_id)
        .await
        .unwrap();
    assert_eq!(raw.len() as u64, entry.chunks[0].encrypted_size);

    service
        .delete_raw_chunk("acct-a", &entry.chunks[0].remote_object_id)
        .await
        .unwrap();
    assert!(matches!(
        service.download_file(&entry.file_id).await,
        Err(StrataError::ObjectNotFound { .. })
    ));
    assert!(matches!(
        service.get_account_stats("nope").await,
        Err(StrataError::AccountNotFound(_))
    ));
}
