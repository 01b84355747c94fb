//! Per-account introspection: raw object listings, stats, raw chunk access

use std::collections::{HashMap, HashSet};
use strata_core::types::{AccountStats, ChunkQuery, ChunkSortBy, RemoteChunkInfo, SortOrder};
use strata_core::{StrataError, StrataResult};
use strata_storage::{RetryPolicy, SharedBackend};
use tracing::{info, warn};

use crate::accounts::AccountPool;
use crate::registry::FileRegistry;

async fn backend(pool: &AccountPool, account_id: &str) -> StrataResult<SharedBackend> {
    pool.get(account_id)
        .await
        .ok_or_else(|| StrataError::AccountNotFound(account_id.to_string()))
}

fn matches(info: &RemoteChunkInfo, needle: &str) -> bool {
    info.name.to_lowercase().contains(needle)
        || info
            .file_name
            .as_deref()
            .is_some_and(|n| n.to_lowercase().contains(needle))
}

/// List the raw objects on an account, annotated with the registry file
/// (if any) each one belongs to.
pub async fn list_chunks_for_account(
    registry: &FileRegistry,
    pool: &AccountPool,
    retry: &RetryPolicy,
    account_id: &str,
    query: &ChunkQuery,
) -> StrataResult<Vec<RemoteChunkInfo>> {
    let backend = backend(pool, account_id).await?;
    let objects = retry.run(account_id, "list", || backend.list()).await?;

    let owners: HashMap<&str, (&str, &str, u32)> = registry
        .list()
        .into_iter()
        .flat_map(|f| {
            f.chunks
                .iter()
                .filter(move |c| c.account_id == account_id)
                .map(move |c| (c.remote_object_id.as_str(), (f.file_id.as_str(), f.name.as_str(), c.index)))
        })
        .collect();

    let needle = query.search.as_deref().map(str::to_lowercase);
    let mut chunks: Vec<RemoteChunkInfo> = objects
        .into_iter()
        .map(|o| {
            let owner = owners.get(o.remote_object_id.as_str());
            RemoteChunkInfo {
                file_id: owner.map(|(id, _, _)| id.to_string()),
                file_name: owner.map(|(_, name, _)| name.to_string()),
                chunk_index: owner.map(|(_, _, index)| *index),
                remote_object_id: o.remote_object_id,
                name: o.name,
                size: o.size,
                created_time: o.created_time,
            }
        })
        .filter(|info| needle.as_deref().map_or(true, |n| matches(info, n)))
        .collect();

    chunks.sort_by(|a, b| {
        let ord = match query.sort_by {
            ChunkSortBy::Name => a.name.cmp(&b.name),
            ChunkSortBy::Size => a.size.cmp(&b.size),
            ChunkSortBy::Created => a.created_time.cmp(&b.created_time),
        }
        .then_with(|| a.remote_object_id.cmp(&b.remote_object_id));
        match query.order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });
    if let Some(limit) = query.limit {
        chunks.truncate(limit);
    }
    Ok(chunks)
}

pub async fn get_account_stats(
    registry: &FileRegistry,
    pool: &AccountPool,
    retry: &RetryPolicy,
    account_id: &str,
) -> StrataResult<AccountStats> {
    let backend = backend(pool, account_id).await?;
    let snapshot = retry.run(account_id, "capacity", || backend.snapshot()).await?;
    let objects = retry.run(account_id, "list", || backend.list()).await?;

    let ours: HashSet<&str> = registry
        .list()
        .into_iter()
        .flat_map(|f| f.chunks.iter())
        .filter(|c| c.account_id == account_id)
        .map(|c| c.remote_object_id.as_str())
        .collect();
    let files_touching = registry
        .list()
        .into_iter()
        .filter(|f| f.chunks.iter().any(|c| c.account_id == account_id))
        .count();

    Ok(AccountStats {
        account_id: snapshot.account_id,
        identity: snapshot.identity,
        capacity_total: snapshot.capacity_total,
        capacity_used: snapshot.capacity_used,
        object_count: objects.len(),
        stored_bytes: objects.iter().map(|o| o.size).sum(),
        registered_chunks: objects
            .iter()
            .filter(|o| ours.contains(o.remote_object_id.as_str()))
            .count(),
        files_touching,
    })
}

/// The stored bytes of one object, still encrypted.
pub async fn download_raw_chunk(
    pool: &AccountPool,
    retry: &RetryPolicy,
    account_id: &str,
    remote_object_id: &str,
) -> StrataResult<Vec<u8>> {
    let backend = backend(pool, account_id).await?;
    retry
        .run(account_id, "download", || backend.download(remote_object_id))
        .await
}

/// Delete one object. Deleting a chunk the registry still references is
/// allowed but leaves that file unrecoverable.
pub async fn delete_raw_chunk(
    registry: &FileRegistry,
    pool: &AccountPool,
    retry: &RetryPolicy,
    account_id: &str,
    remote_object_id: &str,
) -> StrataResult<()> {
    let backend = backend(pool, account_id).await?;
    if let Some((file, chunk)) = registry.find_object(account_id, remote_object_id) {
        warn!(
            account = %account_id,
            object = %remote_object_id,
            file_id = %file.file_id,
            index = chunk.index,
            "deleting a chunk that is still registered"
        );
    }
    retry
        .run(account_id, "delete", || backend.delete(remote_object_id))
        .await?;
    info!(account = %account_id, object = %remote_object_id, "raw chunk deleted");
    Ok(())
}
