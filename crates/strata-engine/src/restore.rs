//! Backup export/detection, restore, and account remediation

use secrecy::SecretString;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use strata_core::types::{
    AccessibilityReport, BackupDescriptor, CompatibilityReport, DetectedBackups, InaccessibleFile,
    RegistryBackupInfo, RemapReport, RestorationSummary, VaultBackupInfo,
};
use strata_core::{StrataError, StrataResult};
use strata_crypto::peek_blob_vault_id;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::registry::FileRegistry;
use crate::store::{atomic_write, VaultHeader, VAULT_FORMAT_VERSION};
use crate::vault::{decode_salt, open_registry_blob, parse_id, validate_header, UnlockedVault, VaultManager};

const VAULT_BACKUP_SUFFIX: &str = ".vault.json";
const REGISTRY_BACKUP_SUFFIX: &str = ".registry";

/// Check a password against a backup without touching any vault state.
pub async fn validate_password(descriptor: &BackupDescriptor, password: &SecretString) -> StrataResult<bool> {
    let header = VaultHeader::from_descriptor(descriptor);
    Ok(validate_header(&header, password).await?.is_some())
}

/// Structural checks on a backup pair. Does not need the password.
pub fn check_compatibility(descriptor: &BackupDescriptor, registry_blob: Option<&[u8]>) -> CompatibilityReport {
    let mut issues = Vec::new();

    if descriptor.format_version != VAULT_FORMAT_VERSION {
        issues.push(format!(
            "vault format version {} is not supported (expected {VAULT_FORMAT_VERSION})",
            descriptor.format_version
        ));
    }
    let vault_id = match parse_id(&descriptor.vault_id) {
        Ok(id) => Some(id),
        Err(e) => {
            issues.push(e.to_string());
            None
        }
    };
    if let Err(e) = decode_salt(&descriptor.salt) {
        issues.push(e.to_string());
    }
    if descriptor.verifier.len() != 64 || !descriptor.verifier.bytes().all(|b| b.is_ascii_hexdigit()) {
        issues.push("verifier is not a 64-character hex digest".to_string());
    }
    let kdf = &descriptor.kdf_params;
    if kdf.time_cost == 0 || kdf.parallelism == 0 || kdf.mem_cost_kib < 8 * kdf.parallelism {
        issues.push(format!(
            "invalid KDF parameters (m={} KiB, t={}, p={})",
            kdf.mem_cost_kib, kdf.time_cost, kdf.parallelism
        ));
    }

    if let Some(blob) = registry_blob {
        match peek_blob_vault_id(blob) {
            Ok(blob_id) if Some(blob_id) == vault_id => {}
            Ok(blob_id) => issues.push(format!(
                "registry backup belongs to vault {}, not {}",
                Uuid::from_bytes(blob_id),
                descriptor.vault_id
            )),
            Err(e) => issues.push(format!("registry backup unreadable: {e}")),
        }
    }

    CompatibilityReport {
        compatible: issues.is_empty(),
        issues,
    }
}

/// Re-initialize `manager` from a backup and leave it unlocked.
///
/// Without a registry backup the vault starts empty and discovery has to
/// rebuild the file list from the accounts.
pub async fn complete_restoration(
    manager: &VaultManager,
    descriptor: &BackupDescriptor,
    registry_blob: Option<&[u8]>,
    password: &SecretString,
) -> StrataResult<RestorationSummary> {
    let report = check_compatibility(descriptor, registry_blob);
    if !report.compatible {
        return Err(StrataError::IncompatibleBackup(report.issues));
    }

    let header = VaultHeader::from_descriptor(descriptor);
    let keys = validate_header(&header, password)
        .await?
        .ok_or(StrataError::InvalidPassword)?;

    let registry = match registry_blob {
        Some(blob) => open_registry_blob(&keys, &parse_id(&header.vault_id)?, blob)?,
        None => FileRegistry::default(),
    };
    let summary = RestorationSummary {
        vault_id: header.vault_id.clone(),
        files_restored: registry.len(),
        chunks_restored: registry.chunk_count(),
        requires_discovery: registry_blob.is_none(),
    };

    manager.install(header, keys, registry).await?;
    info!(
        vault_id = %summary.vault_id,
        files = summary.files_restored,
        chunks = summary.chunks_restored,
        "vault restored"
    );
    Ok(summary)
}

/// Write `<vault_id>.vault.json` and `<vault_id>-<ts>.registry` into `dir`.
pub fn write_backups(
    dir: &Path,
    descriptor: &BackupDescriptor,
    registry_blob: &[u8],
) -> StrataResult<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)?;
    let vault_path = dir.join(format!("{}{VAULT_BACKUP_SUFFIX}", descriptor.vault_id));
    let registry_path = dir.join(format!(
        "{}-{}{REGISTRY_BACKUP_SUFFIX}",
        descriptor.vault_id, descriptor.exported_at
    ));
    atomic_write(&vault_path, &serde_json::to_vec_pretty(descriptor)?)?;
    atomic_write(&registry_path, registry_blob)?;
    info!(vault = %vault_path.display(), registry = %registry_path.display(), "backups written");
    Ok((vault_path, registry_path))
}

fn modified_secs(meta: &std::fs::Metadata) -> Option<u64> {
    meta.modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs())
}

/// Scan `dir` for vault and registry backups. A missing directory yields
/// nothing; unreadable files are skipped.
pub fn detect_backups(dir: &Path) -> StrataResult<DetectedBackups> {
    let mut found = DetectedBackups::default();
    if !dir.is_dir() {
        return Ok(found);
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if name.ends_with(VAULT_BACKUP_SUFFIX) {
            match std::fs::read(&path)
                .map_err(StrataError::from)
                .and_then(|raw| Ok(serde_json::from_slice::<BackupDescriptor>(&raw)?))
            {
                Ok(descriptor) => found.vault_backups.push(VaultBackupInfo {
                    path: path.display().to_string(),
                    descriptor,
                }),
                Err(e) => debug!(path = %path.display(), error = %e, "not a vault backup"),
            }
        } else if name.ends_with(REGISTRY_BACKUP_SUFFIX) {
            let raw = match std::fs::read(&path) {
                Ok(raw) => raw,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "registry backup unreadable");
                    continue;
                }
            };
            match peek_blob_vault_id(&raw) {
                Ok(id) => found.registry_backups.push(RegistryBackupInfo {
                    path: path.display().to_string(),
                    vault_id: Uuid::from_bytes(id).to_string(),
                    size: raw.len() as u64,
                    modified: entry.metadata().ok().as_ref().and_then(modified_secs),
                }),
                Err(e) => debug!(path = %path.display(), error = %e, "not a registry backup"),
            }
        }
    }

    found.vault_backups.sort_by(|a, b| a.path.cmp(&b.path));
    // newest first
    found
        .registry_backups
        .sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
    Ok(found)
}

/// Which files can be fully downloaded with the accounts in `connected`.
pub fn analyze_missing_accounts(registry: &FileRegistry, connected: &HashSet<String>) -> AccessibilityReport {
    let mut missing_accounts = BTreeSet::new();
    let mut inaccessible_files = Vec::new();

    let files = registry.list();
    for file in &files {
        let missing: BTreeSet<String> = file
            .chunks
            .iter()
            .filter(|c| !connected.contains(&c.account_id))
            .map(|c| c.account_id.clone())
            .collect();
        if !missing.is_empty() {
            missing_accounts.extend(missing.iter().cloned());
            inaccessible_files.push(InaccessibleFile {
                file_id: file.file_id.clone(),
                name: file.name.clone(),
                missing_accounts: missing.into_iter().collect(),
            });
        }
    }

    let total_files = files.len();
    let accessible_files = total_files - inaccessible_files.len();
    let accessibility_percentage = if total_files == 0 {
        100.0
    } else {
        accessible_files as f64 / total_files as f64 * 100.0
    };

    AccessibilityReport {
        total_files,
        accessible_files,
        missing_accounts: missing_accounts.into_iter().collect(),
        inaccessible_files,
        accessibility_percentage,
    }
}

/// Point chunk records at live accounts by identity.
///
/// `connected` maps account id to identity. A record on a disconnected
/// account moves only when exactly one connected account carries the same
/// non-empty identity; anything ambiguous is left alone and reported.
pub async fn fix_account_mapping(
    vault: &UnlockedVault,
    connected: &BTreeMap<String, String>,
) -> StrataResult<RemapReport> {
    let mut by_identity: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (account_id, identity) in connected {
        if !identity.is_empty() {
            by_identity.entry(identity.as_str()).or_default().push(account_id.as_str());
        }
    }

    let mut unresolved = BTreeSet::new();
    let remapped = vault
        .mutate(|registry| {
            Ok(registry.remap_accounts(|record| {
                if connected.contains_key(&record.account_id) {
                    return None;
                }
                match by_identity.get(record.account_identity.as_str()) {
                    Some(ids) if ids.len() == 1 && !record.account_identity.is_empty() => {
                        Some(ids[0].to_string())
                    }
                    Some(ids) if !record.account_identity.is_empty() => {
                        warn!(
                            account = %record.account_id,
                            identity = %record.account_identity,
                            candidates = ids.len(),
                            "ambiguous identity, not remapping"
                        );
                        unresolved.insert(record.account_id.clone());
                        None
                    }
                    _ => {
                        unresolved.insert(record.account_id.clone());
                        None
                    }
                }
            }))
        })
        .await?;

    info!(remapped, unresolved = unresolved.len(), "account mapping fixed");
    Ok(RemapReport {
        remapped_chunks: remapped,
        unresolved_accounts: unresolved.into_iter().collect(),
    })
}
