//! Vault lifecycle: create, unlock, lock
//!
//! ```text
//! Uninitialized --create--> Locked --unlock--> Unlocked --lock--> Locked
//! ```
//!
//! Every operation on an unlocked vault runs inside a [`Session`], an owned
//! read guard on the vault state. `lock` takes the write side, so it waits
//! for in-flight operations to finish and nothing can observe the key after
//! it is dropped.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use strata_core::types::{InitSummary, KdfParams, VaultState as VaultPhase, VaultStatus};
use strata_core::{StrataError, StrataResult};
use strata_crypto::{
    compute_verifier, derive_master_key, generate_salt, open_blob, seal_blob, verify, KeyRing,
    ID_SIZE, SALT_SIZE,
};
use tokio::sync::{Mutex, OwnedRwLockReadGuard, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::discovery::PendingGroups;
use crate::registry::FileRegistry;
use crate::store::{VaultHeader, VaultStore, VAULT_FORMAT_VERSION};
use crate::transfer::UploadTracker;
use crate::unix_now;

/// Key material and registry of an unlocked vault. Dropped (and zeroized) on lock.
pub struct UnlockedVault {
    header: VaultHeader,
    vault_id: [u8; ID_SIZE],
    keys: KeyRing,
    store: VaultStore,
    registry: Mutex<FileRegistry>,
    pub(crate) pending: Mutex<PendingGroups>,
    pub(crate) uploads: UploadTracker,
}

impl UnlockedVault {
    fn new(header: VaultHeader, keys: KeyRing, store: VaultStore, registry: FileRegistry) -> StrataResult<Self> {
        let vault_id = parse_id(&header.vault_id)?;
        Ok(Self {
            header,
            vault_id,
            keys,
            store,
            registry: Mutex::new(registry),
            pending: Mutex::new(PendingGroups::default()),
            uploads: UploadTracker::default(),
        })
    }

    pub fn header(&self) -> &VaultHeader {
        &self.header
    }

    pub fn keys(&self) -> &KeyRing {
        &self.keys
    }

    /// A point-in-time copy of the registry.
    pub async fn snapshot(&self) -> FileRegistry {
        self.registry.lock().await.clone()
    }

    /// Apply `f` to the registry under the writer lock.
    ///
    /// The change is applied to a copy and persisted before it replaces the
    /// live registry; if `f` or the write fails nothing changes.
    pub async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut FileRegistry) -> StrataResult<T>,
    ) -> StrataResult<T> {
        let mut guard = self.registry.lock().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        self.persist(&next)?;
        *guard = next;
        Ok(out)
    }

    pub fn seal_registry(&self, registry: &FileRegistry) -> StrataResult<Vec<u8>> {
        seal_blob(self.keys.registry_key(), &self.vault_id, &registry.to_bytes()?)
    }

    pub fn open_registry(&self, blob: &[u8]) -> StrataResult<FileRegistry> {
        open_registry_blob(&self.keys, &self.vault_id, blob)
    }

    fn persist(&self, registry: &FileRegistry) -> StrataResult<()> {
        let blob = self.seal_registry(registry)?;
        self.store.save_registry_blob(&blob)?;
        debug!(files = registry.len(), bytes = blob.len(), "registry persisted");
        Ok(())
    }
}

/// Lifecycle state guarded by the manager's lock
pub enum State {
    Uninitialized,
    Locked(VaultHeader),
    Unlocked(Box<UnlockedVault>),
}

/// Shared access to an unlocked vault for the duration of one operation.
pub type Session = OwnedRwLockReadGuard<State, UnlockedVault>;

pub struct VaultManager {
    store: VaultStore,
    state: Arc<RwLock<State>>,
    default_kdf: KdfParams,
}

impl VaultManager {
    /// Open the vault directory; an existing header puts the vault in `Locked`.
    pub fn open(store: VaultStore, default_kdf: KdfParams) -> StrataResult<Self> {
        let state = match store.load_header()? {
            Some(header) => State::Locked(header),
            None => State::Uninitialized,
        };
        Ok(Self {
            store,
            state: Arc::new(RwLock::new(state)),
            default_kdf,
        })
    }

    pub async fn session(&self) -> StrataResult<Session> {
        let guard = self.state.clone().read_owned().await;
        OwnedRwLockReadGuard::try_map(guard, |state| match state {
            State::Unlocked(vault) => Some(&**vault),
            _ => None,
        })
        .map_err(|guard| match &*guard {
            State::Uninitialized => StrataError::VaultNotInitialized,
            _ => StrataError::VaultLocked,
        })
    }

    pub async fn status(&self) -> VaultStatus {
        let state = self.state.read().await;
        match &*state {
            State::Uninitialized => VaultStatus {
                state: VaultPhase::Uninitialized,
                unlocked: false,
                vault_id: None,
            },
            State::Locked(h) => VaultStatus {
                state: VaultPhase::Locked,
                unlocked: false,
                vault_id: Some(h.vault_id.clone()),
            },
            State::Unlocked(v) => VaultStatus {
                state: VaultPhase::Unlocked,
                unlocked: true,
                vault_id: Some(v.header.vault_id.clone()),
            },
        }
    }

    /// The clear header of an initialized vault
    pub async fn header(&self) -> Option<VaultHeader> {
        match &*self.state.read().await {
            State::Uninitialized => None,
            State::Locked(h) => Some(h.clone()),
            State::Unlocked(v) => Some(v.header.clone()),
        }
    }

    /// Create a new vault. It starts `Locked`.
    pub async fn create(&self, password: &SecretString) -> StrataResult<InitSummary> {
        let mut state = self.state.write().await;
        if let Some(existing) = self.store.load_header()? {
            return Err(StrataError::VaultAlreadyExists {
                vault_id: existing.vault_id,
            });
        }

        let vault_uuid = Uuid::new_v4();
        let salt = generate_salt();
        let params = self.default_kdf;
        let keys = derive_keyring(password, salt, params).await?;
        let verifier = compute_verifier(keys.verifier_key(), vault_uuid.as_bytes());

        let header = VaultHeader {
            format_version: VAULT_FORMAT_VERSION,
            vault_id: vault_uuid.to_string(),
            salt: STANDARD.encode(salt),
            kdf_params: params,
            verifier: verifier.to_hex().to_string(),
            created_at: unix_now(),
        };

        let empty = FileRegistry::default();
        let blob = seal_blob(keys.registry_key(), vault_uuid.as_bytes(), &empty.to_bytes()?)?;
        self.store.save_registry_blob(&blob)?;
        self.store.save_header(&header)?;

        info!(vault_id = %header.vault_id, dir = %self.store.dir().display(), "vault created");
        let summary = InitSummary {
            vault_id: header.vault_id.clone(),
            salt: header.salt.clone(),
        };
        *state = State::Locked(header);
        Ok(summary)
    }

    /// Derive the key, check it against the verifier, and load the registry.
    ///
    /// Returns the number of files loaded. A wrong password or a salt that
    /// does not match the vault leaves the state untouched.
    pub async fn unlock(&self, password: &SecretString, salt_b64: &str) -> StrataResult<usize> {
        let header = match &*self.state.read().await {
            State::Uninitialized => return Err(StrataError::VaultNotInitialized),
            State::Locked(h) => h.clone(),
            State::Unlocked(v) => v.header.clone(),
        };
        if salt_b64.trim() != header.salt {
            warn!(vault_id = %header.vault_id, "unlock rejected: salt does not match vault");
            return Err(StrataError::InvalidPassword);
        }

        // KDF runs without holding the state lock
        let keys = match validate_header(&header, password).await? {
            Some(keys) => keys,
            None => {
                warn!(vault_id = %header.vault_id, "unlock rejected: wrong password");
                return Err(StrataError::InvalidPassword);
            }
        };

        let mut state = self.state.write().await;
        match &*state {
            State::Unlocked(v) if v.header == header => {
                return Ok(v.registry.lock().await.len());
            }
            State::Locked(h) if *h == header => {}
            _ => return Err(StrataError::VaultLocked),
        }

        let vault_id = parse_id(&header.vault_id)?;
        let registry = match self.store.load_registry_blob()? {
            Some(blob) => open_registry_blob(&keys, &vault_id, &blob)?,
            None => FileRegistry::default(),
        };
        let files = registry.len();
        let vault = UnlockedVault::new(header, keys, self.store.clone(), registry)?;
        info!(vault_id = %vault.header.vault_id, files, "vault unlocked");
        *state = State::Unlocked(Box::new(vault));
        Ok(files)
    }

    /// Drop the key and registry. Waits for in-flight sessions.
    ///
    /// Returns true if the vault was unlocked.
    pub async fn lock(&self) -> bool {
        let mut state = self.state.write().await;
        let header = match &*state {
            State::Unlocked(v) => v.header.clone(),
            _ => return false,
        };
        info!(vault_id = %header.vault_id, "vault locked");
        *state = State::Locked(header);
        true
    }

    /// Replace whatever vault is here with a restored one, leaving it unlocked.
    pub(crate) async fn install(
        &self,
        header: VaultHeader,
        keys: KeyRing,
        registry: FileRegistry,
    ) -> StrataResult<()> {
        let mut state = self.state.write().await;
        let vault = UnlockedVault::new(header.clone(), keys, self.store.clone(), registry)?;
        let snapshot = vault.registry.lock().await.clone();
        vault.persist(&snapshot)?;
        self.store.save_header(&header)?;
        info!(vault_id = %header.vault_id, files = snapshot.len(), "vault installed from backup");
        *state = State::Unlocked(Box::new(vault));
        Ok(())
    }

    /// Remove the local vault files and forget all state.
    pub async fn clear(&self) -> StrataResult<()> {
        let mut state = self.state.write().await;
        self.store.clear()?;
        *state = State::Uninitialized;
        warn!(dir = %self.store.dir().display(), "local vault data cleared");
        Ok(())
    }
}

/// Run Argon2id off the async runtime and expand the key hierarchy.
pub(crate) async fn derive_keyring(
    password: &SecretString,
    salt: [u8; SALT_SIZE],
    params: KdfParams,
) -> StrataResult<KeyRing> {
    let password = SecretString::from(password.expose_secret().to_owned());
    tokio::task::spawn_blocking(move || {
        let master = derive_master_key(&password, &salt, &params)?;
        KeyRing::new(master)
    })
    .await
    .map_err(|e| StrataError::Other(anyhow::anyhow!("KDF task failed: {e}")))?
}

/// Derive keys for `header` and check the verifier. `None` means wrong password.
pub(crate) async fn validate_header(
    header: &VaultHeader,
    password: &SecretString,
) -> StrataResult<Option<KeyRing>> {
    let salt = decode_salt(&header.salt)?;
    let vault_id = parse_id(&header.vault_id)?;
    let keys = derive_keyring(password, salt, header.kdf_params).await?;
    if verify(keys.verifier_key(), &vault_id, &header.verifier) {
        Ok(Some(keys))
    } else {
        Ok(None)
    }
}

pub(crate) fn open_registry_blob(
    keys: &KeyRing,
    vault_id: &[u8; ID_SIZE],
    blob: &[u8],
) -> StrataResult<FileRegistry> {
    let plain = open_blob(keys.registry_key(), vault_id, blob)?;
    FileRegistry::from_bytes(&plain)
}

pub(crate) fn decode_salt(salt_b64: &str) -> StrataResult<[u8; SALT_SIZE]> {
    let raw = STANDARD
        .decode(salt_b64.trim())
        .map_err(|e| StrataError::integrity(format!("salt is not base64: {e}")))?;
    raw.try_into()
        .map_err(|raw: Vec<u8>| StrataError::integrity(format!("salt must be {SALT_SIZE} bytes, got {}", raw.len())))
}

pub(crate) fn parse_id(id: &str) -> StrataResult<[u8; ID_SIZE]> {
    Uuid::parse_str(id)
        .map(|u| *u.as_bytes())
        .map_err(|e| StrataError::integrity(format!("invalid id {id:?}: {e}")))
}
