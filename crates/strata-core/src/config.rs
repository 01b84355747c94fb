use crate::error::{StrataError, StrataResult};
use crate::types::KdfParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration (loaded from strata.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub vault: VaultConfig,
    pub chunking: ChunkingConfig,
    pub crypto: CryptoConfig,
    pub transfer: TransferConfig,
    pub logging: LoggingConfig,
    /// Directory-backed accounts used by the CLI adapter
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Directory holding vault.json and registry.bin
    pub dir: PathBuf,
    /// Where exported vault/registry backups are written and detected
    pub backup_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Plaintext chunk size in bytes (default: 4 MiB)
    pub chunk_size: usize,
}

/// Argon2id parameters applied to newly created vaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Parallel chunk transfers per file (default: 4)
    pub concurrency: usize,
    /// Per-call backend timeout in seconds
    pub io_timeout_secs: u64,
    /// Retries after the first attempt for transient failures
    pub max_retries: u32,
    /// First backoff delay; doubled on every retry
    pub retry_base_delay_ms: u64,
    /// Delete attempts per chunk before it is recorded as orphaned
    pub delete_retry_budget: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub account_id: String,
    /// Stable identifier used for remapping; defaults to the account id
    #[serde(default)]
    pub identity: Option<String>,
    /// Root directory for this account's objects
    pub root: PathBuf,
    /// Capacity advertised to the planner
    pub capacity_bytes: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("~/.local/share/strata/vault"),
            backup_dir: PathBuf::from("~/.local/share/strata/backups"),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4 * 1024 * 1024,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        let params = KdfParams::default();
        Self {
            argon2_mem_cost_kib: params.mem_cost_kib,
            argon2_time_cost: params.time_cost,
            argon2_parallelism: params.parallelism,
        }
    }
}

impl CryptoConfig {
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            mem_cost_kib: self.argon2_mem_cost_kib,
            time_cost: self.argon2_time_cost,
            parallelism: self.argon2_parallelism,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            io_timeout_secs: 60,
            max_retries: 3,
            retry_base_delay_ms: 250,
            delete_retry_budget: 3,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl StrataConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> StrataResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: StrataConfig = toml::from_str(&raw)
            .map_err(|e| StrataError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> StrataResult<()> {
        if self.chunking.chunk_size == 0 {
            return Err(StrataError::Config("chunking.chunk_size must be > 0".into()));
        }
        if self.transfer.concurrency == 0 {
            return Err(StrataError::Config("transfer.concurrency must be > 0".into()));
        }
        let c = &self.crypto;
        if c.argon2_time_cost == 0 {
            return Err(StrataError::Config("crypto.argon2_time_cost must be >= 1".into()));
        }
        if c.argon2_parallelism == 0 || c.argon2_parallelism > 64 {
            return Err(StrataError::Config(
                "crypto.argon2_parallelism must be in 1..=64".into(),
            ));
        }
        // argon2 requires at least 8 KiB per lane
        if c.argon2_mem_cost_kib < 8 * c.argon2_parallelism {
            return Err(StrataError::Config(format!(
                "crypto.argon2_mem_cost_kib must be >= {}",
                8 * c.argon2_parallelism
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for account in &self.accounts {
            if !seen.insert(account.account_id.as_str()) {
                return Err(StrataError::Config(format!(
                    "duplicate account id: {}",
                    account.account_id
                )));
            }
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            tracing::warn!(format = %self.logging.format, "unknown log format, using text");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[vault]
dir = "/tmp/strata/vault"
backup_dir = "/tmp/strata/backups"

[chunking]
chunk_size = 1048576

[crypto]
argon2_mem_cost_kib = 131072
argon2_time_cost = 4
argon2_parallelism = 8

[transfer]
concurrency = 8
io_timeout_secs = 10
max_retries = 5

[logging]
level = "debug"
format = "json"

[[accounts]]
account_id = "drive-a"
identity = "alice@example.com"
root = "/srv/drive-a"
capacity_bytes = 15000000000

[[accounts]]
account_id = "drive-b"
root = "/srv/drive-b"
capacity_bytes = 1000
"#;
        let config: StrataConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.vault.dir, PathBuf::from("/tmp/strata/vault"));
        assert_eq!(config.chunking.chunk_size, 1048576);
        assert_eq!(config.crypto.kdf_params().mem_cost_kib, 131072);
        assert_eq!(config.transfer.concurrency, 8);
        assert_eq!(config.transfer.retry_base_delay_ms, 250);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.accounts[0].identity.as_deref(), Some("alice@example.com"));
        assert!(config.accounts[1].identity.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_defaults() {
        let config: StrataConfig = toml::from_str("").unwrap();

        assert_eq!(config.chunking.chunk_size, 4 * 1024 * 1024);
        assert_eq!(config.crypto.argon2_mem_cost_kib, 65536);
        assert_eq!(config.crypto.argon2_time_cost, 3);
        assert_eq!(config.transfer.concurrency, 4);
        assert_eq!(config.logging.level, "info");
        assert!(config.accounts.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = StrataConfig::default();
        config.chunking.chunk_size = 0;
        assert!(matches!(config.validate(), Err(StrataError::Config(_))));

        let mut config = StrataConfig::default();
        config.transfer.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = StrataConfig::default();
        config.crypto.argon2_mem_cost_kib = 16;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_accounts() {
        let mut config = StrataConfig::default();
        for _ in 0..2 {
            config.accounts.push(AccountConfig {
                account_id: "same".into(),
                identity: None,
                root: PathBuf::from("/tmp/x"),
                capacity_bytes: 1,
            });
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "[chunking]\nchunk_size = 4096\n").unwrap();
        let config = StrataConfig::load(&path).unwrap();
        assert_eq!(config.chunking.chunk_size, 4096);

        std::fs::write(&path, "[chunking]\nchunk_size = \"big\"\n").unwrap();
        assert!(matches!(
            StrataConfig::load(&path),
            Err(StrataError::Config(_))
        ));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = StrataConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: StrataConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.vault.dir, parsed.vault.dir);
        assert_eq!(config.chunking.chunk_size, parsed.chunking.chunk_size);
    }
}
