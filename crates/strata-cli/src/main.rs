//! strata: encrypted chunk vault over several storage accounts
//!
//! Vault commands:
//!   init                 - create a vault (password from STRATA_PASSWORD or prompt)
//!   status               - vault state and account health
//!   config show          - display current configuration
//!
//! File commands:
//!   upload <path>        - encrypt, chunk, and spread a file over the accounts
//!   download <id> <out>  - fetch, verify, and reassemble a file
//!   list | delete <id>   - registry listing and removal
//!
//! Recovery commands:
//!   discover, export, restore, analyze, remap, purge

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use strata_core::config::StrataConfig;
use strata_core::types::{BackupDescriptor, ChunkQuery, ChunkSortBy, SortOrder};
use strata_engine::VaultService;
use strata_storage::{build_fs_operator, OpendalBackend};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "strata",
    version,
    about = "Encrypted file vault spread across storage accounts"
)]
struct Cli {
    /// Path to strata.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "STRATA_CONFIG",
        default_value = "~/.config/strata/config.toml"
    )]
    config: PathBuf,

    /// Vault password (prompted for when unset)
    #[arg(long, env = "STRATA_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    /// Log output format (text or json); overrides `logging.format`
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new vault
    Init,

    /// Show vault state and account health
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Upload a file into the vault
    Upload {
        path: PathBuf,
        /// Name to record (default: the file name)
        #[arg(long)]
        name: Option<String>,
        /// Extra metadata as key=value (repeatable)
        #[arg(long = "meta", value_parser = parse_key_val)]
        metadata: Vec<(String, String)>,
    },

    /// Download a file from the vault
    Download { file_id: String, out: PathBuf },

    /// List registered files
    List,

    /// Delete a file and its chunks
    Delete { file_id: String },

    /// Rebuild registry entries from chunks found on the accounts
    Discover,

    /// Per-account usage and registry coverage
    Accounts,

    /// Raw objects stored on one account
    Chunks {
        account: String,
        #[arg(long, value_enum, default_value_t = SortArg::Name)]
        sort: SortArg,
        #[arg(long)]
        desc: bool,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        search: Option<String>,
    },

    /// Write vault and registry backups
    Export {
        /// Target directory (default: vault.backup_dir)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Restore a vault from backups
    Restore {
        #[arg(long)]
        vault: PathBuf,
        #[arg(long)]
        registry: Option<PathBuf>,
    },

    /// Report files that reference disconnected accounts
    Analyze,

    /// Re-point chunks at connected accounts with the same identity
    Remap,

    /// Retry deletes of orphaned chunks
    Purge,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    Name,
    Size,
    Created,
}

impl From<SortArg> for ChunkSortBy {
    fn from(s: SortArg) -> Self {
        match s {
            SortArg::Name => ChunkSortBy::Name,
            SortArg::Size => ChunkSortBy::Size,
            SortArg::Created => ChunkSortBy::Created,
        }
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {s:?}"))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = load_config(&config_path)?;
    let log_format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    init_logging(&config.logging.level, log_format);
    if !config_path.exists() {
        tracing::warn!(config = %config_path.display(), "config file not found, using defaults");
    }
    tracing::debug!(config = %config_path.display(), accounts = config.accounts.len(), "configuration loaded");

    if let Commands::Config {
        action: ConfigAction::Show,
    } = cli.command
    {
        return cmd_config_show(&config, &config_path);
    }

    let passwords = Passwords {
        from_env: cli.password,
    };
    let service = open_service(config).await?;

    match cli.command {
        Commands::Init => cmd_init(&service, &passwords).await,
        Commands::Status => cmd_status(&service).await,
        Commands::Config { .. } => Ok(()),
        Commands::Upload {
            path,
            name,
            metadata,
        } => {
            unlock(&service, &passwords).await?;
            cmd_upload(&service, &path, name, metadata).await
        }
        Commands::Download { file_id, out } => {
            unlock(&service, &passwords).await?;
            cmd_download(&service, &file_id, &out).await
        }
        Commands::List => {
            unlock(&service, &passwords).await?;
            cmd_list(&service).await
        }
        Commands::Delete { file_id } => {
            unlock(&service, &passwords).await?;
            cmd_delete(&service, &file_id).await
        }
        Commands::Discover => {
            unlock(&service, &passwords).await?;
            cmd_discover(&service).await
        }
        Commands::Accounts => {
            unlock(&service, &passwords).await?;
            cmd_accounts(&service).await
        }
        Commands::Chunks {
            account,
            sort,
            desc,
            limit,
            search,
        } => {
            unlock(&service, &passwords).await?;
            let query = ChunkQuery {
                sort_by: sort.into(),
                order: if desc { SortOrder::Desc } else { SortOrder::Asc },
                limit,
                search,
            };
            cmd_chunks(&service, &account, &query).await
        }
        Commands::Export { dir } => {
            unlock(&service, &passwords).await?;
            cmd_export(&service, dir.as_deref()).await
        }
        Commands::Restore { vault, registry } => {
            cmd_restore(&service, &passwords, &vault, registry.as_deref()).await
        }
        Commands::Analyze => {
            unlock(&service, &passwords).await?;
            cmd_analyze(&service).await
        }
        Commands::Remap => {
            unlock(&service, &passwords).await?;
            cmd_remap(&service).await
        }
        Commands::Purge => {
            unlock(&service, &passwords).await?;
            let purged = service.purge_orphans().await?;
            println!("purged {purged} orphaned chunk(s)");
            Ok(())
        }
    }
}

// ── Config, logging, and setup ────────────────────────────────────────────────

fn load_config(path: &Path) -> Result<StrataConfig> {
    if path.exists() {
        StrataConfig::load(path).with_context(|| format!("loading config: {}", path.display()))
    } else {
        Ok(StrataConfig::default())
    }
}

fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // logs go to stderr; stdout carries command output
    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => PathBuf::from(std::env::var("HOME").unwrap_or_default()).join(rest),
        None => path.to_path_buf(),
    }
}

/// Build the service and connect every configured directory account.
async fn open_service(mut config: StrataConfig) -> Result<VaultService> {
    config.vault.dir = expand_tilde(&config.vault.dir);
    config.vault.backup_dir = expand_tilde(&config.vault.backup_dir);
    for account in &mut config.accounts {
        account.root = expand_tilde(&account.root);
    }

    let accounts = config.accounts.clone();
    let service = VaultService::new(config).context("opening vault")?;
    for account in accounts {
        std::fs::create_dir_all(&account.root)
            .with_context(|| format!("creating account root: {}", account.root.display()))?;
        let op = build_fs_operator(&account.root)
            .with_context(|| format!("opening account {}", account.account_id))?;
        let identity = account
            .identity
            .clone()
            .unwrap_or_else(|| account.account_id.clone());
        service
            .connect_account(Arc::new(OpendalBackend::new(
                op,
                account.account_id.clone(),
                identity,
                account.capacity_bytes,
            )))
            .await;
    }
    Ok(service)
}

struct Passwords {
    from_env: Option<String>,
}

impl Passwords {
    fn get(&self, confirm: bool) -> Result<SecretString> {
        if let Some(pw) = &self.from_env {
            return Ok(SecretString::from(pw.clone()));
        }
        let pw = rpassword::prompt_password("Vault password: ").context("reading password")?;
        if confirm {
            let again = rpassword::prompt_password("Repeat password: ").context("reading password")?;
            if again != pw {
                anyhow::bail!("passwords do not match");
            }
        }
        Ok(SecretString::from(pw))
    }
}

async fn unlock(service: &VaultService, passwords: &Passwords) -> Result<()> {
    let descriptor = service
        .export_vault_backup()
        .await
        .context("no vault here; run `strata init` or `strata restore` first")?;
    let password = passwords.get(false)?;
    service
        .unlock_vault(&password, &descriptor.salt)
        .await
        .context("unlocking vault")?;
    Ok(())
}

// ── Progress and formatting helpers ───────────────────────────────────────────

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn fmt_bytes(n: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

// ── `strata init` / `strata status` / `strata config show` ────────────────────

async fn cmd_init(service: &VaultService, passwords: &Passwords) -> Result<()> {
    let password = passwords.get(true)?;
    let init = service.initialize_vault(&password).await?;
    println!("vault created: {}", init.vault_id);
    println!("salt:          {}", init.salt);
    println!("dir:           {}", service.config().vault.dir.display());
    Ok(())
}

async fn cmd_status(service: &VaultService) -> Result<()> {
    let status = service.vault_status().await;
    println!("vault:    {:?}", status.state);
    if let Some(id) = &status.vault_id {
        println!("id:       {id}");
    }
    println!("dir:      {}", service.config().vault.dir.display());

    let health = service.check_health().await;
    let snapshots = service.accounts().await;
    println!();
    println!("accounts: {}", health.len());
    for h in &health {
        let usage = snapshots
            .iter()
            .find(|s| s.account_id == h.account_id)
            .map(|s| format!("{} / {}", fmt_bytes(s.capacity_used), fmt_bytes(s.capacity_total)))
            .unwrap_or_else(|| "-".to_string());
        match &h.error {
            None => println!("  {:<20} ok   {:>5} ms  {usage}", h.account_id, h.latency_ms),
            Some(e) => println!("  {:<20} FAIL {e}", h.account_id),
        }
    }
    Ok(())
}

fn cmd_config_show(config: &StrataConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── File commands ─────────────────────────────────────────────────────────────

async fn cmd_upload(
    service: &VaultService,
    path: &Path,
    name: Option<String>,
    metadata: Vec<(String, String)>,
) -> Result<()> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let name = name.unwrap_or_else(|| {
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unnamed".to_string())
    });
    let metadata: BTreeMap<String, String> = metadata.into_iter().collect();

    let pb = make_spinner("upload");
    pb.set_message(format!("{name} ({})", fmt_bytes(data.len() as u64)));
    let result = service.upload_file(data, &name, metadata).await;
    pb.finish_and_clear();
    let entry = result?;

    println!("{}  {}  {} chunk(s)", entry.file_id, entry.name, entry.chunk_count);
    Ok(())
}

async fn cmd_download(service: &VaultService, file_id: &str, out: &Path) -> Result<()> {
    let pb = make_spinner("download");
    pb.set_message(file_id.to_string());
    let result = service.download_file(file_id).await;
    pb.finish_and_clear();
    let data = result?;

    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(out, &data)
        .await
        .with_context(|| format!("writing {}", out.display()))?;
    println!("{} → {} ({})", file_id, out.display(), fmt_bytes(data.len() as u64));
    Ok(())
}

async fn cmd_list(service: &VaultService) -> Result<()> {
    let files = service.list_files().await?;
    if files.is_empty() {
        println!("no files");
        return Ok(());
    }
    for f in files {
        let flag = if f.accessible {
            String::new()
        } else {
            format!("  [missing: {}]", f.missing_accounts.join(", "))
        };
        let origin = if f.entry.discovered { "  (discovered)" } else { "" };
        println!(
            "{}  {:>10}  {:>3} chunk(s)  {}{origin}{flag}",
            f.entry.file_id,
            fmt_bytes(f.entry.size),
            f.entry.chunk_count,
            f.entry.name
        );
    }
    Ok(())
}

async fn cmd_delete(service: &VaultService, file_id: &str) -> Result<()> {
    let report = service.delete_file(file_id).await?;
    println!(
        "deleted {file_id}: {} chunk(s) removed, {} orphaned",
        report.deleted_chunks, report.orphaned_chunks
    );
    if report.orphaned_chunks > 0 {
        println!("run `strata purge` later to retry the orphaned deletes");
    }
    Ok(())
}

// ── Recovery commands ─────────────────────────────────────────────────────────

async fn cmd_discover(service: &VaultService) -> Result<()> {
    let pb = make_spinner("discover");
    let result = service.refresh_discovery().await;
    pb.finish_and_clear();
    let report = result?;
    println!(
        "discovered {} file(s); {} pending, {} object(s) scanned, {} skipped",
        report.newly_discovered, report.pending_groups, report.scanned_objects, report.skipped_objects
    );
    for account in report.failed_accounts {
        println!("  could not list {account}");
    }
    Ok(())
}

async fn cmd_accounts(service: &VaultService) -> Result<()> {
    for snapshot in service.accounts().await {
        let stats = service.get_account_stats(&snapshot.account_id).await?;
        println!(
            "{:<20} {:<24} {:>10} / {:<10} {:>5} object(s)  {:>5} registered  {} file(s)",
            stats.account_id,
            stats.identity,
            fmt_bytes(stats.capacity_used),
            fmt_bytes(stats.capacity_total),
            stats.object_count,
            stats.registered_chunks,
            stats.files_touching
        );
    }
    Ok(())
}

async fn cmd_chunks(service: &VaultService, account: &str, query: &ChunkQuery) -> Result<()> {
    let chunks = service.list_chunks_for_account(account, query).await?;
    for c in chunks {
        let owner = match (&c.file_name, c.chunk_index) {
            (Some(name), Some(index)) => format!("{name} #{index}"),
            _ => "(unregistered)".to_string(),
        };
        println!("{:<50} {:>10}  {owner}", c.name, fmt_bytes(c.size));
    }
    Ok(())
}

async fn cmd_export(service: &VaultService, dir: Option<&Path>) -> Result<()> {
    let dir = dir.map(expand_tilde);
    let (vault, registry) = service.export_to_dir(dir.as_deref()).await?;
    println!("vault backup:    {}", vault.display());
    println!("registry backup: {}", registry.display());
    Ok(())
}

async fn cmd_restore(
    service: &VaultService,
    passwords: &Passwords,
    vault: &Path,
    registry: Option<&Path>,
) -> Result<()> {
    let raw = std::fs::read(vault).with_context(|| format!("reading {}", vault.display()))?;
    let descriptor: BackupDescriptor =
        serde_json::from_slice(&raw).with_context(|| format!("parsing {}", vault.display()))?;
    let blob = registry
        .map(|p| std::fs::read(p).with_context(|| format!("reading {}", p.display())))
        .transpose()?;

    let compat = service.check_compatibility(&descriptor, blob.as_deref());
    if !compat.compatible {
        anyhow::bail!("backup is not usable:\n  {}", compat.issues.join("\n  "));
    }
    let password = passwords.get(false)?;
    if !service.validate_password(&descriptor, &password).await? {
        anyhow::bail!("password does not match this backup");
    }

    let summary = service
        .complete_restoration(&descriptor, blob.as_deref(), &password)
        .await?;
    println!(
        "restored vault {}: {} file(s), {} chunk(s)",
        summary.vault_id, summary.files_restored, summary.chunks_restored
    );
    if summary.requires_discovery {
        cmd_discover(service).await?;
    }
    Ok(())
}

async fn cmd_analyze(service: &VaultService) -> Result<()> {
    let report = service.analyze_missing_accounts().await?;
    println!(
        "{}/{} file(s) accessible ({:.1}%)",
        report.accessible_files, report.total_files, report.accessibility_percentage
    );
    if !report.missing_accounts.is_empty() {
        println!("missing accounts: {}", report.missing_accounts.join(", "));
    }
    for f in report.inaccessible_files {
        println!("  {}  {}  needs {}", f.file_id, f.name, f.missing_accounts.join(", "));
    }
    Ok(())
}

async fn cmd_remap(service: &VaultService) -> Result<()> {
    let report = service.fix_account_mapping().await?;
    println!("remapped {} chunk(s)", report.remapped_chunks);
    if !report.unresolved_accounts.is_empty() {
        println!("no unique match for: {}", report.unresolved_accounts.join(", "));
    }
    Ok(())
}
