//! Command-line interface for myday.
//!
//! Provides commands for recording entries, running sync passes, watching
//! in the background, and inspecting or adjusting upload state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::entry_store::is_cancellable;
use crate::adapters::{
    EntryStore, FileKeyValueStore, HttpTransfer, KeyValueStore, LocalEntryStore, MyDayApiClient,
};
use crate::config::{self, paths, ResolvedConfig};
use crate::core::{EngineParts, SyncEngine, UploadItemStore};
use crate::domain::{Entry, EntryId, EntryStatus};

/// How often due retries are redispatched between sync passes
const RETRY_TICK: Duration = Duration::from_secs(5);

/// Slack on top of the request timeout when draining transfers at exit
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// myday - Durable upload and sync for My Day audio entries
#[derive(Parser, Debug)]
#[command(name = "myday")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register a finished recording as a queued entry
    Record {
        /// Audio file
        file: PathBuf,

        /// Recording length in seconds
        #[arg(short, long, default_value = "0")]
        duration: f64,

        /// Spoken language (e.g. "en")
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Run one sync pass
    Sync {
        /// Keep retrying pending uploads for up to this many seconds
        #[arg(short, long)]
        wait: Option<u64>,
    },

    /// Sync periodically until interrupted
    Watch {
        /// Seconds between sync passes (defaults to sync.interval_secs)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Show entries and pending uploads
    Status,

    /// Re-enqueue a failed entry
    Retry {
        /// Entry ID (UUID)
        entry_id: String,
    },

    /// Cancel an entry's pending upload
    Cancel {
        /// Entry ID (UUID)
        entry_id: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let cfg = config::config()?;

        match self.command {
            Commands::Record {
                file,
                duration,
                language,
            } => record(cfg, &file, duration, language).await,
            Commands::Sync { wait } => sync_once(cfg, wait.map(Duration::from_secs)).await,
            Commands::Watch { interval } => {
                let interval = interval
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| cfg.sync.interval());
                watch(cfg, interval).await
            }
            Commands::Status => show_status(cfg).await,
            Commands::Retry { entry_id } => retry_entry(cfg, &entry_id).await,
            Commands::Cancel { entry_id } => cancel_entry(cfg, &entry_id).await,
            Commands::Config => show_config(cfg),
        }
    }
}

/// Everything a command needs to drive the engine
struct Host {
    store: Arc<LocalEntryStore>,
    engine: SyncEngine,
}

async fn open_store(cfg: &ResolvedConfig) -> Result<Arc<LocalEntryStore>> {
    let path = paths::entries_file_in(&cfg.home);
    let store = LocalEntryStore::open(&path)
        .await
        .with_context(|| format!("Failed to open entry store: {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn open_kv(cfg: &ResolvedConfig) -> Result<Arc<FileKeyValueStore>> {
    let dir = paths::state_dir_in(&cfg.home);
    let kv = FileKeyValueStore::open(&dir)
        .await
        .with_context(|| format!("Failed to open state directory: {}", dir.display()))?;
    Ok(Arc::new(kv))
}

async fn open_host(cfg: &ResolvedConfig) -> Result<Host> {
    let store = open_store(cfg).await?;
    let kv = open_kv(cfg).await?;

    let (completions_tx, completions) = mpsc::unbounded_channel();
    let transfer = HttpTransfer::new(cfg.upload.request_timeout(), completions_tx)
        .context("Failed to build HTTP client")?;
    let remote = MyDayApiClient::new(cfg.api.to_api_config());

    let engine = SyncEngine::start(EngineParts {
        policy: cfg.upload.backoff(),
        kv,
        store: store.clone(),
        remote: Arc::new(remote),
        transfer: Arc::new(transfer),
        completions,
    })
    .await
    .context("Failed to start sync engine")?;

    Ok(Host { store, engine })
}

fn parse_entry_id(raw: &str) -> Result<EntryId> {
    Uuid::parse_str(raw).with_context(|| format!("Invalid entry ID: {}", raw))
}

/// Register a recording
async fn record(
    cfg: &ResolvedConfig,
    file: &Path,
    duration: f64,
    language: Option<String>,
) -> Result<()> {
    let file = file
        .canonicalize()
        .with_context(|| format!("Audio file not found: {}", file.display()))?;
    let size = tokio::fs::metadata(&file)
        .await
        .with_context(|| format!("Failed to read audio file: {}", file.display()))?
        .len();

    let mut entry = Entry::new(file, duration, size);
    if let Some(language) = language {
        entry = entry.with_language(language);
    }
    let id = entry.id;

    let store = open_store(cfg).await?;
    store.insert(entry).await?;

    println!("Recorded entry {}", id);
    println!("  Size: {} bytes", size);
    println!("Run `myday sync` to upload it.");
    Ok(())
}

/// One sync pass, optionally waiting for uploads to settle
async fn sync_once(cfg: &ResolvedConfig, wait: Option<Duration>) -> Result<()> {
    let host = open_host(cfg).await?;
    let sync = host.engine.sync().clone();

    let fetched = sync.perform_sync().await?;
    println!("Sync complete: {} remote entries merged", fetched.len());

    if let Some(wait) = wait {
        let deadline = Instant::now() + wait;
        while !uploads_settled(&host).await? && Instant::now() < deadline {
            time::sleep(Duration::from_secs(1)).await;
            host.engine.coordinator().resume_pending_uploads().await?;
        }

        let remaining = host.engine.queue().items().await.len();
        if remaining > 0 {
            println!("{} upload(s) still pending", remaining);
        } else {
            println!("All uploads settled");
        }
    }

    // Exiting aborts running transfers, so let the started attempts finish
    let in_flight = host.engine.queue().in_flight_count().await;
    if in_flight > 0 {
        println!("Waiting for {} upload(s) to finish...", in_flight);
        if !host.engine.wait_until_idle(drain_timeout(cfg)).await {
            println!("Some uploads did not finish; they will be retried on the next sync");
        }
    }

    host.engine.shutdown();
    Ok(())
}

/// Upper bound on waiting for started transfers before exiting
fn drain_timeout(cfg: &ResolvedConfig) -> Duration {
    cfg.upload.request_timeout() + DRAIN_GRACE
}

/// True once nothing is resident and no entry is still mid-upload locally
async fn uploads_settled(host: &Host) -> Result<bool> {
    if !host.engine.queue().items().await.is_empty() {
        return Ok(false);
    }
    let uploading = host
        .store
        .pending_entries()
        .await?
        .iter()
        .any(|e| e.status == EntryStatus::Uploading);
    Ok(!uploading)
}

/// Periodic sync until Ctrl-C
async fn watch(cfg: &ResolvedConfig, interval: Duration) -> Result<()> {
    let host = open_host(cfg).await?;
    let sync = host.engine.sync().clone();
    let coordinator = host.engine.coordinator().clone();

    let mut sync_tick = time::interval(interval.max(Duration::from_secs(1)));
    sync_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut retry_tick = time::interval(RETRY_TICK);
    retry_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval_secs = interval.as_secs(), "Watching for changes (Ctrl-C to stop)");

    loop {
        tokio::select! {
            _ = sync_tick.tick() => {
                match sync.perform_sync().await {
                    Ok(fetched) => info!(fetched = fetched.len(), "Sync pass finished"),
                    Err(e) => warn!(error = %e, "Sync pass failed"),
                }
            }
            _ = retry_tick.tick() => {
                if let Err(e) = coordinator.resume_pending_uploads().await {
                    warn!(error = %e, "Failed to resume pending uploads");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping");
                break;
            }
        }
    }

    host.engine.shutdown();
    Ok(())
}

/// Show entries grouped by status plus resident upload items
async fn show_status(cfg: &ResolvedConfig) -> Result<()> {
    let store = open_store(cfg).await?;
    let kv: Arc<dyn KeyValueStore> = open_kv(cfg).await?;
    let items = UploadItemStore::load(kv)
        .await
        .context("Failed to load upload items")?;

    let entries = store.list().await;
    if entries.is_empty() {
        println!("No entries found");
    } else {
        let mut by_status: BTreeMap<&'static str, Vec<&Entry>> = BTreeMap::new();
        for entry in &entries {
            by_status.entry(entry.status.as_str()).or_default().push(entry);
        }

        for status in EntryStatus::ALL {
            let Some(group) = by_status.get(status.as_str()) else {
                continue;
            };
            println!("{} ({})", status, group.len());
            for entry in group {
                let detail = entry.failure_reason.as_deref().unwrap_or("");
                println!("  {}  {}  {}", entry.id, entry.created_at.format("%Y-%m-%d %H:%M"), detail);
            }
        }
    }

    println!();
    if items.is_empty() {
        println!("No pending uploads");
    } else {
        println!("{:<38} {:<8} {:<25}", "ENTRY ID", "ATTEMPT", "NEXT RETRY");
        println!("{}", "-".repeat(73));
        for item in items.iter() {
            let next = item
                .next_retry_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "now".to_string());
            println!("{:<38} {:<8} {:<25}", item.entry_id, item.attempt, next);
        }
    }

    Ok(())
}

/// Re-enqueue a failed entry
async fn retry_entry(cfg: &ResolvedConfig, raw_id: &str) -> Result<()> {
    let id = parse_entry_id(raw_id)?;
    let store = open_store(cfg).await?;

    let entry = store
        .requeue(id)
        .await
        .with_context(|| format!("Cannot retry entry {}", id))?;

    println!("Entry {} is {} again", entry.id, entry.status);
    Ok(())
}

/// Cancel an entry's upload and mark it failed so sync does not resubmit it
async fn cancel_entry(cfg: &ResolvedConfig, raw_id: &str) -> Result<()> {
    let id = parse_entry_id(raw_id)?;
    let host = open_host(cfg).await?;

    let entry = host
        .store
        .get(id)
        .await
        .with_context(|| format!("Entry not found: {}", id))?;
    if !is_cancellable(entry.status) {
        anyhow::bail!(
            "Cannot cancel entry {}: it is {}, and only entries being uploaded or processed can be cancelled",
            id,
            entry.status
        );
    }

    let removed = host.engine.coordinator().cancel_upload(id).await?;
    host.store
        .mark_cancelled(id)
        .await
        .with_context(|| format!("Cannot cancel entry {}", id))?;

    println!("Cancelled {} upload(s) for entry {}", removed, id);
    host.engine.shutdown();
    Ok(())
}

/// Show resolved configuration
fn show_config(cfg: &ResolvedConfig) -> Result<()> {
    println!("myday configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:    {}", cfg.home.display());
    println!("  Entries: {}", paths::entries_file_in(&cfg.home).display());
    println!("  State:   {}", paths::state_dir_in(&cfg.home).display());
    println!();
    println!("API:");
    println!("  Base URL: {}", cfg.api.base_url);
    println!(
        "  Token:    {}",
        if cfg.api.token.is_some() { "(set)" } else { "(none)" }
    );
    println!();
    println!("Upload:");
    println!("  Initial delay:   {}s", cfg.upload.initial_delay_secs);
    println!("  Multiplier:      {}", cfg.upload.multiplier);
    println!("  Max delay:       {}s", cfg.upload.max_delay_secs);
    println!("  Max attempts:    {}", cfg.upload.max_attempts);
    println!("  Request timeout: {}s", cfg.upload.request_timeout_secs);
    println!();
    println!("Sync:");
    println!("  Interval: {}s", cfg.sync.interval_secs);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sync_with_wait() {
        let cli = Cli::parse_from(["myday", "sync", "--wait", "30"]);
        assert!(matches!(cli.command, Commands::Sync { wait: Some(30) }));
    }

    #[test]
    fn test_parse_entry_id_rejects_garbage() {
        assert!(parse_entry_id("not-a-uuid").is_err());
        assert!(parse_entry_id("6f1c2f9e-2a55-4c1b-9d0e-3c1e9b7a4d10").is_ok());
    }
}
