/*
* Command Line Interface
* ----------------------
* @project: cluster-lifecycle-manager
*
* The offline half of the toolbox: everything you can answer from a config
* dump, an inventory dump or the local state files, without talking to a
* cluster.
*
* cluster-lifecycle-manager
* ├── inspect <config.json>            what's in this guest config
* ├── preflight <config.json>          would a migration of it be refused
* ├── health                           score a set of averages
* ├── intersect <inventory.json>...    storages/bridges every cluster has
* ├── replication
* │   ├── add                          store a new job definition
* │   ├── list
* │   └── due                          which jobs should run now
* ├── history [--limit]                recent migrations, newest first
* └── init [--force]                   write $CONFIG_PATH/default.json
*
* Global: -c/--config <file> loads one file instead of the CONFIG_PATH layers.
*/

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::cluster::models::{BridgeSource, ClusterId, ClusterInventory, GuestType, RawConfig};
use crate::config::settings::{config_dir, generate_default_config, Settings};
use crate::core::health::{score_weighted, ClusterHealth};
use crate::core::inspector::{inspect, ConfigFinding};
use crate::core::intersection::intersect;
use crate::core::preflight::PreflightValidator;
use crate::history::MigrationHistory;
use crate::replication::{ReplicationJob, ReplicationStore, DEFAULT_SCHEDULE};

#[derive(Parser)]
#[command(name = "cluster-lifecycle-manager")]
#[command(about = "Node membership and guest migration toolbox", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, value_name = "CONFIG", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect a guest configuration dump
    Inspect { file: PathBuf },
    /// Run preflight checks against a guest configuration dump
    Preflight {
        file: PathBuf,
        #[arg(short, long, value_enum, default_value_t = GuestKind::Vm)]
        guest_type: GuestKind,
        /// Request a live migration
        #[arg(short, long)]
        live: bool,
        /// Acknowledge a live migration of large disks
        #[arg(short, long)]
        force: bool,
    },
    /// Compute a health score
    Health {
        #[arg(long, default_value_t = 0.0)]
        cpu: f64,
        #[arg(long, default_value_t = 0.0)]
        mem: f64,
        #[arg(long, default_value_t = 0.0)]
        storage: f64,
        #[arg(long, default_value_t = 0.0)]
        offline_ratio: f64,
        #[arg(long)]
        disconnected: bool,
        /// Score a cluster inventory dump instead of raw averages
        #[arg(long, conflicts_with_all = ["cpu", "mem", "storage", "offline_ratio"])]
        inventory: Option<PathBuf>,
    },
    /// Storages and bridges common to every inventory dump
    Intersect {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Manage replication job definitions
    Replication {
        #[command(subcommand)]
        command: ReplicationCommands,
    },
    /// Show recent migrations
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Generate default configuration
    Init {
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum ReplicationCommands {
    /// Store a new job
    Add {
        #[arg(long)]
        source: String,
        #[arg(long)]
        guest_id: u32,
        #[arg(long, value_enum, default_value_t = GuestKind::Vm)]
        guest_type: GuestKind,
        #[arg(long)]
        target: String,
        #[arg(long)]
        storage: String,
        #[arg(long, default_value = "vmbr0")]
        bridge: String,
        #[arg(long, default_value = DEFAULT_SCHEDULE)]
        schedule: String,
        #[arg(long, default_value_t = 3)]
        retention: u32,
    },
    /// List stored jobs
    List,
    /// Jobs that should run now
    Due {
        /// Last run of a job, as JOB_ID=RFC3339; repeatable
        #[arg(long = "last-run", value_parser = parse_last_run)]
        last_runs: Vec<(Uuid, DateTime<Utc>)>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum GuestKind {
    Vm,
    Container,
}

impl From<GuestKind> for GuestType {
    fn from(kind: GuestKind) -> Self {
        match kind {
            GuestKind::Vm => GuestType::Vm,
            GuestKind::Container => GuestType::Container,
        }
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::new_from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Settings::new().unwrap_or_else(|e| {
            eprintln!("{} {e}; using built-in defaults", "!".yellow());
            Settings::default()
        }),
    };
    init_tracing(&settings);

    match cli.command {
        Commands::Inspect { file } => handle_inspect(&file)?,
        Commands::Preflight {
            file,
            guest_type,
            live,
            force,
        } => handle_preflight(&file, guest_type.into(), live, force, &settings)?,
        Commands::Health {
            cpu,
            mem,
            storage,
            offline_ratio,
            disconnected,
            inventory,
        } => handle_health(cpu, mem, storage, offline_ratio, disconnected, inventory, &settings)?,
        Commands::Intersect { files } => handle_intersect(&files)?,
        Commands::Replication { command } => handle_replication_command(command, &settings).await?,
        Commands::History { limit } => handle_history(limit, &settings).await?,
        Commands::Init { force } => handle_init_command(&config_dir(), force)?,
    }

    Ok(())
}

/// RUST_LOG wins; otherwise the configured level.
pub fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    // a second init (tests) is not an error worth reporting
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Guest config dumps come straight from the API, so values may be numbers.
pub fn load_raw_config(path: &Path) -> Result<RawConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    let Some(object) = value.as_object() else {
        bail!("{} is not a JSON object", path.display());
    };

    Ok(object
        .iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect())
}

fn load_inventory(path: &Path) -> Result<ClusterInventory> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing inventory {}", path.display()))
}

fn handle_inspect(file: &Path) -> Result<()> {
    let finding = inspect(&load_raw_config(file)?);
    print_finding(&finding);
    Ok(())
}

fn print_finding(finding: &ConfigFinding) {
    println!("{}", "Configuration:".bold());
    println!("- total disk size: {:.1} GB", finding.total_disk_gb);
    if finding.has_local_disks {
        println!("- local disks: {}", finding.local_disks.join(", ").yellow());
    } else {
        println!("- local disks: {}", "none".green());
    }
    for media in &finding.removable_media {
        let note = if media.local_only {
            "local only".yellow()
        } else {
            "portable".green()
        };
        println!("- {}: {} ({})", media.device, media.media, note);
    }
    if !finding.boot_defects.is_empty() {
        println!(
            "- boot order references missing devices: {}",
            finding.boot_defects.join(", ").yellow()
        );
    }
}

fn handle_preflight(
    file: &Path,
    guest_type: GuestType,
    live: bool,
    force: bool,
    settings: &Settings,
) -> Result<()> {
    let finding = inspect(&load_raw_config(file)?);
    let result = PreflightValidator::new(settings.preflight.large_disk_threshold_gb)
        .acknowledge_large_online(force)
        .validate(&finding, guest_type, live);

    print_finding(&finding);
    println!("{}", "Preflight:".bold());
    let mode = if result.online { "online" } else { "offline" };
    println!("- mode: {mode}");
    if result.downgraded_to_offline {
        println!("- {}", "containers cannot migrate live, using offline".yellow());
    }
    for warning in &result.warnings {
        println!("{} {}", "!".yellow(), warning);
    }
    for block in &result.blocks {
        println!("{} {}", "✗".red(), block);
    }
    if result.is_blocked() {
        println!("{}", "Migration would be refused".red());
    } else {
        println!("{} Migration may proceed", "✓".green());
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn handle_health(
    cpu: f64,
    mem: f64,
    storage: f64,
    offline_ratio: f64,
    disconnected: bool,
    inventory: Option<PathBuf>,
    settings: &Settings,
) -> Result<()> {
    let weights = settings.health_weights();
    let score = match inventory {
        Some(path) => {
            let inventory = load_inventory(&path)?;
            let health = ClusterHealth::from_nodes(&inventory.nodes, !disconnected);
            println!(
                "{} online, {} offline",
                health.nodes_online, health.nodes_offline
            );
            health.score(&weights)
        }
        None => score_weighted(&weights, cpu, mem, storage, offline_ratio, !disconnected),
    };

    let painted = match score {
        70..=100 => score.to_string().green(),
        40..=69 => score.to_string().yellow(),
        _ => score.to_string().red(),
    };
    println!("Health score: {painted}");
    Ok(())
}

fn handle_intersect(files: &[PathBuf]) -> Result<()> {
    let inventories = files
        .iter()
        .map(|f| load_inventory(f))
        .collect::<Result<Vec<_>>>()?;

    let storages: Vec<_> = inventories.iter().map(|i| i.storages.clone()).collect();
    let bridges: Vec<_> = inventories.iter().map(|i| i.bridges.clone()).collect();
    let common = intersect(&storages, &bridges);

    println!("{}", "Common storages:".bold());
    if common.storages.is_empty() {
        println!("- {}", "none".red());
    }
    for storage in &common.storages {
        let shared = if storage.shared { " shared" } else { "" };
        println!("- {} ({}{})", storage.name, storage.kind, shared);
    }

    println!("{}", "Common bridges:".bold());
    if common.bridges.is_empty() {
        println!("- {}", "none".red());
    }
    for (source, bridges) in common.bridges_by_source() {
        let label = match source {
            BridgeSource::Local => "local",
            BridgeSource::Sdn => "sdn",
        };
        let names: Vec<&str> = bridges.iter().map(|b| b.name.as_str()).collect();
        println!("- {}: {}", label, names.join(", "));
    }
    Ok(())
}

async fn handle_replication_command(command: ReplicationCommands, settings: &Settings) -> Result<()> {
    let store = ReplicationStore::in_dir(&settings.storage.data_dir);

    match command {
        ReplicationCommands::Add {
            source,
            guest_id,
            guest_type,
            target,
            storage,
            bridge,
            schedule,
            retention,
        } => {
            let job = ReplicationJob::new(
                ClusterId::new(source),
                guest_id,
                guest_type.into(),
                ClusterId::new(target),
                storage,
                bridge,
                schedule,
                retention,
            )?;
            store.append(&job).await?;
            println!(
                "{} Replication job {} stored (every {} min)",
                "✓".green(),
                job.id,
                job.interval().num_minutes()
            );
        }
        ReplicationCommands::List => {
            println!("{}", "Replication jobs:".bold());
            for job in store.jobs().await? {
                let state = if job.enabled {
                    "enabled".green()
                } else {
                    "disabled".red()
                };
                println!(
                    "- {} {}/{} {} -> {} [{} / {}] '{}' keep {} ({})",
                    job.id,
                    job.guest_type,
                    job.guest_id,
                    job.source_cluster,
                    job.target_cluster,
                    job.target_storage,
                    job.target_bridge,
                    job.schedule,
                    job.retention,
                    state
                );
            }
        }
        ReplicationCommands::Due { last_runs } => {
            let last_runs: HashMap<Uuid, DateTime<Utc>> = last_runs.into_iter().collect();
            let due = store.due_jobs(&last_runs, Utc::now()).await?;
            info!(due = due.len(), "Replication jobs due");
            if due.is_empty() {
                println!("Nothing due");
            }
            for job in due {
                println!("- {} {}/{} -> {}", job.id, job.guest_type, job.guest_id, job.target_cluster);
            }
        }
    }

    Ok(())
}

fn parse_last_run(raw: &str) -> Result<(Uuid, DateTime<Utc>), String> {
    let (id, at) = raw
        .split_once('=')
        .ok_or_else(|| "expected JOB_ID=RFC3339".to_string())?;
    let id = Uuid::parse_str(id.trim()).map_err(|e| e.to_string())?;
    let at = DateTime::parse_from_rfc3339(at.trim())
        .map_err(|e| e.to_string())?
        .with_timezone(&Utc);
    Ok((id, at))
}

async fn handle_history(limit: usize, settings: &Settings) -> Result<()> {
    let history = MigrationHistory::in_dir(&settings.storage.data_dir);
    let entries = history.recent(limit).await?;

    println!("{}", "Migration history:".bold());
    if entries.is_empty() {
        println!("- nothing recorded in {}", history.path().display());
    }
    for entry in entries {
        let outcome = match (entry.dry_run, entry.success) {
            (true, _) => "dry run".cyan(),
            (false, true) => "ok".green(),
            (false, false) => "failed".red(),
        };
        let target = entry
            .target_cluster
            .as_ref()
            .map(|c| format!("{c}/"))
            .unwrap_or_default();
        println!(
            "- {} {} {}/{} {} -> {}{} [{}]",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.cluster,
            entry.guest_type,
            entry.guest_id,
            entry.from_node,
            target,
            entry.to_node,
            outcome
        );
    }
    Ok(())
}

fn handle_init_command(config_dir: &Path, force: bool) -> Result<()> {
    let target = config_dir.join("default.json");
    if target.exists() && !force {
        warn!("Configuration already exists at {}", target.display());
        println!("{} {} exists. Use --force to overwrite.", "✗".red(), target.display());
        return Ok(());
    }

    std::fs::create_dir_all(config_dir)?;
    let config_str = serde_json::to_string_pretty(&generate_default_config())?;
    std::fs::write(&target, config_str)?;

    println!("{} Default configuration written to {}", "✓".green(), target.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_config_values_are_stringified() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{"scsi0": "local-lvm:vm-100-disk-0,size=32G", "memory": 4096, "onboot": true}"#,
        )
        .unwrap();

        let config = load_raw_config(file.path()).unwrap();
        assert_eq!(config["memory"], "4096");
        assert_eq!(config["onboot"], "true");
        assert!(inspect(&config).has_local_disks);
    }

    #[test]
    fn last_run_argument_parses() {
        let id = Uuid::new_v4();
        let (parsed, at) = parse_last_run(&format!("{id}=2026-01-02T03:04:05Z")).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(at.to_rfc3339(), "2026-01-02T03:04:05+00:00");
        assert!(parse_last_run("nonsense").is_err());
    }

    #[test]
    fn init_writes_into_the_given_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("clm");
        handle_init_command(&config_dir, false).unwrap();

        let written = config_dir.join("default.json");
        let settings = Settings::new_from_file(&written).unwrap();
        assert_eq!(settings.polling.interval_secs, 30);

        std::fs::write(&written, "{}").unwrap();
        handle_init_command(&config_dir, false).unwrap();
        assert_eq!(std::fs::read_to_string(&written).unwrap(), "{}");
        handle_init_command(&config_dir, true).unwrap();
        assert_ne!(std::fs::read_to_string(&written).unwrap(), "{}");
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
