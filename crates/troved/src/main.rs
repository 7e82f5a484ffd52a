//! `troved`: the trove node daemon.
//!
//! Opens the node's partition logs, replays them into their chains of
//! trust and keeps diverged entities merged in the background.
//!
//! # Usage
//!
//! ```text
//! troved start                      # start the node
//! troved start -c trove.toml        # start with a config file
//! troved start -d ./node2           # second instance
//! troved start --memory             # no disk persistence
//! troved keygen --alias alice       # print a fresh key pair
//! troved inspect -p accounts:0      # leaf state of every entity
//! ```

mod config;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use trove_bridge::DataSubscriber;
use trove_chain::{ChainContext, DataContainer};
use trove_crypto::{DalekCrypto, PrivateKey};
use trove_repo::{DataRepository, Rights, start_maintenance};
use trove_types::PartitionKey;

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "troved", version, about = "Trove partitioned entity store daemon")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the trove node.
    Start {
        /// Override data directory (useful for running multiple instances).
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Run fully in-memory (no disk persistence).
        #[arg(short, long)]
        memory: bool,
    },

    /// Generate a signing and an encryption key pair.
    Keygen {
        /// Alias recorded with the public keys.
        #[arg(short, long)]
        alias: Option<String>,
    },

    /// Replay stored partition logs and print each entity's leaf state.
    Inspect {
        /// Partition to inspect (`topic:index`); every stored partition if omitted.
        #[arg(short, long)]
        partition: Option<String>,

        /// Override data directory.
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    telemetry::init(&config.log.level);

    match cli.command {
        Commands::Start { data_dir, memory } => {
            // CLI args override config file values.
            if let Some(dir) = data_dir {
                config.node.data_dir = dir;
            }
            if memory {
                config.storage.backend = "memory".to_string();
            }
            cmd_start(config).await
        }
        Commands::Keygen { alias } => {
            cmd_keygen(alias.as_deref());
            Ok(())
        }
        Commands::Inspect {
            partition,
            data_dir,
        } => {
            if let Some(dir) = data_dir {
                config.node.data_dir = dir;
            }
            cmd_inspect(&config, partition.as_deref())
        }
    }
}

/// Open the partition subscriber described by `config`.
fn open_subscriber(config: &CliConfig) -> Result<Arc<DataSubscriber>> {
    let ctx = ChainContext::new(
        Arc::new(config.policy_table()),
        Arc::new(DalekCrypto::new()),
        Arc::new(config.authorities()?),
    )
    .with_config(config.repo.chain_config());

    let backend = config.storage_backend()?;
    let subscriber = DataSubscriber::open(&backend, ctx).context("failed to open partition logs")?;
    Ok(Arc::new(subscriber))
}

// -----------------------------------------------------------------------
// troved start
// -----------------------------------------------------------------------

async fn cmd_start(config: CliConfig) -> Result<()> {
    info!("starting troved");
    info!(
        data_dir = %config.node.data_dir.display(),
        backend = %config.storage.backend,
        sync_timeout_ms = config.repo.sync_timeout_ms,
        maintenance_min_sleep_ms = config.repo.maintenance_min_sleep_ms,
        maintenance_max_sleep_ms = config.repo.maintenance_max_sleep_ms,
        "node configuration"
    );

    if !config.is_memory() {
        std::fs::create_dir_all(&config.node.data_dir)
            .context("failed to create data directory")?;
    }

    let subscriber = open_subscriber(&config)?;

    // Replay configured partitions plus every partition already on disk.
    let mut warm = config.partitions()?;
    for key in subscriber.known_partitions()? {
        if !warm.contains(&key) {
            warm.push(key);
        }
    }
    for key in &warm {
        let partition = {
            let subscriber = Arc::clone(&subscriber);
            let key = key.clone();
            tokio::task::spawn_blocking(move || subscriber.partition(&key)).await?
        };
        match partition {
            Ok(partition) => info!(
                partition = %key,
                entities = partition.chain().ids().len(),
                "partition ready"
            ),
            Err(e) => warn!(partition = %key, error = %e, "failed to open partition"),
        }
    }

    let repo = Arc::new(DataRepository::new(
        Arc::clone(&subscriber),
        Rights::new(),
        config.repo.clone(),
    ));
    let maintenance = start_maintenance(repo);
    info!(partitions = warm.len(), "troved running, press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutting down maintenance");
    maintenance.shutdown().await;
    Ok(())
}

// -----------------------------------------------------------------------
// troved keygen
// -----------------------------------------------------------------------

fn cmd_keygen(alias: Option<&str>) {
    let signing = PrivateKey::generate_signing();
    let encryption = PrivateKey::generate_encryption();

    for (role, key) in [("write", signing), ("read", encryption)] {
        let key = match alias {
            Some(alias) => key.with_alias(alias),
            None => key,
        };
        println!("[{role}]");
        println!("  kind:    {:?}", key.kind());
        if let Some(alias) = key.alias() {
            println!("  alias:   {alias}");
        }
        println!("  hash:    {}", key.hash());
        println!("  public:  {}", hex::encode(key.public_bytes()));
        println!("  private: {}", hex::encode(key.private_bytes()));
    }
}

// -----------------------------------------------------------------------
// troved inspect
// -----------------------------------------------------------------------

fn cmd_inspect(config: &CliConfig, partition: Option<&str>) -> Result<()> {
    if config.is_memory() {
        bail!("inspect reads stored logs, the memory backend has none");
    }

    let subscriber = open_subscriber(config)?;
    let keys: Vec<PartitionKey> = match partition {
        Some(p) => vec![
            p.parse::<PartitionKey>()
                .with_context(|| format!("invalid partition {p:?}"))?,
        ],
        None => subscriber.known_partitions()?,
    };
    if keys.is_empty() {
        println!("No stored partitions in {}", config.log_dir().display());
        return Ok(());
    }

    for key in keys {
        let partition = subscriber
            .partition(&key)
            .with_context(|| format!("failed to replay {key}"))?;
        let mut containers = partition.chain().get_all_data(None);
        containers.sort_by_key(|c| c.first_offset());

        println!("Partition {key}: {} entities", containers.len());
        for container in containers {
            print_container(&container);
        }
        println!();
    }
    Ok(())
}

fn print_container(container: &DataContainer) {
    let offsets = match (container.first_offset(), container.last_offset()) {
        (Some(first), Some(last)) => format!("{first}..={last}"),
        _ => "-".to_string(),
    };
    println!(
        "  {} {:<16} offsets={offsets:<12} versions={:<3} leaves={} merge={} tombstoned={}",
        container.id(),
        container.payload_type().unwrap_or_default(),
        container.history().len(),
        container.leaf_count(),
        container.requires_merge(),
        !container.has_payload(),
    );
}
