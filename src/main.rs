//! xsoar-ctl - Desired-state configuration for Cortex XSOAR
//!
//! This is the command line entry point. Results are printed to stdout as
//! one JSON document per line, logs go to stderr.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use xsoar_ctl::client::XsoarClient;
use xsoar_ctl::config::Config;
use xsoar_ctl::logging::init_tracing;
use xsoar_ctl::manifest::{Manifest, ManifestRunner, SyncAllRequest, Task, TaskOutcome};
use xsoar_ctl::resources::account::account_statuses;
use xsoar_ctl::resources::AccountStatusPolicy;
use xsoar_ctl::sync::SyncRequest;

/// xsoar-ctl - Desired-state configuration for Cortex XSOAR
#[derive(Parser, Debug)]
#[command(name = "xsoar-ctl")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "XSOAR_CTL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply every task of a manifest in order
    Apply {
        /// Manifest file
        manifest: PathBuf,

        /// Report what would change without changing anything
        #[arg(long)]
        check: bool,
    },

    /// Push master content to tenant accounts
    Sync {
        /// Account display name (repeatable)
        #[arg(long = "account", conflicts_with = "all_accounts")]
        accounts: Vec<String>,

        /// Sync every tenant account
        #[arg(long)]
        all_accounts: bool,

        /// Content item name (repeatable)
        #[arg(long = "item", conflicts_with = "all_items")]
        items: Vec<String>,

        /// Push the whole content diff
        #[arg(long)]
        all_items: bool,

        /// Per-account timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Report what would be pushed without pushing
        #[arg(long)]
        check: bool,
    },

    /// Let the server sync content to every account
    SyncAll {
        /// Timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Skip the sync call
        #[arg(long)]
        check: bool,
    },

    /// List tenant accounts with their status
    AccountStatus,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(&args)?;
    init_tracing(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        url = %config.connection.url,
        "Starting xsoar-ctl"
    );

    let client = XsoarClient::new(&config.connection, config.retry.clone())?;

    match args.command {
        Command::Apply { manifest, check } => {
            let manifest = Manifest::from_file(&manifest)?;
            run_manifest(&client, &config, &manifest, check).await
        }
        Command::Sync {
            accounts,
            all_accounts,
            items,
            all_items,
            timeout_secs,
            check,
        } => {
            let request = SyncRequest {
                accounts,
                all_accounts,
                items,
                all_items,
                timeout_secs,
            };
            let manifest = Manifest {
                tasks: vec![Task::SyncAccounts(request)],
            };
            run_manifest(&client, &config, &manifest, check).await
        }
        Command::SyncAll {
            timeout_secs,
            check,
        } => {
            let manifest = Manifest {
                tasks: vec![Task::SyncAllAccounts(SyncAllRequest { timeout_secs })],
            };
            run_manifest(&client, &config, &manifest, check).await
        }
        Command::AccountStatus => {
            let policy = AccountStatusPolicy::from(&config.sync);
            for status in account_statuses(&client, &policy).await? {
                print_json(&status)?;
            }
            Ok(())
        }
    }
}

/// Run a manifest, printing each task result as soon as it is known
async fn run_manifest(
    client: &XsoarClient,
    config: &Config,
    manifest: &Manifest,
    check_mode: bool,
) -> anyhow::Result<()> {
    let runner = ManifestRunner::new(client, &config.sync, check_mode);
    let mut print_error = None;
    let result = runner
        .run(manifest, |_task, outcome: &TaskOutcome| {
            if let Err(e) = print_json(outcome) {
                print_error.get_or_insert(e);
            }
        })
        .await;

    if let Some(e) = print_error {
        return Err(e);
    }
    let summary = result?;
    info!(
        tasks = summary.tasks,
        changed = summary.changed,
        "xsoar-ctl finished"
    );
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path.display());
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}
