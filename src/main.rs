use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use chart_sync::config::Config;
use chart_sync::drive::DriveClient;
use chart_sync::events::TracingObserver;
use chart_sync::pipeline::{run_sync, SyncOptions};
use chart_sync::progress::set_log_only;
use chart_sync::reconcile::dedupe_folder;

#[derive(Parser)]
#[command(name = "chart-sync")]
#[command(about = "Sync band sheet music from Drive into per-instrument reader libraries")]
struct Args {
    /// TOML configuration file
    #[arg(long, global = true, default_value = "chart-sync.toml")]
    config: PathBuf,

    /// OAuth access token for the Drive and Docs APIs
    #[arg(long, global = true, env = "CHART_SYNC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Debug-level logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Hide progress bars and print periodic progress lines instead
    #[arg(long, global = true)]
    log_only: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Full sync run (the default)
    Sync(SyncArgs),
    /// Trash duplicate same-name files in one destination folder
    Dedupe {
        folder_id: String,

        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(clap::Args, Default)]
struct SyncArgs {
    /// Reuse the cached song list instead of querying Drive
    #[arg(long)]
    skip_query: bool,

    /// Delete the local cache before starting
    #[arg(long)]
    no_cache: bool,

    /// Decide and report without copying, trashing or uploading
    #[arg(long)]
    dry_run: bool,

    /// Page-count download threads
    #[arg(long)]
    workers: Option<usize>,

    /// Cap on category and song folders scanned
    #[arg(long)]
    max_folders: Option<usize>,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "chart_sync=debug" } else { "chart_sync=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    set_log_only(args.log_only);

    let start = Instant::now();

    let mut config = Config::load(&args.config)?;
    let token = args
        .token
        .context("No access token: pass --token or set CHART_SYNC_TOKEN")?;

    match args.command.unwrap_or(Command::Sync(SyncArgs::default())) {
        Command::Sync(sync) => {
            if let Some(workers) = sync.workers {
                config.workers = workers;
            }
            if sync.max_folders.is_some() {
                config.max_folders = sync.max_folders;
            }
            config.validate().context("Invalid configuration")?;

            let client = DriveClient::new(&token, config.retry.policy());
            let options = SyncOptions {
                skip_query: sync.skip_query,
                no_cache: sync.no_cache,
                dry_run: sync.dry_run,
            };
            let report = run_sync(&config, &client, &client, options, &TracingObserver)?;
            report.print_summary(start.elapsed());
        }
        Command::Dedupe { folder_id, dry_run } => {
            let client = DriveClient::new(&token, config.retry.policy());
            let trashed = dedupe_folder(&client, &folder_id, dry_run)?;

            println!("\n{:=<60}", "");
            println!("Dedupe complete{}", if dry_run { " (dry run)" } else { "!" });
            println!("  Duplicates trashed: {}", trashed);
            println!("{:=<60}", "");
        }
    }

    Ok(())
}
