//! Backup restore tool
//!
//! Finds the most recent backup archive under a prefix of an object storage
//! bucket and restores it onto local disk. Also lists backups and creates
//! new ones.

// backuprestore/src/main.rs
mod archive;
mod backup;
mod config;
mod errors;
mod restore;
mod store;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use archive::ArchiveFormat;
use backup::BackupReport;
use config::{RunPaths, StorageConfig, config_candidates, find_config_path};
use store::{ObjectStore, S3Store, collect_listing, sanitize_prefix};

#[derive(Parser, Debug)]
#[command(author, version, about = "Restore the latest backup archive from object storage")]
struct Cli {
    /// Path to config.json (default: next to the executable, then its parent directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override bucket and prefix, e.g. s3://kjkbackup/apptranslator
    #[arg(long, global = true)]
    location: Option<String>,

    /// Deadline in seconds for listing and for each transfer
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Restore the latest backup (the default)
    Restore {
        /// Directory to restore into
        #[arg(long)]
        dest: Option<PathBuf>,
    },
    /// List backups under the configured prefix
    List,
    /// Archive a directory and upload it as a new backup
    Backup {
        /// Directory to back up
        #[arg(long)]
        source: PathBuf,

        #[arg(long, value_enum, default_value_t = FormatArg::Zip)]
        format: FormatArg,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Zip,
    TarGz,
}

impl From<FormatArg> for ArchiveFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Zip => ArchiveFormat::Zip,
            FormatArg::TarGz => ArchiveFormat::TarGz,
        }
    }
}

/// Main entry point for the restore tool
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    match run_app(cli).await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: Cli) -> Result<()> {
    let command = cli.command.unwrap_or(Command::Restore { dest: None });

    let exe_dir = config::current_exe_dir()?;
    let candidates = match cli.config {
        Some(path) => vec![path],
        None => config_candidates(&exe_dir),
    };
    let config_path = find_config_path(&candidates)?;
    let mut storage = StorageConfig::load_from_json(&config_path).with_context(|| {
        format!("Failed to load configuration from {}", config_path.display())
    })?;
    if let Some(location) = &cli.location {
        storage = storage.with_location(location)?;
    }
    if let Some(secs) = cli.timeout_secs.filter(|s| *s > 0) {
        storage.timeout = Some(Duration::from_secs(secs));
    }
    tracing::debug!(config = %config_path.display(), ?storage, "Loaded configuration");

    let store = S3Store::connect(&storage).await;

    match command {
        Command::Restore { dest } => {
            let paths = RunPaths::resolve(&exe_dir, dest);
            println!("Will download to {}", paths.destination_dir.display());
            let outcome = restore::run_restore_flow(&store, &storage, &paths)
                .await
                .context("Restore process failed")?;
            println!(
                "Restored {} ({} bytes, sha256 {})",
                outcome.key, outcome.bytes, outcome.archive_sha256
            );
            for (path, action) in &outcome.entries {
                println!("  extracted {} ({})", path.display(), action);
            }
        }
        Command::List => list_backups(&store, &storage).await?,
        Command::Backup { source, format } => {
            let report = backup::run_backup_flow(&store, &storage, &source, format.into())
                .await
                .context("Backup process failed")?;
            match report {
                BackupReport::Uploaded { key, files } => {
                    println!("Uploaded {} ({} files)", key, files)
                }
                BackupReport::Unchanged { latest } => {
                    println!("Backup unchanged since {}, nothing uploaded", latest)
                }
            }
        }
    }
    Ok(())
}

async fn list_backups(store: &dyn ObjectStore, storage: &StorageConfig) -> Result<()> {
    let prefix = sanitize_prefix(&storage.prefix);
    println!("Listing files in {}", store.location());
    let objects = collect_listing(store, &prefix, storage.timeout)
        .await
        .context("Listing backups failed")?;
    if objects.is_empty() {
        println!("There are no files in {}", store.location());
        return Ok(());
    }
    for object in objects {
        println!("  {} {}", object.key, object.size);
    }
    Ok(())
}
