use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use device_config_sync::config::{ConfigManager, DaemonConfig};
use device_config_sync::handlers;
use device_config_sync::logger;
use device_config_sync::server;
use device_config_sync::service::ConfigSyncService;
use device_config_sync::settings::{JsonSettingsStore, SettingsUpdate};

#[derive(Parser)]
#[command(name = "device-config-sync")]
#[command(about = "Keep a device's configuration in sync with a reference repository", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Firmware version reported by the device
    #[arg(long, global = true)]
    device_version: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP daemon with periodic syncs
    Serve {
        /// Address to listen on (overrides the config file)
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Show device status
    Status {
        /// List the reference branches
        #[arg(long)]
        branches: bool,
    },

    /// Fetch the reference repository and check out the matching branch
    Sync,

    /// Compare the reference with the live configuration
    Diff {
        /// Show hunks of a single reference path (e.g. sys/config.g)
        #[arg(short, long)]
        file: Option<String>,

        /// Include unchanged files
        #[arg(long)]
        all: bool,
    },

    /// Write reference content into the live configuration
    Apply {
        /// Apply only this reference path
        #[arg(short, long)]
        file: Option<String>,

        /// Apply only these hunk indices of --file (comma-separated)
        #[arg(long, value_delimiter = ',')]
        hunks: Vec<usize>,
    },

    /// Manage configuration backups
    Backups {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Show or change settings
    Settings {
        /// Reference repository URL (empty string to clear)
        #[arg(long)]
        url: Option<String>,

        /// Branch to use instead of the detected version (empty string to clear)
        #[arg(long = "override")]
        version_override: Option<String>,

        /// Minutes between automatic syncs (0 disables)
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[derive(Subcommand)]
enum BackupAction {
    /// List backups, newest first
    List {
        /// Number of backups to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show the files of a backup, or one file's changes
    Show {
        hash: String,

        #[arg(short, long)]
        file: Option<String>,
    },

    /// Take a full backup now
    Create {
        /// Label for the backup
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Restore the live configuration to a backup
    Restore {
        hash: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Delete a backup from the history
    Delete {
        hash: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Save a backup as a ZIP archive
    Download {
        hash: String,

        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => ConfigManager::config_file_path()?,
    };
    let mut config = DaemonConfig::load_from(&config_path)?;
    if let Some(version) = cli.device_version {
        config.device_version = Some(version);
    }

    config.ensure_data_dir()?;
    logger::init_logger(&config.log_file_path()?)?;
    log::debug!("Using config {}", config_path.display());

    let store = JsonSettingsStore::new(config.settings_path()?);
    let service = Arc::new(
        ConfigSyncService::new(&config, Box::new(store)).context("Failed to start service")?,
    );

    match cli.command {
        Commands::Serve { listen } => {
            let listen = listen.unwrap_or_else(|| config.listen.clone());
            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            runtime.block_on(server::serve(&listen, service))?;
        }
        Commands::Status { branches } => {
            handlers::handle_status(&service, branches)?;
        }
        Commands::Sync => {
            handlers::handle_sync(&service)?;
        }
        Commands::Diff { file, all } => {
            handlers::handle_diff(&service, file.as_deref(), all)?;
        }
        Commands::Apply { file, hunks } => {
            handlers::handle_apply(&service, file.as_deref(), &hunks)?;
        }
        Commands::Backups { action } => match action {
            BackupAction::List { limit } => handlers::handle_backup_list(&service, limit)?,
            BackupAction::Show { hash, file } => {
                handlers::handle_backup_show(&service, &hash, file.as_deref())?
            }
            BackupAction::Create { message } => {
                handlers::handle_backup_create(&service, message.as_deref())?
            }
            BackupAction::Restore { hash, yes } => {
                handlers::handle_backup_restore(&service, &hash, yes)?
            }
            BackupAction::Delete { hash, yes } => {
                handlers::handle_backup_delete(&service, &hash, yes)?
            }
            BackupAction::Download { hash, output } => {
                handlers::handle_backup_download(&service, &hash, output.as_deref())?;
            }
        },
        Commands::Settings {
            url,
            version_override,
            interval,
        } => {
            let update = SettingsUpdate {
                reference_repo_url: url,
                version_override,
                sync_interval: interval,
            };
            if update.reference_repo_url.is_none()
                && update.version_override.is_none()
                && update.sync_interval.is_none()
            {
                handlers::handle_settings_show(&service)?;
            } else {
                handlers::handle_settings_set(&service, &update)?;
            }
        }
    }

    Ok(())
}
