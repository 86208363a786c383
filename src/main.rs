//! Schedule Bot Ops - Main Entry Point
//!
//! Deployment manager CLI for the containerized schedule Telegram bot:
//! provisions Docker, drives the container lifecycle and handles backups.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use schedule_bot_ops::config::DeploySettings;
use schedule_bot_ops::docker::ComposeClient;
use schedule_bot_ops::ops::backup::BackupManager;
use schedule_bot_ops::ops::{lifecycle, permissions, setup, status};

/// Deployment manager for the schedule Telegram bot.
#[derive(Parser, Debug)]
#[command(name = "botops")]
#[command(about = "Manage the containerized schedule bot deployment")]
#[command(version)]
struct Args {
    /// Project directory with the compose file, data and backups.
    #[arg(short, long, default_value = ".")]
    project_dir: PathBuf,

    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install Docker, prepare directories and config templates.
    Setup,

    /// Start the bot container (with preflight checks).
    Start,

    /// Stop and remove the bot container.
    Stop,

    /// Restart the bot container.
    Restart,

    /// Back up, rebuild images and recreate the container.
    Update {
        /// Skip the automatic backup before updating.
        #[arg(long)]
        skip_backup: bool,
    },

    /// Show container logs.
    Logs {
        /// Keep following new log output.
        #[arg(short, long)]
        follow: bool,

        /// Number of trailing lines to show.
        #[arg(short, long)]
        tail: Option<u32>,
    },

    /// Show the deployment status.
    Status {
        /// Output machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Create a backup of data/, .env and ssh/.
    Backup {
        /// List existing backups instead of creating one.
        #[arg(short, long)]
        list: bool,
    },

    /// Restore a backup archive over the project directory.
    Restore {
        /// Path to the backup archive.
        archive: PathBuf,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Repair SSH key modes, directories and docker group membership.
    FixPermissions,

    /// Write docker-compose.yml, Dockerfile and .env.example templates.
    GenerateConfig {
        /// Overwrite existing template files.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level);

    // Load environment variables
    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    let settings = DeploySettings::from_env_with_defaults(args.project_dir);
    debug!(
        "Managing '{}' in {}",
        settings.container,
        settings.project_dir.display()
    );

    // Everything except provisioning expects the project directory to exist.
    if !matches!(args.command, Command::Setup | Command::GenerateConfig { .. }) {
        settings.ensure_project_dir()?;
    }

    match args.command {
        Command::Setup => setup::run(&settings).await.context("Setup failed")?,

        Command::Start => lifecycle::start(&settings)
            .await
            .context("Failed to start the bot")?,

        Command::Stop => lifecycle::stop(&settings)
            .await
            .context("Failed to stop the bot")?,

        Command::Restart => lifecycle::restart(&settings)
            .await
            .context("Failed to restart the bot")?,

        Command::Update { skip_backup } => lifecycle::update(&settings, skip_backup)
            .await
            .context("Update failed")?,

        Command::Logs { follow, tail } => show_logs(&settings, follow, tail).await?,

        Command::Status { json } => show_status(&settings, json).await?,

        Command::Backup { list } => run_backup(&settings, list).await?,

        Command::Restore { archive, yes } => run_restore(&settings, &archive, yes).await?,

        Command::FixPermissions => permissions::fix(&settings)
            .await
            .context("Failed to fix permissions")?,

        Command::GenerateConfig { force } => {
            setup::write_templates(&settings, force).context("Failed to write templates")?;
        }
    }

    Ok(())
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Streams container logs; Ctrl-C ends a follow cleanly.
async fn show_logs(settings: &DeploySettings, follow: bool, tail: Option<u32>) -> Result<()> {
    let compose = ComposeClient::detect(settings)
        .await
        .context("Compose is not available")?;

    if follow {
        tokio::select! {
            result = compose.logs(true, tail) => {
                result.context("Failed to read logs")?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Stopped following logs");
            }
        }
    } else {
        compose.logs(false, tail).await.context("Failed to read logs")?;
    }

    Ok(())
}

/// Prints the status report.
async fn show_status(settings: &DeploySettings, json: bool) -> Result<()> {
    let report = status::gather(settings)
        .await
        .context("Failed to gather status")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.render_text());
    }

    Ok(())
}

/// Creates a backup, or lists the existing ones.
async fn run_backup(settings: &DeploySettings, list: bool) -> Result<()> {
    let manager = BackupManager::new(settings);

    if list {
        let backups = manager.list().context("Failed to list backups")?;
        if backups.is_empty() {
            println!("No backups yet.");
            return Ok(());
        }

        println!("Backups in {}:", settings.backups_path().display());
        for backup in backups {
            let when = backup
                .created_at
                .map_or_else(|| "unknown".to_owned(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
            println!("  {}  {}  ({} bytes)", backup.file_name, when, backup.size_bytes);
        }
        return Ok(());
    }

    let archive = manager
        .create(settings)
        .await
        .context("Backup failed")?;
    println!("✓ Backup written to: {}", archive.display());
    Ok(())
}

/// Restores an archive after confirmation, cycling the container around it.
async fn run_restore(settings: &DeploySettings, archive: &std::path::Path, yes: bool) -> Result<()> {
    let confirmed = yes
        || Confirm::new()
            .with_prompt(format!(
                "Restore {} over {}? Current data will be overwritten",
                archive.display(),
                settings.project_dir.display()
            ))
            .default(false)
            .interact()
            .context("Confirmation prompt failed")?;

    if !confirmed {
        info!("Restore cancelled");
        return Ok(());
    }

    // Stop the bot so the restored files are not written to mid-extraction.
    let was_running = match schedule_bot_ops::docker::container_status(&settings.container).await {
        Ok(status) => status.is_running(),
        Err(e) => {
            debug!("Could not inspect container before restore: {}", e);
            false
        }
    };

    if was_running {
        lifecycle::stop(settings)
            .await
            .context("Failed to stop the bot before restore")?;
    }

    let manager = BackupManager::new(settings);
    manager
        .restore(settings, archive)
        .await
        .context("Restore failed")?;

    // tar may have restored looser modes than the container accepts.
    permissions::fix(settings)
        .await
        .context("Failed to re-apply permissions after restore")?;

    if was_running {
        lifecycle::start(settings)
            .await
            .context("Failed to start the bot after restore")?;
    }

    println!("✓ Restore complete");
    Ok(())
}
