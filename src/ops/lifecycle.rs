//! Container lifecycle operations: start, stop, restart, update.

use std::time::Duration;

use tokio::time::{interval, timeout};
use tracing::{info, warn};

use super::{OpsError, backup::BackupManager, permissions};
use crate::config::{DeploySettings, EnvFile};
use crate::docker::{self, ComposeClient, ContainerState};

/// Checks everything `start` depends on before touching Docker.
///
/// `.env` problems are fatal: the bot would boot and immediately crash.
/// SSH key problems only disable hosting sync, so they are warnings.
///
/// # Errors
///
/// Returns an error if the env file is missing or invalid, or the Docker
/// daemon is unreachable.
pub async fn preflight(settings: &DeploySettings) -> Result<(), OpsError> {
    let env_path = settings.env_path();
    let env = EnvFile::load(&env_path)?;
    env.validate()?;

    let missing = env.missing_optional();
    if !missing.is_empty() {
        info!("Optional keys not set (bot defaults apply): {}", missing.join(", "));
    }

    for issue in permissions::check(settings).await? {
        warn!("{}", issue);
    }

    docker::check_daemon().await?;

    Ok(())
}

/// Starts the bot container and waits for it to come up.
///
/// # Errors
///
/// Returns an error if preflight fails, Compose fails, or the container
/// does not reach the running state within the configured timeout.
pub async fn start(settings: &DeploySettings) -> Result<(), OpsError> {
    preflight(settings).await?;

    let compose = ComposeClient::detect(settings).await?;
    compose.up(false).await?;

    wait_until_running(settings).await?;
    info!("Bot is up");
    Ok(())
}

/// Stops and removes the bot container.
///
/// # Errors
///
/// Returns an error if Compose fails.
pub async fn stop(settings: &DeploySettings) -> Result<(), OpsError> {
    let compose = ComposeClient::detect(settings).await?;
    compose.down().await?;
    info!("Bot stopped");
    Ok(())
}

/// Stops, then starts.
///
/// # Errors
///
/// Returns an error if either phase fails.
pub async fn restart(settings: &DeploySettings) -> Result<(), OpsError> {
    stop(settings).await?;
    start(settings).await
}

/// Updates the deployment: back up, refresh images, recreate the container.
///
/// A pull failure is tolerated because the bot image is normally built
/// locally; the build step is authoritative.
///
/// # Errors
///
/// Returns an error if the backup, build or recreate fails.
pub async fn update(settings: &DeploySettings, skip_backup: bool) -> Result<(), OpsError> {
    preflight(settings).await?;

    if skip_backup {
        info!("Skipping pre-update backup");
    } else {
        let manager = BackupManager::new(settings);
        let archive = manager.create(settings).await?;
        info!("Pre-update backup: {}", archive.display());
    }

    let compose = ComposeClient::detect(settings).await?;

    if let Err(e) = compose.pull().await {
        warn!("Image pull failed ({}), continuing with local build", e);
    }
    compose.build().await?;
    compose.up(true).await?;

    wait_until_running(settings).await?;

    // Reclaim space from superseded image layers.
    if let Err(e) = docker::runner::run_ok("docker", &["image", "prune", "-f"], None).await {
        warn!("Image prune failed: {}", e);
    }

    info!("Update complete");
    Ok(())
}

/// Polls the container state until it is running.
///
/// A container that lands in `exited` or `dead` during the wait is reported
/// immediately instead of burning the whole timeout.
async fn wait_until_running(settings: &DeploySettings) -> Result<(), OpsError> {
    let deadline = Duration::from_secs(settings.start_timeout_secs);

    let poll = async {
        let mut ticker = interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;

            let status = docker::container_status(&settings.container).await?;
            match status.state {
                ContainerState::Running => return Ok(()),
                ContainerState::Exited | ContainerState::Dead => {
                    return Err(OpsError::StartFailed {
                        container: settings.container.clone(),
                        detail: match status.exit_code {
                            Some(code) => {
                                format!("exited with code {code}, see 'botops logs'")
                            }
                            None => "container died during startup".to_owned(),
                        },
                    });
                }
                _ => {}
            }
        }
    };

    match timeout(deadline, poll).await {
        Ok(result) => result,
        Err(_) => Err(OpsError::StartFailed {
            container: settings.container.clone(),
            detail: format!(
                "not running after {} seconds, see 'botops status'",
                settings.start_timeout_secs
            ),
        }),
    }
}
