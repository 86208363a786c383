//! Host provisioning: Docker installation, directories, config templates.

use tracing::{debug, info, warn};

use super::{OpsError, permissions};
use crate::config::{DeploySettings, EnvFile};
use crate::docker::{compose_template, dockerfile_template, runner};

/// Provisions the host for the deployment.
///
/// Every step is guarded by a probe, so re-running is safe: an installed
/// Docker is left alone, existing directories and config files are kept.
///
/// # Errors
///
/// Returns an error if Docker needs installing without root, or any
/// install step fails.
pub async fn run(settings: &DeploySettings) -> Result<(), OpsError> {
    if runner::check_available("docker").await.is_ok() {
        info!("Docker already installed");
    } else {
        install_docker().await?;
    }

    ensure_docker_service().await;
    permissions::fix(settings).await?;
    write_templates(settings, false)?;

    info!("Setup complete. Fill in {} and run 'botops start'.", settings.env_path().display());
    Ok(())
}

/// Installs Docker and the Compose plugin through apt.
async fn install_docker() -> Result<(), OpsError> {
    if !is_root().await {
        return Err(OpsError::RootRequired(
            "Docker is not installed; re-run setup with sudo to install it",
        ));
    }

    info!("Installing Docker via apt-get (this can take a few minutes)");
    runner::run_ok("apt-get", &["update"], None).await?;
    runner::run_ok(
        "apt-get",
        &["install", "-y", "docker.io", "docker-compose-v2"],
        None,
    )
    .await?;

    info!("Docker installed");
    Ok(())
}

/// Enables and starts the docker service where systemd is present.
///
/// Absence of systemd (containers, WSL) is not an error; the daemon is
/// checked again by `start` preflight.
async fn ensure_docker_service() {
    match runner::run_ok("systemctl", &["enable", "--now", "docker"], None).await {
        Ok(_) => debug!("docker service enabled"),
        Err(e) => warn!("Could not enable docker service ({}); start the daemon manually", e),
    }
}

/// Writes `docker-compose.yml`, `.env.example` and the backup directory.
///
/// With `force`, existing template files are overwritten; the operator's
/// `.env` itself is never touched.
///
/// # Errors
///
/// Returns an error if a file cannot be written.
pub fn write_templates(settings: &DeploySettings, force: bool) -> Result<(), OpsError> {
    std::fs::create_dir_all(&settings.project_dir)?;
    std::fs::create_dir_all(settings.backups_path())?;

    let compose_path = settings.compose_path();
    if force || !compose_path.exists() {
        info!("Writing {}", compose_path.display());
        std::fs::write(&compose_path, compose_template(settings))?;
    } else {
        debug!("Keeping existing {}", compose_path.display());
    }

    let dockerfile_path = settings.resolve(std::path::Path::new("Dockerfile"));
    if force || !dockerfile_path.exists() {
        info!("Writing {}", dockerfile_path.display());
        std::fs::write(&dockerfile_path, dockerfile_template())?;
    }

    let example_path = settings.resolve(std::path::Path::new(".env.example"));
    if force || !example_path.exists() {
        info!("Writing {}", example_path.display());
        std::fs::write(&example_path, EnvFile::example())?;
    }

    let env_path = settings.env_path();
    if !env_path.exists() {
        warn!(
            "{} does not exist. Copy {} there and fill in the values.",
            env_path.display(),
            example_path.display()
        );
    }

    Ok(())
}

/// Whether the process runs as root.
async fn is_root() -> bool {
    runner::run_ok("id", &["-u"], None)
        .await
        .map(|uid| uid == "0")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_in(dir: &std::path::Path) -> DeploySettings {
        DeploySettings {
            project_dir: dir.to_path_buf(),
            ..DeploySettings::default()
        }
    }

    #[test]
    fn test_write_templates_creates_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings_in(dir.path());

        write_templates(&settings, false).expect("write");

        assert!(settings.compose_path().is_file());
        assert!(dir.path().join("Dockerfile").is_file());
        assert!(dir.path().join(".env.example").is_file());
        assert!(settings.backups_path().is_dir());

        let yaml = std::fs::read_to_string(settings.compose_path()).expect("read");
        assert!(yaml.contains("restart: unless-stopped"));

        let dockerfile = std::fs::read_to_string(dir.path().join("Dockerfile")).expect("read");
        assert!(dockerfile.contains("tesseract-ocr"));
    }

    #[test]
    fn test_write_templates_keeps_existing_without_force() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings_in(dir.path());

        std::fs::write(settings.compose_path(), "# hand-edited\n").expect("write");
        write_templates(&settings, false).expect("write");

        let yaml = std::fs::read_to_string(settings.compose_path()).expect("read");
        assert_eq!(yaml, "# hand-edited\n");
    }

    #[test]
    fn test_write_templates_force_overwrites() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings_in(dir.path());

        std::fs::write(settings.compose_path(), "# hand-edited\n").expect("write");
        write_templates(&settings, true).expect("write");

        let yaml = std::fs::read_to_string(settings.compose_path()).expect("read");
        assert!(yaml.contains("services:"));
    }

    #[test]
    fn test_env_example_parses() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings_in(dir.path());

        write_templates(&settings, false).expect("write");

        let content = std::fs::read_to_string(dir.path().join(".env.example")).expect("read");
        EnvFile::parse(&content).expect("example must parse");
    }
}
