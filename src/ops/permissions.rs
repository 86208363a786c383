//! Filesystem and group permission checks and repairs.
//!
//! The container mounts `ssh/id_rsa` for hosting sync; OpenSSH refuses keys
//! that are group- or world-readable, so the key must be mode 600 and its
//! directory 700. The invoking user also needs membership in the `docker`
//! group to talk to the daemon without sudo.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::OpsError;
use crate::config::{DeploySettings, SSH_DIR_MODE, SSH_KEY_MODE};
use crate::docker::runner;

/// A single problem found by the permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionIssue {
    /// SSH key file is absent (hosting sync will be disabled).
    SshKeyMissing(PathBuf),

    /// SSH key has looser permissions than 600.
    SshKeyMode { path: PathBuf, mode: u32 },

    /// SSH directory has looser permissions than 700.
    SshDirMode { path: PathBuf, mode: u32 },

    /// Data directory does not exist.
    DataDirMissing(PathBuf),

    /// Invoking user is not in the docker group.
    NotInDockerGroup(String),
}

impl std::fmt::Display for PermissionIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SshKeyMissing(path) => {
                write!(f, "SSH key not found: {} (hosting sync disabled)", path.display())
            }
            Self::SshKeyMode { path, mode } => {
                write!(f, "SSH key {} has mode {mode:o}, expected 600", path.display())
            }
            Self::SshDirMode { path, mode } => {
                write!(f, "SSH directory {} has mode {mode:o}, expected 700", path.display())
            }
            Self::DataDirMissing(path) => {
                write!(f, "Data directory missing: {}", path.display())
            }
            Self::NotInDockerGroup(user) => {
                write!(f, "User '{user}' is not in the 'docker' group")
            }
        }
    }
}

/// Checks the deployment's permissions without changing anything.
///
/// # Errors
///
/// Returns an error only when the checks themselves cannot run; findings
/// are returned as issues.
pub async fn check(settings: &DeploySettings) -> Result<Vec<PermissionIssue>, OpsError> {
    let mut issues = Vec::new();

    let key_path = settings.ssh_key_path();
    if key_path.exists() {
        if let Some(mode) = file_mode(&key_path)?
            && mode != SSH_KEY_MODE
        {
            issues.push(PermissionIssue::SshKeyMode { path: key_path, mode });
        }

        let ssh_dir = settings.ssh_path();
        if let Some(mode) = file_mode(&ssh_dir)?
            && mode != SSH_DIR_MODE
        {
            issues.push(PermissionIssue::SshDirMode { path: ssh_dir, mode });
        }
    } else {
        issues.push(PermissionIssue::SshKeyMissing(key_path));
    }

    let data_path = settings.data_path();
    if !data_path.is_dir() {
        issues.push(PermissionIssue::DataDirMissing(data_path));
    }

    match current_user().await {
        Some(user) if user != "root" => {
            if docker_group_exists().await? && !in_docker_group(&user).await? {
                issues.push(PermissionIssue::NotInDockerGroup(user));
            }
        }
        Some(_) => debug!("Running as root, docker group membership not needed"),
        None => debug!("Could not determine the invoking user, skipping group check"),
    }

    Ok(issues)
}

/// Repairs everything [`check`] knows how to detect.
///
/// # Errors
///
/// Returns an error if a repair step fails.
pub async fn fix(settings: &DeploySettings) -> Result<(), OpsError> {
    fix_files(settings)?;

    if let Some(user) = current_user().await {
        ensure_docker_group_membership(&user).await?;
    }

    Ok(())
}

/// Repairs directories and modes, leaving group membership alone.
///
/// # Errors
///
/// Returns an error if a directory cannot be created or a mode cannot be
/// set.
pub fn fix_files(settings: &DeploySettings) -> Result<(), OpsError> {
    let data_path = settings.data_path();
    if !data_path.is_dir() {
        info!("Creating data directory: {}", data_path.display());
        std::fs::create_dir_all(&data_path)?;
    }

    let ssh_dir = settings.ssh_path();
    if !ssh_dir.is_dir() {
        info!("Creating SSH directory: {}", ssh_dir.display());
        std::fs::create_dir_all(&ssh_dir)?;
    }
    set_mode(&ssh_dir, SSH_DIR_MODE)?;

    let key_path = settings.ssh_key_path();
    if key_path.exists() {
        set_mode(&key_path, SSH_KEY_MODE)?;
        info!("SSH key permissions set to 600");
    } else {
        warn!(
            "SSH key not found: {}. Place the hosting key there and re-run.",
            key_path.display()
        );
    }

    Ok(())
}

/// Adds the user to the docker group when possible.
async fn ensure_docker_group_membership(user: &str) -> Result<(), OpsError> {
    if user == "root" {
        debug!("Running as root, docker group membership not needed");
        return Ok(());
    }

    if !docker_group_exists().await? {
        warn!("The 'docker' group does not exist yet. Run 'botops setup' first.");
        return Ok(());
    }

    if in_docker_group(user).await? {
        debug!("User '{}' already in the docker group", user);
        return Ok(());
    }

    info!("Adding user '{}' to the docker group", user);
    runner::run_ok("usermod", &["-aG", "docker", user], None).await?;
    info!("Group change takes effect after logging out and back in");
    Ok(())
}

/// Checks whether the docker group is known to the system.
async fn docker_group_exists() -> Result<bool, OpsError> {
    let output = runner::run_capture("getent", &["group", "docker"], None).await?;
    Ok(output.success())
}

/// Resolves the user the deployment belongs to.
///
/// Under sudo the target is the invoking user, not root.
pub async fn current_user() -> Option<String> {
    if let Ok(user) = std::env::var("SUDO_USER")
        && !user.is_empty()
    {
        return Some(user);
    }

    if let Ok(user) = std::env::var("USER")
        && !user.is_empty()
    {
        return Some(user);
    }

    runner::run_ok("id", &["-un"], None).await.ok()
}

/// Checks docker group membership via `id -nG`.
async fn in_docker_group(user: &str) -> Result<bool, OpsError> {
    let groups = runner::run_ok("id", &["-nG", user], None).await?;
    Ok(groups.split_whitespace().any(|g| g == "docker"))
}

/// Reads the permission bits of a path. Returns `None` on non-unix hosts.
fn file_mode(path: &std::path::Path) -> Result<Option<u32>, OpsError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::metadata(path)?;
        Ok(Some(metadata.permissions().mode() & 0o777))
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(None)
    }
}

/// Sets the permission bits of a path. No-op on non-unix hosts.
fn set_mode(path: &std::path::Path, mode: u32) -> Result<(), OpsError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(mode);
        std::fs::set_permissions(path, perms)?;
    }

    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeploySettings;

    fn settings_in(dir: &std::path::Path) -> DeploySettings {
        DeploySettings {
            project_dir: dir.to_path_buf(),
            ..DeploySettings::default()
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_check_flags_loose_key_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings_in(dir.path());

        std::fs::create_dir_all(settings.ssh_path()).expect("mkdir");
        std::fs::write(settings.ssh_key_path(), "key material").expect("write");
        set_mode(&settings.ssh_key_path(), 0o644).expect("chmod");
        set_mode(&settings.ssh_path(), 0o700).expect("chmod");
        std::fs::create_dir_all(settings.data_path()).expect("mkdir");

        let issues = check(&settings).await.expect("check");
        assert!(
            issues
                .iter()
                .any(|i| matches!(i, PermissionIssue::SshKeyMode { mode: 0o644, .. }))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_fix_files_repairs_key_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings_in(dir.path());

        std::fs::create_dir_all(settings.ssh_path()).expect("mkdir");
        std::fs::write(settings.ssh_key_path(), "key material").expect("write");
        set_mode(&settings.ssh_key_path(), 0o644).expect("chmod");

        fix_files(&settings).expect("fix");

        let mode = file_mode(&settings.ssh_key_path()).expect("mode").expect("unix");
        assert_eq!(mode, SSH_KEY_MODE);
        let dir_mode = file_mode(&settings.ssh_path()).expect("mode").expect("unix");
        assert_eq!(dir_mode, SSH_DIR_MODE);
        assert!(settings.data_path().is_dir());
    }

    #[tokio::test]
    async fn test_check_reports_missing_pieces() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings_in(dir.path());

        let issues = check(&settings).await.expect("check");
        assert!(
            issues
                .iter()
                .any(|i| matches!(i, PermissionIssue::SshKeyMissing(_)))
        );
        assert!(
            issues
                .iter()
                .any(|i| matches!(i, PermissionIssue::DataDirMissing(_)))
        );
    }
}
