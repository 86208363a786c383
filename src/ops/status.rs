//! Deployment status report.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{OpsError, backup::BackupManager};
use crate::config::{DeploySettings, EnvFile};
use crate::docker::{self, ContainerStatus};

/// Aggregated view of the deployment, for `botops status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusReport {
    /// Container name the report refers to.
    pub container: String,

    /// Container state from the Docker daemon.
    pub container_status: ContainerStatus,

    /// Size of the data directory in bytes.
    pub data_dir_bytes: u64,

    /// Number of backup archives on disk.
    pub backup_count: usize,

    /// File name of the most recent backup archive.
    pub latest_backup: Option<String>,

    /// Whether the env file exists and has all required keys.
    pub env_ok: bool,

    /// Required keys the env file is missing (names only, never values).
    pub env_missing: Vec<String>,
}

/// Collects the status report.
///
/// A missing container or env file is part of the report, not an error;
/// only an unreachable daemon fails.
///
/// # Errors
///
/// Returns an error if the Docker daemon cannot be queried or the backup
/// directory is unreadable.
pub async fn gather(settings: &DeploySettings) -> Result<StatusReport, OpsError> {
    let container_status = docker::container_status(&settings.container).await?;

    let data_dir_bytes = dir_size(&settings.data_path());

    let backups = BackupManager::new(settings).list()?;
    let latest_backup = backups.first().map(|b| b.file_name.clone());

    let (env_ok, env_missing) = match EnvFile::load(settings.env_path()) {
        Ok(env) => {
            let missing: Vec<String> = env
                .validate_all()
                .into_iter()
                .filter(|(_, result)| result.is_err())
                .map(|(key, _)| key.to_owned())
                .collect();
            (missing.is_empty(), missing)
        }
        Err(_) => (
            false,
            crate::config::REQUIRED_KEYS.iter().map(|&k| k.to_owned()).collect(),
        ),
    };

    Ok(StatusReport {
        container: settings.container.clone(),
        container_status,
        data_dir_bytes,
        backup_count: backups.len(),
        latest_backup,
        env_ok,
        env_missing,
    })
}

impl StatusReport {
    /// Renders the report for the terminal.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut lines = vec![format!("Container: {}", self.container)];

        lines.push(format!("  State:    {}", self.container_status.state));
        lines.push(format!("  Uptime:   {}", self.container_status.uptime_human()));
        lines.push(format!("  Restarts: {}", self.container_status.restart_count));

        if let Some(code) = self.container_status.exit_code {
            lines.push(format!("  Exit code: {code}"));
        }
        if self.container_status.oom_killed {
            lines.push("  Last exit was an OOM kill".to_owned());
        }

        lines.push(format!("Data: {}", format_bytes(self.data_dir_bytes)));

        match &self.latest_backup {
            Some(latest) => lines.push(format!(
                "Backups: {} (latest: {latest})",
                self.backup_count
            )),
            None => lines.push("Backups: none".to_owned()),
        }

        if self.env_ok {
            lines.push("Env file: ok".to_owned());
        } else if self.env_missing.len() == crate::config::REQUIRED_KEYS.len() {
            lines.push("Env file: missing or unreadable".to_owned());
        } else {
            lines.push(format!("Env file: missing keys: {}", self.env_missing.join(", ")));
        }

        lines.join("\n")
    }
}

/// Total size of a directory tree in bytes. Missing paths count as zero.
fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };

    let mut total = 0;
    for entry in entries.flatten() {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if metadata.is_dir() {
            total += dir_size(&entry.path());
        } else {
            total += metadata.len();
        }
    }
    total
}

/// Formats a byte count for humans.
fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::ContainerState;

    fn report() -> StatusReport {
        StatusReport {
            container: "schedule-bot".to_owned(),
            container_status: ContainerStatus::missing(),
            data_dir_bytes: 2048,
            backup_count: 0,
            latest_backup: None,
            env_ok: true,
            env_missing: vec![],
        }
    }

    #[test]
    fn test_render_missing_container() {
        let text = report().render_text();
        assert!(text.contains("State:    missing"));
        assert!(text.contains("Backups: none"));
        assert!(text.contains("Env file: ok"));
    }

    #[test]
    fn test_render_missing_env_keys() {
        let mut r = report();
        r.env_ok = false;
        r.env_missing = vec!["GIT_TOKEN".to_owned()];
        let text = r.render_text();
        assert!(text.contains("missing keys: GIT_TOKEN"));
        // Key names only; no values anywhere near the report.
        assert!(!text.contains('='));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn test_dir_size() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a"), vec![0u8; 100]).expect("write");
        std::fs::create_dir(dir.path().join("sub")).expect("mkdir");
        std::fs::write(dir.path().join("sub/b"), vec![0u8; 50]).expect("write");

        assert_eq!(dir_size(dir.path()), 150);
        assert_eq!(dir_size(&dir.path().join("missing")), 0);
    }

    #[test]
    fn test_report_serializes_to_json() {
        let json = serde_json::to_string(&report()).expect("serialize");
        assert!(json.contains("\"state\":\"missing\""));
        assert!(json.contains("\"backup_count\":0"));
    }
}
