//! Backup and restore of the bot's mutable state.
//!
//! A backup is a gzipped tar of `data/`, `.env` and `ssh/`, created with
//! the host's `tar` tool and named after its creation time. A JSON manifest
//! sits next to each archive so a listing does not need to open it.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::DeploySettings;
use crate::docker::runner::{self, ExecError};

/// Archive name prefix.
const ARCHIVE_PREFIX: &str = "backup-";

/// Archive name suffix.
const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// Timestamp format embedded in archive names.
const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Errors that can occur during backup or restore.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Nothing to back up: none of data/, .env or ssh/ exist")]
    NothingToBackUp,

    #[error("Backup archive not found: {}", .0.display())]
    ArchiveMissing(PathBuf),

    #[error("Archive is not a readable tar.gz: {}", .0.display())]
    InvalidArchive(PathBuf),

    #[error("Failed to write backup manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("Backup I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata written next to each archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    /// Archive file name.
    pub archive: String,

    /// When the backup was taken.
    pub created_at: DateTime<Utc>,

    /// Project-relative paths included in the archive.
    pub included: Vec<String>,

    /// Version of this tool that wrote the backup.
    pub tool_version: String,
}

/// A backup archive found on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupInfo {
    /// Full path to the archive.
    pub path: PathBuf,

    /// File name of the archive.
    pub file_name: String,

    /// Creation time parsed from the file name.
    pub created_at: Option<DateTime<Utc>>,

    /// Archive size in bytes.
    pub size_bytes: u64,
}

/// Manages the backup directory of one deployment.
#[derive(Debug)]
pub struct BackupManager {
    backups_dir: PathBuf,
    keep: usize,
}

impl BackupManager {
    /// Creates a manager for the deployment's backup directory.
    #[must_use]
    pub fn new(settings: &DeploySettings) -> Self {
        Self {
            backups_dir: settings.backups_path(),
            keep: settings.backup_keep,
        }
    }

    /// Creates a new backup archive and prunes old ones.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing exists to back up or `tar` fails.
    pub async fn create(&self, settings: &DeploySettings) -> Result<PathBuf, BackupError> {
        let members = backup_members(settings);
        if members.is_empty() {
            return Err(BackupError::NothingToBackUp);
        }

        std::fs::create_dir_all(&self.backups_dir)?;

        let created_at = Utc::now();
        let file_name = archive_name(created_at);
        let archive_path = self.backups_dir.join(&file_name);

        info!("Creating backup: {}", archive_path.display());
        debug!("Backing up: {}", members.join(", "));

        let archive_str = archive_path.to_string_lossy().into_owned();
        let project_dir = settings.project_dir.to_string_lossy().into_owned();
        let mut args = vec!["-czf", archive_str.as_str(), "-C", project_dir.as_str()];
        args.extend(members.iter().map(String::as_str));
        runner::run_ok("tar", &args, None).await?;

        let manifest = BackupManifest {
            archive: file_name.clone(),
            created_at,
            included: members,
            tool_version: env!("CARGO_PKG_VERSION").to_owned(),
        };
        let manifest_path = self.backups_dir.join(manifest_name(&file_name));
        std::fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;

        self.prune(Some(&file_name))?;

        Ok(archive_path)
    }

    /// Lists backup archives, newest first.
    ///
    /// Files that do not look like backup archives are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backup directory cannot be read.
    pub fn list(&self) -> Result<Vec<BackupInfo>, BackupError> {
        if !self.backups_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in std::fs::read_dir(&self.backups_dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();

            if !is_archive_name(&file_name) {
                continue;
            }

            backups.push(BackupInfo {
                path: entry.path(),
                created_at: parse_archive_timestamp(&file_name),
                size_bytes: entry.metadata().map(|m| m.len()).unwrap_or(0),
                file_name,
            });
        }

        // Newest first; undated archives sort last.
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    /// Deletes archives beyond the retention count, and their manifests.
    ///
    /// The archive named in `always_keep` is never deleted, whatever its
    /// position.
    ///
    /// # Errors
    ///
    /// Returns an error if a deletion fails.
    pub fn prune(&self, always_keep: Option<&str>) -> Result<usize, BackupError> {
        let backups = self.list()?;
        let mut removed = 0;

        for backup in backups.iter().skip(self.keep) {
            if always_keep == Some(backup.file_name.as_str()) {
                continue;
            }

            debug!("Pruning old backup: {}", backup.file_name);
            std::fs::remove_file(&backup.path)?;

            let manifest = self.backups_dir.join(manifest_name(&backup.file_name));
            if manifest.exists() {
                std::fs::remove_file(manifest)?;
            }

            removed += 1;
        }

        if removed > 0 {
            info!("Pruned {} old backup(s)", removed);
        }
        Ok(removed)
    }

    /// Reads the manifest for an archive, if one exists.
    #[must_use]
    pub fn manifest_for(&self, file_name: &str) -> Option<BackupManifest> {
        let path = self.backups_dir.join(manifest_name(file_name));
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Extracts an archive over the project directory.
    ///
    /// The caller is responsible for stopping the container first and for
    /// confirmation; this only validates and unpacks.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive is missing, unreadable or extraction
    /// fails.
    pub async fn restore(
        &self,
        settings: &DeploySettings,
        archive: &Path,
    ) -> Result<(), BackupError> {
        if !archive.is_file() {
            return Err(BackupError::ArchiveMissing(archive.to_path_buf()));
        }

        let archive_str = archive.to_string_lossy().into_owned();

        // Integrity check before touching anything.
        let listing = runner::run_capture("tar", &["-tzf", archive_str.as_str()], None).await?;
        if !listing.success() {
            warn!("tar -t failed: {}", listing.stderr.trim());
            return Err(BackupError::InvalidArchive(archive.to_path_buf()));
        }

        std::fs::create_dir_all(&settings.project_dir)?;
        let project_dir = settings.project_dir.to_string_lossy().into_owned();

        info!("Restoring {} into {}", archive.display(), project_dir);
        runner::run_ok(
            "tar",
            &["-xzf", archive_str.as_str(), "-C", project_dir.as_str()],
            None,
        )
        .await?;

        Ok(())
    }
}

/// Project-relative paths that exist and belong in a backup.
fn backup_members(settings: &DeploySettings) -> Vec<String> {
    let candidates = [&settings.data_dir, &settings.env_file, &settings.ssh_dir];

    candidates
        .iter()
        .filter(|rel| settings.resolve(rel).exists())
        .map(|rel| rel.to_string_lossy().into_owned())
        .collect()
}

/// Builds an archive file name from a timestamp.
fn archive_name(at: DateTime<Utc>) -> String {
    format!("{ARCHIVE_PREFIX}{}{ARCHIVE_SUFFIX}", at.format(TIMESTAMP_FORMAT))
}

/// The manifest file name belonging to an archive name.
fn manifest_name(archive: &str) -> String {
    let stem = archive.strip_suffix(ARCHIVE_SUFFIX).unwrap_or(archive);
    format!("{stem}.manifest.json")
}

/// Whether a file name looks like one of our archives.
fn is_archive_name(name: &str) -> bool {
    name.starts_with(ARCHIVE_PREFIX) && name.ends_with(ARCHIVE_SUFFIX)
}

/// Parses the creation time out of an archive name.
fn parse_archive_timestamp(name: &str) -> Option<DateTime<Utc>> {
    let stem = name
        .strip_prefix(ARCHIVE_PREFIX)?
        .strip_suffix(ARCHIVE_SUFFIX)?;
    NaiveDateTime::parse_from_str(stem, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_archive_name_round_trip() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).single().expect("valid");
        let name = archive_name(at);
        assert_eq!(name, "backup-20240501-103000.tar.gz");
        assert_eq!(parse_archive_timestamp(&name), Some(at));
    }

    #[test]
    fn test_manifest_name() {
        assert_eq!(
            manifest_name("backup-20240501-103000.tar.gz"),
            "backup-20240501-103000.manifest.json"
        );
    }

    #[test]
    fn test_is_archive_name() {
        assert!(is_archive_name("backup-20240501-103000.tar.gz"));
        assert!(!is_archive_name("backup-20240501-103000.manifest.json"));
        assert!(!is_archive_name("notes.txt"));
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert_eq!(parse_archive_timestamp("backup-garbage.tar.gz"), None);
        assert_eq!(parse_archive_timestamp("other.tar.gz"), None);
    }

    fn manager_with_keep(dir: &Path, keep: usize) -> BackupManager {
        BackupManager {
            backups_dir: dir.to_path_buf(),
            keep,
        }
    }

    fn touch_archive(dir: &Path, stamp: &str) {
        let name = format!("backup-{stamp}.tar.gz");
        std::fs::write(dir.join(&name), b"archive").expect("write");
        let manifest = manifest_name(&name);
        std::fs::write(dir.join(manifest), b"{}").expect("write");
    }

    #[test]
    fn test_list_sorts_newest_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch_archive(dir.path(), "20240101-000000");
        touch_archive(dir.path(), "20240301-000000");
        touch_archive(dir.path(), "20240201-000000");
        std::fs::write(dir.path().join("unrelated.txt"), b"x").expect("write");

        let manager = manager_with_keep(dir.path(), 10);
        let backups = manager.list().expect("list");

        assert_eq!(backups.len(), 3);
        assert_eq!(backups[0].file_name, "backup-20240301-000000.tar.gz");
        assert_eq!(backups[2].file_name, "backup-20240101-000000.tar.gz");
    }

    #[test]
    fn test_list_empty_when_dir_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager_with_keep(&dir.path().join("nope"), 3);
        assert!(manager.list().expect("list").is_empty());
    }

    #[test]
    fn test_prune_keeps_newest() {
        let dir = tempfile::tempdir().expect("tempdir");
        for stamp in [
            "20240101-000000",
            "20240102-000000",
            "20240103-000000",
            "20240104-000000",
        ] {
            touch_archive(dir.path(), stamp);
        }

        let manager = manager_with_keep(dir.path(), 2);
        let removed = manager.prune(None).expect("prune");

        assert_eq!(removed, 2);
        let remaining = manager.list().expect("list");
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].file_name, "backup-20240104-000000.tar.gz");
        assert_eq!(remaining[1].file_name, "backup-20240103-000000.tar.gz");

        // Manifests of pruned archives are gone too.
        assert!(!dir.path().join("backup-20240101-000000.manifest.json").exists());
    }

    #[test]
    fn test_prune_never_deletes_always_keep() {
        let dir = tempfile::tempdir().expect("tempdir");
        for stamp in ["20240101-000000", "20240102-000000", "20240103-000000"] {
            touch_archive(dir.path(), stamp);
        }

        let manager = manager_with_keep(dir.path(), 1);
        manager
            .prune(Some("backup-20240101-000000.tar.gz"))
            .expect("prune");

        let names: Vec<_> = manager
            .list()
            .expect("list")
            .into_iter()
            .map(|b| b.file_name)
            .collect();
        assert!(names.contains(&"backup-20240101-000000.tar.gz".to_owned()));
        assert!(names.contains(&"backup-20240103-000000.tar.gz".to_owned()));
        assert!(!names.contains(&"backup-20240102-000000.tar.gz".to_owned()));
    }

    #[tokio::test]
    async fn test_create_and_restore_round_trip() {
        let project = tempfile::tempdir().expect("tempdir");
        let settings = DeploySettings {
            project_dir: project.path().to_path_buf(),
            ..DeploySettings::default()
        };

        std::fs::create_dir_all(settings.data_path()).expect("mkdir");
        std::fs::write(settings.data_path().join("subscribers.db"), b"db").expect("write");
        std::fs::write(settings.env_path(), b"TELEGRAM_TOKEN=t\n").expect("write");

        let manager = BackupManager::new(&settings);
        let archive = manager.create(&settings).await.expect("create");
        assert!(archive.is_file());

        let manifest = manager
            .manifest_for(&archive.file_name().expect("name").to_string_lossy())
            .expect("manifest");
        assert!(manifest.included.contains(&"data".to_owned()));
        assert!(manifest.included.contains(&".env".to_owned()));

        // Wipe state, then restore it from the archive.
        std::fs::remove_dir_all(settings.data_path()).expect("rm");
        std::fs::remove_file(settings.env_path()).expect("rm");

        manager
            .restore(&settings, &archive)
            .await
            .expect("restore");

        assert_eq!(
            std::fs::read(settings.data_path().join("subscribers.db")).expect("read"),
            b"db"
        );
        assert!(settings.env_path().is_file());
    }

    #[tokio::test]
    async fn test_create_fails_with_nothing_to_back_up() {
        let project = tempfile::tempdir().expect("tempdir");
        let settings = DeploySettings {
            project_dir: project.path().to_path_buf(),
            ..DeploySettings::default()
        };

        let manager = BackupManager::new(&settings);
        let result = manager.create(&settings).await;
        assert!(matches!(result, Err(BackupError::NothingToBackUp)));
    }

    #[tokio::test]
    async fn test_restore_rejects_missing_archive() {
        let project = tempfile::tempdir().expect("tempdir");
        let settings = DeploySettings {
            project_dir: project.path().to_path_buf(),
            ..DeploySettings::default()
        };

        let manager = BackupManager::new(&settings);
        let result = manager
            .restore(&settings, Path::new("/nonexistent/backup.tar.gz"))
            .await;
        assert!(matches!(result, Err(BackupError::ArchiveMissing(_))));
    }

    #[tokio::test]
    async fn test_restore_rejects_invalid_archive() {
        let project = tempfile::tempdir().expect("tempdir");
        let settings = DeploySettings {
            project_dir: project.path().to_path_buf(),
            ..DeploySettings::default()
        };

        let bogus = project.path().join("backup-20240101-000000.tar.gz");
        std::fs::write(&bogus, b"not a tarball").expect("write");

        let manager = BackupManager::new(&settings);
        let result = manager.restore(&settings, &bogus).await;
        assert!(matches!(result, Err(BackupError::InvalidArchive(_))));
    }
}
