//! Deployment settings resolved from the environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Settings describing the managed deployment.
///
/// All paths are stored relative to the project directory and resolved
/// through [`DeploySettings::resolve`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySettings {
    /// Directory containing the compose file, data and backups.
    pub project_dir: PathBuf,

    /// Compose file describing the bot container.
    #[serde(default = "default_compose_file")]
    pub compose_file: PathBuf,

    /// Environment file handed to the container.
    #[serde(default = "default_env_file")]
    pub env_file: PathBuf,

    /// Directory with the bot's mutable state (subscriber database, images).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory holding backup archives.
    #[serde(default = "default_backups_dir")]
    pub backups_dir: PathBuf,

    /// Directory with the SSH key used for hosting sync.
    #[serde(default = "default_ssh_dir")]
    pub ssh_dir: PathBuf,

    /// Compose service name of the bot.
    #[serde(default = "default_service")]
    pub service: String,

    /// Container name assigned by the compose file.
    #[serde(default = "default_container")]
    pub container: String,

    /// How many backup archives to keep when pruning.
    #[serde(default = "default_backup_keep")]
    pub backup_keep: usize,

    /// How long to wait for the container to reach the running state.
    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: u64,
}

fn default_compose_file() -> PathBuf {
    PathBuf::from("docker-compose.yml")
}

fn default_env_file() -> PathBuf {
    PathBuf::from(".env")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_backups_dir() -> PathBuf {
    PathBuf::from("backups")
}

fn default_ssh_dir() -> PathBuf {
    PathBuf::from("ssh")
}

fn default_service() -> String {
    "bot".to_owned()
}

fn default_container() -> String {
    "schedule-bot".to_owned()
}

fn default_backup_keep() -> usize {
    7
}

fn default_start_timeout() -> u64 {
    30
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            compose_file: default_compose_file(),
            env_file: default_env_file(),
            data_dir: default_data_dir(),
            backups_dir: default_backups_dir(),
            ssh_dir: default_ssh_dir(),
            service: default_service(),
            container: default_container(),
            backup_keep: default_backup_keep(),
            start_timeout_secs: default_start_timeout(),
        }
    }
}

impl DeploySettings {
    /// Creates settings from environment variables with defaults.
    #[must_use]
    pub fn from_env_with_defaults(project_dir: PathBuf) -> Self {
        Self {
            project_dir,
            compose_file: env_path("BOT_COMPOSE_FILE", default_compose_file),
            env_file: env_path("BOT_ENV_FILE", default_env_file),
            data_dir: env_path("BOT_DATA_DIR", default_data_dir),
            backups_dir: env_path("BOT_BACKUPS_DIR", default_backups_dir),
            ssh_dir: env_path("BOT_SSH_DIR", default_ssh_dir),
            service: std::env::var("BOT_SERVICE").unwrap_or_else(|_| default_service()),
            container: std::env::var("BOT_CONTAINER").unwrap_or_else(|_| default_container()),
            backup_keep: std::env::var("BOT_BACKUP_KEEP")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_backup_keep),
            start_timeout_secs: std::env::var("BOT_START_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_start_timeout),
        }
    }

    /// Resolves a configured path against the project directory.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    /// Absolute path of the compose file.
    #[must_use]
    pub fn compose_path(&self) -> PathBuf {
        self.resolve(&self.compose_file)
    }

    /// Absolute path of the container's env file.
    #[must_use]
    pub fn env_path(&self) -> PathBuf {
        self.resolve(&self.env_file)
    }

    /// Absolute path of the data directory.
    #[must_use]
    pub fn data_path(&self) -> PathBuf {
        self.resolve(&self.data_dir)
    }

    /// Absolute path of the backups directory.
    #[must_use]
    pub fn backups_path(&self) -> PathBuf {
        self.resolve(&self.backups_dir)
    }

    /// Absolute path of the SSH key directory.
    #[must_use]
    pub fn ssh_path(&self) -> PathBuf {
        self.resolve(&self.ssh_dir)
    }

    /// Absolute path of the SSH private key.
    #[must_use]
    pub fn ssh_key_path(&self) -> PathBuf {
        self.ssh_path().join("id_rsa")
    }

    /// Checks that the project directory exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is missing.
    pub fn ensure_project_dir(&self) -> Result<(), ConfigError> {
        if self.project_dir.is_dir() {
            Ok(())
        } else {
            Err(ConfigError::ProjectDirMissing(self.project_dir.clone()))
        }
    }
}

fn env_path(var: &str, default: fn() -> PathBuf) -> PathBuf {
    std::env::var(var).map_or_else(|_| default(), PathBuf::from)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Project directory does not exist: {}", .0.display())]
    ProjectDirMissing(PathBuf),
}
