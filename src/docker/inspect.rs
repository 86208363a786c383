//! Container state inspection.
//!
//! Reads the bot container's state through `docker inspect` and exposes it
//! as typed data for the status report and start/stop checks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::runner::{self, ExecError};

/// Errors that can occur while inspecting the container.
#[derive(Debug, Error)]
pub enum InspectError {
    #[error("Docker daemon is not reachable: {0}")]
    DaemonUnreachable(String),

    #[error("Failed to parse 'docker inspect' output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// State of the bot container as Docker reports it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Container is up.
    Running,
    /// Container is being restarted by the restart policy.
    Restarting,
    /// Container is paused.
    Paused,
    /// Container exists but has exited.
    Exited,
    /// Container was created but never started.
    Created,
    /// Daemon considers the container defunct.
    Dead,
    /// No container with the configured name exists.
    Missing,
}

impl ContainerState {
    fn from_docker(status: &str) -> Self {
        match status {
            "running" => Self::Running,
            "restarting" => Self::Restarting,
            "paused" => Self::Paused,
            "created" => Self::Created,
            "dead" => Self::Dead,
            _ => Self::Exited,
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Restarting => "restarting",
            Self::Paused => "paused",
            Self::Exited => "exited",
            Self::Created => "created",
            Self::Dead => "dead",
            Self::Missing => "missing",
        };
        write!(f, "{s}")
    }
}

/// Snapshot of the container's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStatus {
    /// Current state.
    pub state: ContainerState,

    /// When the container was last started.
    pub started_at: Option<DateTime<Utc>>,

    /// Exit code of the last run (meaningful when exited).
    pub exit_code: Option<i32>,

    /// How often the restart policy has restarted the container.
    pub restart_count: u32,

    /// Whether the last exit was an OOM kill.
    pub oom_killed: bool,
}

impl ContainerStatus {
    /// Status for a container that does not exist.
    #[must_use]
    pub const fn missing() -> Self {
        Self {
            state: ContainerState::Missing,
            started_at: None,
            exit_code: None,
            restart_count: 0,
            oom_killed: false,
        }
    }

    /// Whether the container is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }

    /// Uptime in seconds, if running.
    #[must_use]
    pub fn uptime_secs(&self) -> Option<u64> {
        if !self.is_running() {
            return None;
        }
        let started = self.started_at?;
        let secs = Utc::now().signed_duration_since(started).num_seconds();
        u64::try_from(secs).ok()
    }

    /// Human-readable uptime.
    #[must_use]
    pub fn uptime_human(&self) -> String {
        self.uptime_secs()
            .map_or_else(|| "not running".to_owned(), format_duration)
    }
}

/// Shape of `{{json .State}}` in `docker inspect` output.
#[derive(Debug, Deserialize)]
struct RawState {
    #[serde(rename = "Status")]
    status: String,

    #[serde(rename = "ExitCode")]
    exit_code: i32,

    #[serde(rename = "OOMKilled", default)]
    oom_killed: bool,

    #[serde(rename = "StartedAt")]
    started_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawInspect {
    #[serde(rename = "State")]
    state: RawState,

    #[serde(rename = "RestartCount", default)]
    restart_count: u32,
}

/// Format string handed to `docker inspect`; reassembles the two fields we
/// need into one JSON object.
const INSPECT_FORMAT: &str = r#"{"State":{{json .State}},"RestartCount":{{json .RestartCount}}}"#;

/// Inspects the named container.
///
/// A container that does not exist is reported as
/// [`ContainerState::Missing`], not as an error.
///
/// # Errors
///
/// Returns an error if `docker` cannot be run or its output cannot be
/// parsed.
pub async fn container_status(name: &str) -> Result<ContainerStatus, InspectError> {
    let output =
        runner::run_capture("docker", &["inspect", "--format", INSPECT_FORMAT, name], None).await?;

    if !output.success() {
        if output.stderr.contains("No such object") {
            return Ok(ContainerStatus::missing());
        }
        return Err(ExecError::Failed {
            program: "docker".to_owned(),
            code: output.code,
            stderr: output.stderr.trim().to_owned(),
        }
        .into());
    }

    parse_inspect(&output.stdout)
}

/// Parses the reassembled inspect JSON.
fn parse_inspect(json: &str) -> Result<ContainerStatus, InspectError> {
    let raw: RawInspect = serde_json::from_str(json.trim())?;

    let state = ContainerState::from_docker(&raw.state.status);

    // Docker reports a zero-value timestamp for never-started containers.
    let started_at = raw
        .state
        .started_at
        .as_deref()
        .filter(|s| !s.starts_with("0001-"))
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let exit_code = match state {
        ContainerState::Exited | ContainerState::Dead => Some(raw.state.exit_code),
        _ => None,
    };

    Ok(ContainerStatus {
        state,
        started_at,
        exit_code,
        restart_count: raw.restart_count,
        oom_killed: raw.state.oom_killed,
    })
}

/// Checks that the Docker daemon answers.
///
/// # Errors
///
/// Returns [`InspectError::DaemonUnreachable`] with the daemon's own words
/// when it does not.
pub async fn check_daemon() -> Result<(), InspectError> {
    let output =
        runner::run_capture("docker", &["info", "--format", "{{.ServerVersion}}"], None).await?;

    if output.success() {
        Ok(())
    } else {
        Err(InspectError::DaemonUnreachable(
            output.stderr.trim().to_owned(),
        ))
    }
}

/// Formats a duration in seconds to a human-readable string.
fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUNNING_JSON: &str = r#"{
        "State": {
            "Status": "running",
            "Running": true,
            "OOMKilled": false,
            "ExitCode": 0,
            "StartedAt": "2024-05-01T10:00:00.123456789Z",
            "FinishedAt": "0001-01-01T00:00:00Z"
        },
        "RestartCount": 2
    }"#;

    const EXITED_JSON: &str = r#"{
        "State": {
            "Status": "exited",
            "Running": false,
            "OOMKilled": true,
            "ExitCode": 137,
            "StartedAt": "2024-05-01T10:00:00Z",
            "FinishedAt": "2024-05-01T11:00:00Z"
        },
        "RestartCount": 0
    }"#;

    #[test]
    fn test_parse_running() {
        let status = parse_inspect(RUNNING_JSON).expect("should parse");
        assert_eq!(status.state, ContainerState::Running);
        assert!(status.is_running());
        assert!(status.started_at.is_some());
        assert_eq!(status.exit_code, None);
        assert_eq!(status.restart_count, 2);
    }

    #[test]
    fn test_parse_exited_oom() {
        let status = parse_inspect(EXITED_JSON).expect("should parse");
        assert_eq!(status.state, ContainerState::Exited);
        assert_eq!(status.exit_code, Some(137));
        assert!(status.oom_killed);
        assert_eq!(status.uptime_secs(), None);
    }

    #[test]
    fn test_parse_never_started_timestamp() {
        let json = r#"{
            "State": {
                "Status": "created",
                "ExitCode": 0,
                "StartedAt": "0001-01-01T00:00:00Z"
            },
            "RestartCount": 0
        }"#;
        let status = parse_inspect(json).expect("should parse");
        assert_eq!(status.state, ContainerState::Created);
        assert!(status.started_at.is_none());
    }

    #[test]
    fn test_missing_status() {
        let status = ContainerStatus::missing();
        assert_eq!(status.state, ContainerState::Missing);
        assert!(!status.is_running());
        assert_eq!(status.uptime_human(), "not running");
    }

    #[test]
    fn test_state_from_docker() {
        assert_eq!(ContainerState::from_docker("running"), ContainerState::Running);
        assert_eq!(ContainerState::from_docker("paused"), ContainerState::Paused);
        assert_eq!(ContainerState::from_docker("weird"), ContainerState::Exited);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3665), "1h 1m");
        assert_eq!(format_duration(90000), "1d 1h");
    }
}
