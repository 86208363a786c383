//! External command execution.
//!
//! Every routine in this tool is ultimately a sequence of invocations of
//! host tooling (`docker`, `apt-get`, `tar`, `usermod`). This module is the
//! single place where those invocations happen, so exit-status inspection
//! and error mapping stay uniform.

use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors that can occur when running an external command.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("'{0}' not found. Is it installed and on PATH?")]
    NotFound(String),

    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' failed with exit code {code}:\n{stderr}")]
    Failed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("'{program}' was terminated by a signal")]
    Terminated { program: String },
}

/// Captured result of a finished command.
#[derive(Debug)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

impl CommandOutput {
    /// Whether the command exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs a command and captures its output without judging the exit status.
///
/// # Errors
///
/// Returns an error if the command cannot be started or was killed by a
/// signal.
pub async fn run_capture(
    program: &str,
    args: &[&str],
    dir: Option<&Path>,
) -> Result<CommandOutput, ExecError> {
    debug!("Running: {} {}", program, args.join(" "));

    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }

    let output = cmd.output().await.map_err(|e| map_spawn_error(program, e))?;

    let Some(code) = output.status.code() else {
        return Err(ExecError::Terminated {
            program: program.to_owned(),
        });
    };

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        code,
    })
}

/// Runs a command and returns its trimmed stdout, failing on non-zero exit.
///
/// # Errors
///
/// Returns an error if the command cannot be started or exits non-zero; the
/// captured stderr is carried in the error.
pub async fn run_ok(program: &str, args: &[&str], dir: Option<&Path>) -> Result<String, ExecError> {
    let output = run_capture(program, args, dir).await?;

    if output.success() {
        Ok(output.stdout.trim().to_owned())
    } else {
        Err(ExecError::Failed {
            program: program.to_owned(),
            code: output.code,
            stderr: output.stderr.trim().to_owned(),
        })
    }
}

/// Runs a command with inherited stdio, for long or interactive invocations
/// such as `docker compose logs --follow`.
///
/// # Errors
///
/// Returns an error if the command cannot be started or exits non-zero.
pub async fn run_passthrough(
    program: &str,
    args: &[&str],
    dir: Option<&Path>,
) -> Result<(), ExecError> {
    debug!("Running (passthrough): {} {}", program, args.join(" "));

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }

    let status = cmd.status().await.map_err(|e| map_spawn_error(program, e))?;

    match status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(ExecError::Failed {
            program: program.to_owned(),
            code,
            stderr: String::new(),
        }),
        None => Err(ExecError::Terminated {
            program: program.to_owned(),
        }),
    }
}

/// Checks that a tool can be invoked at all.
///
/// # Errors
///
/// Returns [`ExecError::NotFound`] if the tool is missing from PATH.
pub async fn check_available(program: &str) -> Result<(), ExecError> {
    let result = Command::new(program)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) => Err(map_spawn_error(program, e)),
    }
}

fn map_spawn_error(program: &str, err: std::io::Error) -> ExecError {
    if err.kind() == std::io::ErrorKind::NotFound {
        ExecError::NotFound(program.to_owned())
    } else {
        ExecError::Spawn {
            program: program.to_owned(),
            source: err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_capture_success() {
        let output = run_capture("true", &[], None).await.expect("should run");
        assert!(output.success());
        assert_eq!(output.code, 0);
    }

    #[tokio::test]
    async fn test_run_capture_failure_code() {
        let output = run_capture("false", &[], None).await.expect("should run");
        assert!(!output.success());
        assert_ne!(output.code, 0);
    }

    #[tokio::test]
    async fn test_run_ok_captures_stdout() {
        let stdout = run_ok("echo", &["hello"], None).await.expect("should run");
        assert_eq!(stdout, "hello");
    }

    #[tokio::test]
    async fn test_missing_tool_maps_to_not_found() {
        let result = run_ok("definitely-not-a-real-tool-xyz", &[], None).await;
        assert!(matches!(result, Err(ExecError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_check_available() {
        assert!(check_available("sh").await.is_ok());
        assert!(matches!(
            check_available("definitely-not-a-real-tool-xyz").await,
            Err(ExecError::NotFound(_))
        ));
    }
}
