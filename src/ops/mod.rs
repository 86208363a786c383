//! Operational routines behind the CLI subcommands.
//!
//! Each routine is a sequence of external tool invocations with the exit
//! status checked at every step; the first failure stops the routine.

pub mod backup;
pub mod lifecycle;
pub mod permissions;
pub mod setup;
pub mod status;

use thiserror::Error;

use crate::config::EnvFileError;
use crate::docker::{ComposeError, ExecError, InspectError};

/// Errors from operational routines.
#[derive(Debug, Error)]
pub enum OpsError {
    #[error("Container '{container}' failed to start: {detail}")]
    StartFailed { container: String, detail: String },

    #[error("{0}")]
    RootRequired(&'static str),

    #[error("Environment file problem: {0}")]
    EnvFile(#[from] EnvFileError),

    #[error(transparent)]
    Compose(#[from] ComposeError),

    #[error(transparent)]
    Inspect(#[from] InspectError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Backup(#[from] backup::BackupError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
