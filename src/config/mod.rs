//! Configuration module for the deployment manager.
//!
//! Handles deployment settings (paths, service name, retention) and the
//! container's `.env` file schema.

mod env_file;
mod settings;

pub use env_file::{EnvFile, EnvFileError, OPTIONAL_KEYS, REQUIRED_KEYS};
pub use settings::{ConfigError, DeploySettings};

/// File mode required on the SSH private key before it is mounted.
pub const SSH_KEY_MODE: u32 = 0o600;

/// File mode required on the SSH key directory.
pub const SSH_DIR_MODE: u32 = 0o700;
