//! Container environment file parsing and validation.
//!
//! The bot container receives its runtime configuration through an `.env`
//! file. The deployment manager never interprets the values; it only checks
//! that the keys the bot needs are present before the container starts.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

/// Keys the bot cannot start without.
pub const REQUIRED_KEYS: &[&str] = &[
    "TELEGRAM_TOKEN",
    "ADMIN_USER_ID",
    "REPO_URL",
    "GIT_USERNAME",
    "GIT_EMAIL",
    "GIT_TOKEN",
];

/// Keys the bot reads but has built-in defaults for.
pub const OPTIONAL_KEYS: &[&str] = &[
    "PROJECT_PATH",
    "INDEX_HTML_PATH",
    "DATABASE_PATH",
    "HOSTING_PATH",
    "HOSTING_CERT",
    "HOSTING_PASSPHRASE",
    "HOSTING_DIR",
];

/// Errors that can occur while loading or validating an env file.
#[derive(Debug, Error)]
pub enum EnvFileError {
    #[error("Environment file not found: {0}")]
    NotFound(String),

    #[error("Line {line}: expected KEY=VALUE, got: {content}")]
    Malformed { line: usize, content: String },

    #[error("Line {line}: invalid key name: {key}")]
    InvalidKey { line: usize, key: String },

    #[error("Missing required key: {0}")]
    MissingKey(&'static str),

    #[error("Required key has an empty value: {0}")]
    EmptyValue(&'static str),

    #[error("Failed to read environment file: {0}")]
    IoError(#[from] std::io::Error),
}

/// A parsed container env file.
///
/// Unknown keys are preserved: the operator may configure variables this
/// tool knows nothing about.
#[derive(Debug, Clone, Default)]
pub struct EnvFile {
    entries: HashMap<String, String>,
}

impl EnvFile {
    /// Loads and parses an env file.
    ///
    /// Accepts `KEY=VALUE` lines, blank lines, `#` comments and an optional
    /// `export ` prefix. Surrounding single or double quotes on values are
    /// stripped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable or malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EnvFileError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EnvFileError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses env file content.
    ///
    /// # Errors
    ///
    /// Returns an error on the first malformed line.
    pub fn parse(content: &str) -> Result<Self, EnvFileError> {
        let mut entries = HashMap::new();

        for (i, raw_line) in content.lines().enumerate() {
            let line_no = i + 1;
            let line = raw_line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let line = line.strip_prefix("export ").unwrap_or(line).trim_start();

            let Some((key, value)) = line.split_once('=') else {
                return Err(EnvFileError::Malformed {
                    line: line_no,
                    content: raw_line.to_owned(),
                });
            };

            let key = key.trim();
            if !is_valid_key(key) {
                return Err(EnvFileError::InvalidKey {
                    line: line_no,
                    key: key.to_owned(),
                });
            }

            entries.insert(key.to_owned(), unquote(value.trim()).to_owned());
        }

        Ok(Self { entries })
    }

    /// Gets the value for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Checks whether a key is present with a non-empty value.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !v.is_empty())
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks if the file defined no variables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validates that all required keys are present and non-empty.
    ///
    /// # Errors
    ///
    /// Returns the first missing or empty required key.
    pub fn validate(&self) -> Result<(), EnvFileError> {
        for &key in REQUIRED_KEYS {
            match self.get(key) {
                None => return Err(EnvFileError::MissingKey(key)),
                Some(v) if v.is_empty() => return Err(EnvFileError::EmptyValue(key)),
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Returns per-key validation results for all required keys.
    #[must_use]
    pub fn validate_all(&self) -> Vec<(&'static str, Result<(), EnvFileError>)> {
        REQUIRED_KEYS
            .iter()
            .map(|&key| {
                let result = match self.get(key) {
                    None => Err(EnvFileError::MissingKey(key)),
                    Some(v) if v.is_empty() => Err(EnvFileError::EmptyValue(key)),
                    Some(_) => Ok(()),
                };
                (key, result)
            })
            .collect()
    }

    /// Lists optional keys that are not set.
    #[must_use]
    pub fn missing_optional(&self) -> Vec<&'static str> {
        OPTIONAL_KEYS
            .iter()
            .filter(|&&key| !self.has(key))
            .copied()
            .collect()
    }

    /// Renders an example env file for operators to fill in.
    #[must_use]
    pub fn example() -> String {
        let mut out = String::from("# Telegram bot credentials\n");
        out.push_str("TELEGRAM_TOKEN=\n");
        out.push_str("ADMIN_USER_ID=\n");
        out.push('\n');
        out.push_str("# Git repository holding the published schedule\n");
        out.push_str("REPO_URL=https://github.com/user/schedule-site\n");
        out.push_str("GIT_USERNAME=\n");
        out.push_str("GIT_EMAIL=\n");
        out.push_str("GIT_TOKEN=\n");
        out.push('\n');
        out.push_str("# Paths inside the container (defaults usually fine)\n");
        out.push_str("#PROJECT_PATH=/app/project\n");
        out.push_str("#INDEX_HTML_PATH=/app/project/index.html\n");
        out.push_str("#DATABASE_PATH=/app/data/subscribers.db\n");
        out.push('\n');
        out.push_str("# Hosting sync over SSH (leave unset to disable)\n");
        out.push_str("#HOSTING_PATH=user@hosting.example.com\n");
        out.push_str("#HOSTING_CERT=/app/ssh/id_rsa\n");
        out.push_str("#HOSTING_PASSPHRASE=\n");
        out.push_str("#HOSTING_DIR=/home/user/public_html\n");
        out
    }
}

/// Checks that a key looks like a shell variable name.
fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with(|c: char| c.is_ascii_digit())
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Strips one matching pair of surrounding quotes.
fn unquote(value: &str) -> &str {
    if value.len() >= 2 {
        let bytes = value.as_bytes();
        if (bytes[0] == b'"' && bytes[value.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[value.len() - 1] == b'\'')
        {
            return &value[1..value.len() - 1];
        }
    }
    value
}
