//! Compose CLI wrapper.
//!
//! Drives the bot service through `docker compose`. Current Debian and
//! Ubuntu ship Compose as a docker plugin (`docker compose`); older hosts
//! still have the standalone `docker-compose` binary, so both are probed.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info};

use super::runner::{self, ExecError};
use crate::config::DeploySettings;

/// Errors that can occur when driving Compose.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error(
        "Neither 'docker compose' nor 'docker-compose' is available. \
         Run 'botops setup' to install Docker."
    )]
    ComposeMissing,

    #[error("Compose file not found: {}", .0.display())]
    ComposeFileMissing(PathBuf),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Which Compose flavor the host provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeFlavor {
    /// `docker compose` (v2 plugin).
    Plugin,
    /// Standalone `docker-compose` binary.
    Standalone,
}

/// Client for the Compose CLI, bound to one compose file.
#[derive(Debug)]
pub struct ComposeClient {
    flavor: ComposeFlavor,
    compose_file: PathBuf,
    project_dir: PathBuf,
    service: String,
}

impl ComposeClient {
    /// Detects the available Compose flavor and binds to the deployment.
    ///
    /// # Errors
    ///
    /// Returns an error if the compose file is missing or no Compose
    /// implementation is installed.
    pub async fn detect(settings: &DeploySettings) -> Result<Self, ComposeError> {
        let compose_file = settings.compose_path();
        if !compose_file.exists() {
            return Err(ComposeError::ComposeFileMissing(compose_file));
        }

        let flavor = Self::detect_flavor().await?;
        debug!("Using compose flavor: {:?}", flavor);

        Ok(Self {
            flavor,
            compose_file,
            project_dir: settings.project_dir.clone(),
            service: settings.service.clone(),
        })
    }

    /// Probes for `docker compose`, then `docker-compose`.
    async fn detect_flavor() -> Result<ComposeFlavor, ComposeError> {
        if let Ok(output) = runner::run_capture("docker", &["compose", "version"], None).await
            && output.success()
        {
            return Ok(ComposeFlavor::Plugin);
        }

        if runner::check_available("docker-compose").await.is_ok() {
            return Ok(ComposeFlavor::Standalone);
        }

        Err(ComposeError::ComposeMissing)
    }

    /// Returns the detected flavor.
    #[must_use]
    pub const fn flavor(&self) -> ComposeFlavor {
        self.flavor
    }

    /// Builds the invocation for a compose subcommand.
    fn invocation<'a>(&'a self, tail: &[&'a str]) -> (&'static str, Vec<&'a str>) {
        let file = self
            .compose_file
            .to_str()
            .unwrap_or("docker-compose.yml");

        match self.flavor {
            ComposeFlavor::Plugin => {
                let mut args = vec!["compose", "-f", file];
                args.extend_from_slice(tail);
                ("docker", args)
            }
            ComposeFlavor::Standalone => {
                let mut args = vec!["-f", file];
                args.extend_from_slice(tail);
                ("docker-compose", args)
            }
        }
    }

    /// Runs a compose subcommand, capturing output.
    async fn run(&self, tail: &[&str]) -> Result<String, ComposeError> {
        let (program, args) = self.invocation(tail);
        Ok(runner::run_ok(program, &args, Some(&self.project_dir)).await?)
    }

    /// `up --detach`, creating or recreating the bot container.
    ///
    /// # Errors
    ///
    /// Returns an error if Compose fails.
    pub async fn up(&self, force_recreate: bool) -> Result<(), ComposeError> {
        info!("Starting service '{}'", self.service);
        let mut tail = vec!["up", "--detach"];
        if force_recreate {
            tail.push("--force-recreate");
        }
        self.run(&tail).await?;
        Ok(())
    }

    /// `down`, stopping and removing the container.
    ///
    /// # Errors
    ///
    /// Returns an error if Compose fails.
    pub async fn down(&self) -> Result<(), ComposeError> {
        info!("Stopping service '{}'", self.service);
        self.run(&["down"]).await?;
        Ok(())
    }

    /// `pull` for the bot service.
    ///
    /// # Errors
    ///
    /// Returns an error if Compose fails.
    pub async fn pull(&self) -> Result<(), ComposeError> {
        info!("Pulling images for '{}'", self.service);
        self.run(&["pull", &self.service]).await?;
        Ok(())
    }

    /// `build` for the bot service.
    ///
    /// # Errors
    ///
    /// Returns an error if the build fails.
    pub async fn build(&self) -> Result<(), ComposeError> {
        info!("Building image for '{}'", self.service);
        let (program, args) = self.invocation(&["build", &self.service]);
        runner::run_passthrough(program, &args, Some(&self.project_dir)).await?;
        Ok(())
    }

    /// `logs`, streamed to the terminal.
    ///
    /// With `follow`, this blocks until interrupted.
    ///
    /// # Errors
    ///
    /// Returns an error if Compose fails.
    pub async fn logs(&self, follow: bool, tail_lines: Option<u32>) -> Result<(), ComposeError> {
        let tail_str;
        let mut tail = vec!["logs"];
        if let Some(n) = tail_lines {
            tail_str = n.to_string();
            tail.push("--tail");
            tail.push(&tail_str);
        }
        if follow {
            tail.push("--follow");
        }
        tail.push(&self.service);

        let (program, args) = self.invocation(&tail);
        runner::run_passthrough(program, &args, Some(&self.project_dir)).await?;
        Ok(())
    }

    /// `ps` output for the deployment.
    ///
    /// # Errors
    ///
    /// Returns an error if Compose fails.
    pub async fn ps(&self) -> Result<String, ComposeError> {
        self.run(&["ps"]).await
    }
}

/// Renders the compose file describing the bot container.
///
/// One service, state mounted from the project directory, SSH key read-only,
/// bounded memory and rotated container logs.
#[must_use]
pub fn compose_template(settings: &DeploySettings) -> String {
    format!(
        r#"services:
  {service}:
    build: .
    image: schedule-bot:latest
    container_name: {container}
    restart: unless-stopped
    env_file:
      - {env_file}
    volumes:
      - ./{data}:/app/data
      - ./{ssh}:/app/ssh:ro
    mem_limit: 512m
    logging:
      driver: json-file
      options:
        max-size: "10m"
        max-file: "3"
"#,
        service = settings.service,
        container = settings.container,
        env_file = settings.env_file.display(),
        data = settings.data_dir.display(),
        ssh = settings.ssh_dir.display(),
    )
}

/// Renders the Dockerfile for the bot image.
///
/// The bot is a Python application needing tesseract for OCR of schedule
/// images, git for publishing, and an SSH client for hosting sync.
#[must_use]
pub fn dockerfile_template() -> String {
    r#"FROM python:3.11-slim

RUN apt-get update && apt-get install -y --no-install-recommends \
        tesseract-ocr \
        tesseract-ocr-rus \
        git \
        openssh-client \
    && rm -rf /var/lib/apt/lists/*

WORKDIR /app

COPY requirements.txt .
RUN pip install --no-cache-dir -r requirements.txt

COPY bot/ .

CMD ["python", "bot.py"]
"#
    .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(flavor: ComposeFlavor) -> ComposeClient {
        ComposeClient {
            flavor,
            compose_file: PathBuf::from("docker-compose.yml"),
            project_dir: PathBuf::from("."),
            service: "bot".to_owned(),
        }
    }

    #[test]
    fn test_invocation_plugin() {
        let c = client(ComposeFlavor::Plugin);
        let (program, args) = c.invocation(&["up", "--detach"]);
        assert_eq!(program, "docker");
        assert_eq!(
            args,
            vec!["compose", "-f", "docker-compose.yml", "up", "--detach"]
        );
    }

    #[test]
    fn test_invocation_standalone() {
        let c = client(ComposeFlavor::Standalone);
        let (program, args) = c.invocation(&["down"]);
        assert_eq!(program, "docker-compose");
        assert_eq!(args, vec!["-f", "docker-compose.yml", "down"]);
    }

    #[test]
    fn test_compose_template_mentions_mounts() {
        let settings = DeploySettings::default();
        let yaml = compose_template(&settings);

        assert!(yaml.contains("container_name: schedule-bot"));
        assert!(yaml.contains("restart: unless-stopped"));
        assert!(yaml.contains("./data:/app/data"));
        assert!(yaml.contains("./ssh:/app/ssh:ro"));
        assert!(yaml.contains("- .env"));
    }

    #[test]
    fn test_dockerfile_template_shape() {
        let dockerfile = dockerfile_template();
        assert!(dockerfile.starts_with("FROM python:"));
        assert!(dockerfile.contains("tesseract-ocr"));
        assert!(dockerfile.contains(r#"CMD ["python", "bot.py"]"#));
    }

    #[test]
    fn test_compose_template_custom_service() {
        let settings = DeploySettings {
            service: "schedule".to_owned(),
            ..DeploySettings::default()
        };
        let yaml = compose_template(&settings);
        assert!(yaml.contains("  schedule:\n"));
    }
}
