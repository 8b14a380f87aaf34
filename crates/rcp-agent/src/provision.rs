//! Host provisioning performed before the tunnel starts.
//!
//! Downloads auxiliary files to their destinations and enables/starts the
//! configured systemd units. Any failure here is fatal to the agent.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use tokio::process::Command;
use tracing::info;

use rcp_core::{AgentConfig, AuxiliaryFile};

pub struct Provisioner {
    http: reqwest::Client,
    systemctl: PathBuf,
}

impl Provisioner {
    pub fn new() -> anyhow::Result<Self> {
        // reqwest is built with rustls-no-provider; `Err` only means a
        // provider is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(http))
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            systemctl: PathBuf::from("systemctl"),
        }
    }

    #[cfg(test)]
    #[must_use]
    pub fn with_systemctl(mut self, program: impl Into<PathBuf>) -> Self {
        self.systemctl = program.into();
        self
    }

    /// Download every file, then enable and start every service.
    pub async fn run(&self, config: &AgentConfig) -> anyhow::Result<()> {
        for file in &config.files {
            self.download(file).await?;
        }
        for service in &config.services {
            self.start_service(service).await?;
        }
        Ok(())
    }

    pub async fn download(&self, file: &AuxiliaryFile) -> anyhow::Result<()> {
        info!(url = %file.url, destination = %file.destination.display(), "Downloading file");
        let mode = file.mode_bits()?;

        let body = self
            .http
            .get(&file.url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .with_context(|| format!("Failed to download file from URL '{}'", file.url))?
            .bytes()
            .await
            .with_context(|| format!("Failed to read body from URL '{}'", file.url))?;

        write_file(&file.destination, &body, mode).await?;
        info!(destination = %file.destination.display(), bytes = body.len(), "File installed");
        Ok(())
    }

    pub async fn start_service(&self, unit: &str) -> anyhow::Result<()> {
        info!(unit, "Enabling and starting service");
        self.systemctl(&["enable", unit])
            .await
            .with_context(|| format!("Failed to enable {unit}"))?;
        self.systemctl(&["start", "--no-block", unit])
            .await
            .with_context(|| format!("Failed to start {unit}"))?;
        Ok(())
    }

    async fn systemctl(&self, args: &[&str]) -> anyhow::Result<()> {
        let output = Command::new(&self.systemctl)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.systemctl.display()))?;
        if !output.status.success() {
            bail!(
                "{} {} exited with {}: {}",
                self.systemctl.display(),
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Write `content` to `destination`, creating parent directories and
/// applying `mode`.
pub async fn write_file(destination: &Path, content: &[u8], mode: u32) -> anyhow::Result<()> {
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create parent directory '{}'", parent.display())
        })?;
    }
    tokio::fs::write(destination, content)
        .await
        .with_context(|| format!("Failed to write file '{}'", destination.display()))?;
    set_mode(destination, mode).await
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .with_context(|| format!("Failed to set mode {mode:o} on '{}'", path.display()))
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn offline_provisioner() -> Provisioner {
        let _ = rustls::crypto::ring::default_provider().install_default();
        Provisioner::with_client(reqwest::Client::builder().no_proxy().build().unwrap())
    }

    #[tokio::test]
    async fn write_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("usr/bin/tool");

        write_file(&dest, b"#!/bin/sh\n", 0o755).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"#!/bin/sh\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dest).unwrap().permissions().mode();
            assert_eq!(mode & 0o7777, 0o755);
        }
    }

    #[tokio::test]
    async fn unreachable_url_fails() {
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let dir = tempfile::tempdir().unwrap();
        let file = AuxiliaryFile {
            url: format!("http://{addr}/tool"),
            destination: dir.path().join("tool"),
            mode: None,
        };

        let err = offline_provisioner().download(&file).await.unwrap_err();
        assert!(err.to_string().contains("Failed to download"), "{err:#}");
        assert!(!file.destination.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn service_start_runs_enable_then_start() {
        let provisioner = offline_provisioner().with_systemctl("true");
        provisioner.start_service("target-install.service").await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_systemctl_is_reported() {
        let provisioner = offline_provisioner().with_systemctl("false");
        let err = provisioner
            .start_service("target-install.service")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to enable"), "{err:#}");
    }

    #[tokio::test]
    async fn empty_config_does_nothing() {
        let provisioner = offline_provisioner().with_systemctl("/nonexistent/systemctl");
        provisioner.run(&AgentConfig::default()).await.unwrap();
    }
}
