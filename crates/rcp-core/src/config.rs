//! Agent configuration document.
//!
//! The agent reads a single TOML document. Resolution order:
//! 1. Explicit path (`--config` / `RCP_AGENT_CONFIG`), which must exist
//! 2. `/etc/rcp-agent/config.toml`
//! 3. `./rcp-agent.toml`
//! 4. Built-in defaults
//!
//! CLI arguments and environment variables are applied on top by the binary.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Config files searched, in order, when no explicit path is given.
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["/etc/rcp-agent/config.toml", "./rcp-agent.toml"];

/// Local target used when the document does not name one.
pub const DEFAULT_LOCAL_SOCKET: &str = "/run/rcp/target.sock";

/// Default permissions for downloaded auxiliary files.
pub const DEFAULT_FILE_MODE: u32 = 0o755;

/// How the agent reaches the local target service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Local domain socket at a filesystem path.
    #[default]
    Unix,
    /// Plain TCP stream to `host:port`.
    Tcp,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix => f.write_str("unix"),
            Self::Tcp => f.write_str("tcp"),
        }
    }
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unix" => Ok(Self::Unix),
            "tcp" => Ok(Self::Tcp),
            other => Err(format!("unknown target kind {other:?} (expected unix|tcp)")),
        }
    }
}

/// Base64-encoded PEM material for the agent's mTLS identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsFields {
    /// Agent certificate chain (base64 of PEM).
    pub client_cert: String,
    /// Agent private key (base64 of PEM).
    pub client_key: String,
    /// Certificate(s) the rendezvous listener must chain to (base64 of PEM).
    pub server_cert: String,
}

impl TlsFields {
    /// True when no field carries material, meaning the embedded identity
    /// should be used instead.
    pub fn is_empty(&self) -> bool {
        self.client_cert.trim().is_empty()
            && self.client_key.trim().is_empty()
            && self.server_cert.trim().is_empty()
    }
}

/// A file the agent downloads before starting the tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxiliaryFile {
    pub url: String,
    pub destination: PathBuf,
    /// Octal permission string such as `"0755"`.
    #[serde(default)]
    pub mode: Option<String>,
}

impl AuxiliaryFile {
    /// Parse the permission bits, defaulting to `0755`.
    pub fn mode_bits(&self) -> Result<u32> {
        let Some(mode) = self.mode.as_deref() else {
            return Ok(DEFAULT_FILE_MODE);
        };
        let digits = mode.trim().trim_start_matches("0o");
        u32::from_str_radix(digits, 8)
            .ok()
            .filter(|bits| *bits <= 0o7777)
            .ok_or_else(|| {
                Error::Config(format!(
                    "invalid mode {mode:?} for {}",
                    self.destination.display()
                ))
            })
    }
}

/// Complete agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// `host:port` of the rendezvous listener. When absent the agent only
    /// provisions and exits.
    pub rendezvous_address: Option<String>,
    pub local_address: String,
    pub local_kind: TargetKind,
    pub retry_interval_ms: u64,
    pub dial_timeout_ms: u64,
    pub tls: TlsFields,
    pub files: Vec<AuxiliaryFile>,
    /// systemd units enabled and started after provisioning.
    pub services: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            rendezvous_address: None,
            local_address: DEFAULT_LOCAL_SOCKET.to_string(),
            local_kind: TargetKind::Unix,
            retry_interval_ms: 1_000,
            dial_timeout_ms: 10_000,
            tls: TlsFields::default(),
            files: Vec::new(),
            services: Vec::new(),
        }
    }
}

impl AgentConfig {
    pub const fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub const fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Check the values the tunnel depends on.
    pub fn validate(&self) -> Result<()> {
        if self.retry_interval_ms == 0 {
            return Err(Error::Config("retry_interval_ms must be > 0".into()));
        }
        if self.dial_timeout_ms == 0 {
            return Err(Error::Config("dial_timeout_ms must be > 0".into()));
        }
        if let Some(addr) = &self.rendezvous_address {
            validate_host_port(addr)?;
        }
        match self.local_kind {
            TargetKind::Tcp => validate_host_port(&self.local_address)?,
            TargetKind::Unix => {
                if self.local_address.trim().is_empty() {
                    return Err(Error::Config("local_address must not be empty".into()));
                }
            }
        }
        for file in &self.files {
            file.mode_bits()?;
        }
        Ok(())
    }
}

/// Require `host:port` with a numeric port.
pub fn validate_host_port(addr: &str) -> Result<()> {
    let (host, port) = addr
        .trim()
        .rsplit_once(':')
        .ok_or_else(|| Error::Config(format!("address {addr:?} is not host:port")))?;
    if host.is_empty() {
        return Err(Error::Config(format!("address {addr:?} has no host")));
    }
    port.parse::<u16>()
        .map_err(|_| Error::Config(format!("address {addr:?} has an invalid port")))?;
    Ok(())
}

/// Load the agent configuration.
///
/// An explicit path must exist; otherwise the first existing default path is
/// used, falling back to built-in defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<AgentConfig> {
    if let Some(path) = explicit {
        return load_config_file(path);
    }
    for candidate in DEFAULT_CONFIG_PATHS {
        let path = Path::new(candidate);
        if path.exists() {
            tracing::debug!(path = %path.display(), "Using default config file");
            return load_config_file(path);
        }
    }
    Ok(AgentConfig::default())
}

pub fn load_config_file(path: &Path) -> Result<AgentConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    AgentConfig::from_toml_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}
